//! Stop coordination for a recording session.
//!
//! One [`StopSignal`] per session. The duration timer, the occupancy monitor
//! and manual stops all feed it; the demuxer and the monitors themselves
//! watch it. Only the first trigger counts.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::session::{ChannelRef, VoiceSession};
use crate::error::RecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    ChannelEmpty,
    MembershipQueryFailed,
    Manual,
    /// The voice session closed the packet stream on its own.
    StreamEnded,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::DurationElapsed => "duration_elapsed",
            StopReason::ChannelEmpty => "channel_empty",
            StopReason::MembershipQueryFailed => "membership_query_failed",
            StopReason::Manual => "manual",
            StopReason::StreamEnded => "stream_ended",
        }
    }
}

/// One-shot, idempotent stop indicator.
#[derive(Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn trigger(&self, reason: StopReason) -> bool {
        if self.reason.set(reason).is_err() {
            debug!("Stop already requested, ignoring {}", reason.as_str());
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

/// Stops the session once the configured duration has elapsed.
pub struct DurationTimer {
    duration: Duration,
}

impl DurationTimer {
    /// Returns `None` for a zero duration; such a timer would never fire.
    pub fn new(duration: Duration) -> Option<Self> {
        (!duration.is_zero()).then_some(Self { duration })
    }

    pub async fn run(self, stop: StopSignal) {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => {
                if stop.trigger(StopReason::DurationElapsed) {
                    info!("Recording stopped, time is over ({}s)", self.duration.as_secs());
                }
            }
            _ = stop.triggered() => {}
        }
    }
}

/// Channel occupancy as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyState {
    /// Nobody (other than bots) has been seen yet.
    WaitingForFirstJoin,
    Occupied,
    /// Was occupied, now nobody is left. Terminal.
    Empty,
}

impl OccupancyState {
    pub fn observe(self, occupied: bool) -> Self {
        match (self, occupied) {
            (OccupancyState::WaitingForFirstJoin, false) => OccupancyState::WaitingForFirstJoin,
            (OccupancyState::WaitingForFirstJoin, true) => OccupancyState::Occupied,
            (OccupancyState::Occupied, true) => OccupancyState::Occupied,
            (OccupancyState::Occupied, false) => OccupancyState::Empty,
            (OccupancyState::Empty, _) => OccupancyState::Empty,
        }
    }
}

/// Polls channel membership and stops the session once everyone has left.
pub struct OccupancyMonitor {
    session: Arc<dyn VoiceSession>,
    channel: ChannelRef,
    poll_interval: Duration,
}

impl OccupancyMonitor {
    pub fn new(session: Arc<dyn VoiceSession>, channel: ChannelRef, poll_interval: Duration) -> Self {
        Self {
            session,
            channel,
            poll_interval,
        }
    }

    /// Runs until the channel empties, the signal fires elsewhere, or a
    /// membership query fails. Query failures are not retried. A query still
    /// in flight when the signal fires is dropped.
    pub async fn run(self, stop: StopSignal) -> Result<OccupancyState, RecordError> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = OccupancyState::WaitingForFirstJoin;

        loop {
            tokio::select! {
                biased;
                _ = stop.triggered() => return Ok(state),
                _ = ticker.tick() => {}
            }

            let members = tokio::select! {
                biased;
                _ = stop.triggered() => {
                    debug!("Abandoning membership query for {}, recording stopped", self.channel);
                    return Ok(state);
                }
                members = self.session.members(&self.channel) => members,
            };

            let members = match members {
                Ok(members) => members,
                Err(e) => {
                    error!("Failed to check users in channel {}: {}", self.channel, e);
                    stop.trigger(StopReason::MembershipQueryFailed);
                    return Err(RecordError::MembershipQuery(e.to_string()));
                }
            };

            let occupied = members.iter().any(|member| !member.is_bot);
            let next = state.observe(occupied);
            if next != state {
                debug!("Channel {} occupancy {:?} -> {:?}", self.channel, state, next);
            }
            state = next;

            if state == OccupancyState::Empty {
                if stop.trigger(StopReason::ChannelEmpty) {
                    info!("Recording stopped, channel {} is empty", self.channel);
                }
                return Ok(state);
            }
        }
    }
}
