//! Recording status types and shared state handle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::stop::StopReason;

/// Phase of one channel recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingPhase {
    Joining,
    Active,
    Stopping,
    Stopped,
}

impl RecordingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordingStatus {
    pub phase: RecordingPhase,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Set when the demuxer stops consuming packets.
    pub stopped_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self {
            phase: RecordingPhase::Joining,
            started_at: None,
            stopped_at: None,
            stop_reason: None,
            last_error: None,
        }
    }
}

impl RecordingStatus {
    /// Time spent recording so far, or in total once stopped.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        let until = self.stopped_at.unwrap_or_else(chrono::Utc::now);
        Some(until.signed_duration_since(started).to_std().unwrap_or_default())
    }

    fn enter(&mut self, phase: RecordingPhase) {
        debug!("Recording phase {} -> {}", self.phase.as_str(), phase.as_str());
        self.phase = phase;
    }
}

/// Thread-safe handle for sharing a recording's status with observers.
#[derive(Clone, Default)]
pub struct RecordingStatusHandle {
    inner: Arc<Mutex<RecordingStatus>>,
}

impl RecordingStatusHandle {
    pub async fn get(&self) -> RecordingStatus {
        self.inner.lock().await.clone()
    }

    pub async fn set_active(&self) {
        let mut status = self.inner.lock().await;
        status.enter(RecordingPhase::Active);
        status.started_at = Some(chrono::Utc::now());
    }

    pub async fn set_stopping(&self, reason: Option<StopReason>) {
        let mut status = self.inner.lock().await;
        status.enter(RecordingPhase::Stopping);
        status.stop_reason = reason;
        if status.started_at.is_some() {
            status.stopped_at = Some(chrono::Utc::now());
        }
    }

    pub async fn set_stopped(&self, last_error: Option<String>) {
        let mut status = self.inner.lock().await;
        status.enter(RecordingPhase::Stopped);
        if last_error.is_some() {
            status.last_error = last_error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_phase_as_str() {
        assert_eq!(RecordingPhase::Joining.as_str(), "joining");
        assert_eq!(RecordingPhase::Active.as_str(), "active");
        assert_eq!(RecordingPhase::Stopping.as_str(), "stopping");
        assert_eq!(RecordingPhase::Stopped.as_str(), "stopped");
    }

    #[tokio::test]
    async fn test_status_handle_lifecycle() {
        let handle = RecordingStatusHandle::default();
        assert_eq!(handle.get().await.phase, RecordingPhase::Joining);
        assert!(handle.get().await.elapsed().is_none());

        handle.set_active().await;
        let status = handle.get().await;
        assert_eq!(status.phase, RecordingPhase::Active);
        assert!(status.started_at.is_some());

        handle.set_stopping(Some(StopReason::ChannelEmpty)).await;
        let status = handle.get().await;
        assert_eq!(status.stop_reason, Some(StopReason::ChannelEmpty));
        let frozen = status.elapsed().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.get().await.elapsed(), Some(frozen));

        handle.set_stopped(Some("membership query failed".to_string())).await;
        let status = handle.get().await;
        assert_eq!(status.phase, RecordingPhase::Stopped);
        assert_eq!(status.last_error.as_deref(), Some("membership query failed"));
    }
}
