use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::session::{ChannelRef, VoiceConnection, VoiceSession};
use crate::error::ConnectionError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Joins voice channels with bounded, linearly backed-off retries.
pub struct SessionConnector {
    session: Arc<dyn VoiceSession>,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl SessionConnector {
    /// `max_attempts == 0` falls back to [`DEFAULT_MAX_ATTEMPTS`].
    pub fn new(session: Arc<dyn VoiceSession>, max_attempts: u32, backoff_unit: Duration) -> Self {
        let max_attempts = if max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            max_attempts
        };

        Self {
            session,
            max_attempts,
            backoff_unit,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Attempt `i` (1-based) waits `i` backoff units before attempt `i + 1`.
    /// A connection that comes back not ready counts as a failed attempt.
    pub async fn join(
        &self,
        channel: &ChannelRef,
    ) -> Result<Box<dyn VoiceConnection>, ConnectionError> {
        if channel.channel_id.trim().is_empty() {
            return Err(ConnectionError::EmptyChannel);
        }

        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            info!(
                "Attempt {} to connect to voice channel {}",
                attempt, channel
            );

            match self.session.join(channel).await {
                Ok(connection) if connection.is_ready() => {
                    info!(
                        "Connected to voice channel {} on attempt {}",
                        channel, attempt
                    );
                    return Ok(connection);
                }
                Ok(mut connection) => {
                    warn!("Voice connection to {} is not ready", channel);
                    last_error = "connection not ready".to_string();
                    if let Err(e) = connection.disconnect().await {
                        warn!("Failed to drop unready connection: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Failed to join voice channel {}: {}", channel, e);
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                sleep(self.backoff_unit * attempt).await;
            }
        }

        Err(ConnectionError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}
