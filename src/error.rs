//! Error types for the recording and storage pipelines.
//!
//! Only failures that abort a whole operation get a variant here. Per-source
//! write failures, per-file upload failures and per-key link failures are
//! logged where they happen and never bubble up.

use std::time::Duration;

/// Joining a voice channel failed; no recording was started.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The channel reference had no channel id. No attempt was made.
    #[error("channel id is empty")]
    EmptyChannel,

    /// Every join attempt failed or returned a connection that never
    /// became ready.
    #[error("failed to join voice channel after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// A recording that started but could not finish cleanly.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The occupancy monitor could not query channel membership.
    #[error("membership query failed: {0}")]
    MembershipQuery(String),

    /// The session's staging directory could not be prepared.
    #[error("failed to prepare recording directory: {0}")]
    Io(#[from] std::io::Error),

    /// The connection handed out no packet stream.
    #[error("voice connection has no packet stream")]
    NoPacketStream,

    /// A recording for this channel is already running.
    #[error("channel {0} is already being recorded")]
    AlreadyRecording(String),
}

/// Object storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The storage service answered with a non-success status.
    #[error("storage service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// Presigned links are capped at seven days by the signing scheme.
    #[error("link validity {0:?} exceeds the 7 day maximum")]
    ValidityTooLong(Duration),

    #[error("storage backend error: {0}")]
    Backend(String),
}
