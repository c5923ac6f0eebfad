//! Channel recording.
//!
//! Joins a voice channel, splits the packet stream into one file per
//! speaker and stops on duration, empty channel or request.

pub mod connector;
pub mod demux;
pub mod encoder;
pub mod recording_machine;
pub mod session;
pub mod status;
pub mod stop;

pub use connector::SessionConnector;
pub use demux::{DemuxSummary, PacketDemuxer};
pub use encoder::{AudioWriter, OggOpusEncoder, StreamEncoder, WavEncoder};
pub use recording_machine::{Recorder, RecorderOptions, RecordingSummary};
pub use session::{AudioPacket, ChannelRef, Participant, VoiceConnection, VoiceSession};
pub use status::{RecordingPhase, RecordingStatus, RecordingStatusHandle};
pub use stop::{DurationTimer, OccupancyMonitor, OccupancyState, StopReason, StopSignal};
