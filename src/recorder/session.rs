//! Voice session abstraction.
//!
//! The gateway that actually speaks the voice protocol lives outside this
//! crate. The recorder only needs to join a channel, receive packets and ask
//! who is currently in the channel.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// A voice channel inside a guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub guild_id: String,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// One inbound voice packet. `source_id` is stable per speaker for the
/// lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub source_id: u32,
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Someone present in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: String,
    pub is_bot: bool,
}

impl Participant {
    pub fn human(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_bot: false,
        }
    }

    pub fn bot(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_bot: true,
        }
    }
}

/// Gateway-side capability used by the recorder.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Join the channel. The returned connection may not be ready yet.
    async fn join(&self, channel: &ChannelRef) -> Result<Box<dyn VoiceConnection>>;

    /// Everyone currently connected to the channel, bots included.
    async fn members(&self, channel: &ChannelRef) -> Result<Vec<Participant>>;
}

/// A joined voice channel.
#[async_trait]
pub trait VoiceConnection: Send {
    fn is_ready(&self) -> bool;

    /// Hand over the inbound packet stream. Only the first call returns it.
    /// The stream carries data only; it is never closed to signal a stop.
    fn take_packets(&mut self) -> Option<mpsc::Receiver<AudioPacket>>;

    async fn disconnect(&mut self) -> Result<()>;
}
