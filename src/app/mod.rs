//! Chat-facing glue: reacts to channel and message events coming from the
//! gateway and drives the recorder and link generator.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{RecordError, StorageError};
use crate::recorder::{ChannelRef, Recorder, VoiceSession};
use crate::storage::{channel_prefix, BlobStore, LinkGenerator, LinkSet};

pub const NO_RECORDS_REPLY: &str = "there are no records for this channel";
pub const FAILURE_REPLY: &str = "something went wrong, try again later";
pub const RECORDS_USAGE: &str = "usage: records <channel-id>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Text,
    Other,
}

/// A channel was created in a guild the bot is in.
#[derive(Debug, Clone)]
pub struct ChannelCreated {
    pub guild_id: String,
    pub channel_id: String,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub author_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `records <channel-id>`; `None` when the id is missing.
    Records(Option<String>),
}

impl ChatCommand {
    pub fn parse(content: &str) -> Option<Self> {
        let mut words = content.split_whitespace();
        match words.next()? {
            "records" => Some(ChatCommand::Records(words.next().map(str::to_string))),
            _ => None,
        }
    }
}

pub struct Bot {
    self_id: String,
    recorder: Arc<Recorder>,
    links: LinkGenerator,
}

impl Bot {
    pub fn new(self_id: impl Into<String>, recorder: Arc<Recorder>, links: LinkGenerator) -> Self {
        Self {
            self_id: self_id.into(),
            recorder,
            links,
        }
    }

    pub fn from_config(
        self_id: impl Into<String>,
        session: Arc<dyn VoiceSession>,
        store: Arc<dyn BlobStore>,
        config: &Config,
    ) -> Self {
        let recorder = Recorder::from_config(session, Arc::clone(&store), config);
        let links = LinkGenerator::new(
            store,
            config.storage.link_ttl(),
            config.pipeline.max_concurrency,
        );
        Self::new(self_id, Arc::new(recorder), links)
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Start recording a freshly created voice channel. Other channel kinds
    /// are ignored. The recording runs in the background.
    pub fn on_channel_created(&self, event: ChannelCreated) -> Option<JoinHandle<()>> {
        if event.kind != ChannelKind::Voice {
            debug!("Ignoring new {:?} channel {}", event.kind, event.channel_id);
            return None;
        }

        let channel = ChannelRef::new(event.guild_id, event.channel_id);
        let recorder = Arc::clone(&self.recorder);
        info!("Voice channel {} created, starting recording", channel);

        Some(tokio::spawn(async move {
            match recorder.record(channel.clone()).await {
                Ok(summary) => info!(
                    "Recording of {} finished with {} files",
                    channel,
                    summary.demux.files.len()
                ),
                Err(RecordError::AlreadyRecording(_)) => {
                    warn!("Channel {} is already being recorded", channel)
                }
                Err(e) => error!("Recording of {} failed: {}", channel, e),
            }
        }))
    }

    /// Returns the reply to post, if any.
    pub async fn on_message(&self, message: &ChatMessage) -> Option<String> {
        if message.author_id == self.self_id {
            return None;
        }

        match ChatCommand::parse(&message.content)? {
            ChatCommand::Records(None) => Some(RECORDS_USAGE.to_string()),
            ChatCommand::Records(Some(channel_id)) => Some(self.records(&channel_id).await),
        }
    }

    /// Reply text for a `records` request about `channel_id`.
    pub async fn records(&self, channel_id: &str) -> String {
        let result = self.links.generate(&channel_prefix(channel_id)).await;
        records_reply(result, self.links.validity())
    }
}

pub fn records_reply(result: Result<LinkSet, StorageError>, validity: Duration) -> String {
    let set = match result {
        Ok(set) => set,
        Err(e) => {
            error!("Failed to generate links: {}", e);
            return FAILURE_REPLY.to_string();
        }
    };

    if set.links.is_empty() {
        return NO_RECORDS_REPLY.to_string();
    }

    let urls: Vec<&str> = set.links.iter().map(|link| link.url.as_str()).collect();
    format!(
        "Links are only available for {}\n{}",
        describe_validity(validity),
        urls.join("\n")
    )
}

/// Whole minutes when the validity is at least one minute, seconds otherwise.
fn describe_validity(validity: Duration) -> String {
    let secs = validity.as_secs();
    match secs / 60 {
        0 if secs == 1 => "1 second".to_string(),
        0 => format!("{} seconds", secs),
        1 => "1 minute".to_string(),
        minutes => format!("{} minutes", minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{
        AudioPacket, Participant, RecorderOptions, VoiceConnection, WavEncoder,
    };
    use crate::storage::links::DEFAULT_LINK_VALIDITY;
    use crate::storage::{ListPage, ShareLink, UploadPipeline};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct IdleConnection {
        packets: Option<mpsc::Receiver<AudioPacket>>,
    }

    #[async_trait]
    impl VoiceConnection for IdleConnection {
        fn is_ready(&self) -> bool {
            true
        }

        fn take_packets(&mut self) -> Option<mpsc::Receiver<AudioPacket>> {
            self.packets.take()
        }

        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Every join gets a stream that is already closed.
    #[derive(Default)]
    struct ClosedStreamSession {
        joins: AtomicU32,
    }

    #[async_trait]
    impl VoiceSession for ClosedStreamSession {
        async fn join(&self, _channel: &ChannelRef) -> Result<Box<dyn VoiceConnection>> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            let (_tx, rx) = mpsc::channel(1);
            Ok(Box::new(IdleConnection { packets: Some(rx) }))
        }

        async fn members(&self, _channel: &ChannelRef) -> Result<Vec<Participant>> {
            Ok(vec![Participant::bot("bot")])
        }
    }

    #[derive(Default)]
    struct FixedStore {
        keys: Vec<String>,
        fail_listing: bool,
        prefixes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for FixedStore {
        async fn put(&self, _data: Vec<u8>, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list_page(
            &self,
            prefix: &str,
            _continuation: Option<&str>,
        ) -> Result<ListPage, StorageError> {
            self.prefixes.lock().unwrap().push(prefix.to_string());
            if self.fail_listing {
                return Err(StorageError::Backend("listing failed".to_string()));
            }
            Ok(ListPage {
                keys: self
                    .keys
                    .iter()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect(),
                next: None,
            })
        }

        async fn presign(&self, key: &str, _validity: Duration) -> Result<String, StorageError> {
            Ok(format!("https://cdn.test/{key}"))
        }
    }

    /// The staging root lives as long as the returned guard.
    fn bot_with(
        session: Arc<dyn VoiceSession>,
        store: Arc<FixedStore>,
    ) -> (Bot, tempfile::TempDir) {
        let staging = tempfile::tempdir().unwrap();
        let dir = staging.path().to_path_buf();
        let recorder = Recorder::new(
            session,
            Arc::new(WavEncoder::new(48_000, 2)),
            UploadPipeline::new(store.clone(), "wav", 2),
            RecorderOptions {
                duration: None,
                max_join_attempts: 1,
                join_backoff: Duration::from_millis(1),
                occupancy_poll: Duration::from_secs(1),
                records_dir: dir,
            },
        );
        let links = LinkGenerator::new(store, DEFAULT_LINK_VALIDITY, 4);
        (Bot::new("bot", Arc::new(recorder), links), staging)
    }

    fn message(author: &str, content: &str) -> ChatMessage {
        ChatMessage {
            author_id: author.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_parse_records_command() {
        assert_eq!(
            ChatCommand::parse("records 123"),
            Some(ChatCommand::Records(Some("123".to_string())))
        );
        assert_eq!(
            ChatCommand::parse("  records   123  extra"),
            Some(ChatCommand::Records(Some("123".to_string())))
        );
        assert_eq!(ChatCommand::parse("records"), Some(ChatCommand::Records(None)));
        assert_eq!(ChatCommand::parse("hello records 1"), None);
        assert_eq!(ChatCommand::parse(""), None);
    }

    #[test]
    fn test_reply_with_links() {
        let expires_at = Utc::now();
        let set = LinkSet {
            links: vec![
                ShareLink {
                    key: "records/1/1.wav".to_string(),
                    url: "https://a".to_string(),
                    expires_at,
                },
                ShareLink {
                    key: "records/1/2.wav".to_string(),
                    url: "https://b".to_string(),
                    expires_at,
                },
            ],
            omitted: vec!["records/1/3.wav".to_string()],
        };

        assert_eq!(
            records_reply(Ok(set), DEFAULT_LINK_VALIDITY),
            "Links are only available for 15 minutes\nhttps://a\nhttps://b"
        );
    }

    #[test]
    fn test_reply_header_for_short_validity() {
        let set = LinkSet {
            links: vec![ShareLink {
                key: "records/1/1.ogg".to_string(),
                url: "https://a".to_string(),
                expires_at: Utc::now(),
            }],
            omitted: Vec::new(),
        };

        assert_eq!(
            records_reply(Ok(set.clone()), Duration::from_secs(30)),
            "Links are only available for 30 seconds\nhttps://a"
        );
        assert_eq!(
            records_reply(Ok(set.clone()), Duration::from_secs(60)),
            "Links are only available for 1 minute\nhttps://a"
        );
        assert_eq!(
            records_reply(Ok(set), Duration::from_secs(150)),
            "Links are only available for 2 minutes\nhttps://a"
        );
    }

    #[test]
    fn test_reply_without_links_or_on_failure() {
        assert_eq!(
            records_reply(Ok(LinkSet::default()), DEFAULT_LINK_VALIDITY),
            NO_RECORDS_REPLY
        );
        assert_eq!(
            records_reply(
                Err(StorageError::Backend("boom".to_string())),
                DEFAULT_LINK_VALIDITY
            ),
            FAILURE_REPLY
        );
    }

    #[tokio::test]
    async fn test_on_message_lists_channel_records() {
        let store = Arc::new(FixedStore {
            keys: vec![
                "records/12/1.wav".to_string(),
                "records/123/2.wav".to_string(),
            ],
            ..Default::default()
        });
        let (bot, _staging) = bot_with(Arc::new(ClosedStreamSession::default()), store.clone());

        let reply = bot.on_message(&message("alice", "records 12")).await;

        assert_eq!(
            reply.as_deref(),
            Some("Links are only available for 15 minutes\nhttps://cdn.test/records/12/1.wav")
        );
        assert_eq!(*store.prefixes.lock().unwrap(), vec!["records/12/".to_string()]);
    }

    #[tokio::test]
    async fn test_on_message_replies() {
        let store = Arc::new(FixedStore::default());
        let (bot, _staging) = bot_with(Arc::new(ClosedStreamSession::default()), store);

        assert_eq!(
            bot.on_message(&message("alice", "records 9")).await.as_deref(),
            Some(NO_RECORDS_REPLY)
        );
        assert_eq!(
            bot.on_message(&message("alice", "records")).await.as_deref(),
            Some(RECORDS_USAGE)
        );
        assert_eq!(bot.on_message(&message("alice", "hi there")).await, None);
        assert_eq!(bot.on_message(&message("bot", "records 9")).await, None);
    }

    #[tokio::test]
    async fn test_listing_failure_reply() {
        let store = Arc::new(FixedStore {
            fail_listing: true,
            ..Default::default()
        });
        let (bot, _staging) = bot_with(Arc::new(ClosedStreamSession::default()), store);

        assert_eq!(
            bot.on_message(&message("alice", "records 9")).await.as_deref(),
            Some(FAILURE_REPLY)
        );
    }

    #[tokio::test]
    async fn test_only_voice_channels_start_recording() {
        let session = Arc::new(ClosedStreamSession::default());
        let (bot, _staging) = bot_with(session.clone(), Arc::new(FixedStore::default()));

        let text = ChannelCreated {
            guild_id: "g".to_string(),
            channel_id: "t1".to_string(),
            kind: ChannelKind::Text,
        };
        assert!(bot.on_channel_created(text).is_none());
        assert_eq!(session.joins.load(Ordering::SeqCst), 0);

        let voice = ChannelCreated {
            guild_id: "g".to_string(),
            channel_id: "v1".to_string(),
            kind: ChannelKind::Voice,
        };
        bot.on_channel_created(voice).unwrap().await.unwrap();
        assert_eq!(session.joins.load(Ordering::SeqCst), 1);
    }
}
