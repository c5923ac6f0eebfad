//! Channel recording lifecycle.
//!
//! join → start monitors → demux packets until stopped → close writers →
//! hand the directory to the upload pipeline in the background.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::connector::SessionConnector;
use super::demux::{DemuxSummary, PacketDemuxer};
use super::encoder::{self, StreamEncoder};
use super::session::{ChannelRef, VoiceConnection, VoiceSession};
use super::status::{RecordingStatus, RecordingStatusHandle};
use super::stop::{DurationTimer, OccupancyMonitor, StopReason, StopSignal};
use crate::config::Config;
use crate::error::RecordError;
use crate::storage::{BlobStore, UploadPipeline, UploadReport};

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub duration: Option<Duration>,
    pub max_join_attempts: u32,
    pub join_backoff: Duration,
    pub occupancy_poll: Duration,
    pub records_dir: PathBuf,
}

impl From<&Config> for RecorderOptions {
    fn from(config: &Config) -> Self {
        Self {
            duration: config.recording.duration(),
            max_join_attempts: config.recording.max_join_attempts,
            join_backoff: config.recording.join_backoff(),
            occupancy_poll: config.recording.occupancy_poll(),
            records_dir: config.recording.records_dir.clone(),
        }
    }
}

/// Result of a finished recording. The upload runs detached; await
/// `upload` only if you care about when it settles.
pub struct RecordingSummary {
    pub channel: ChannelRef,
    pub session_dir: PathBuf,
    pub stop_reason: Option<StopReason>,
    pub demux: DemuxSummary,
    pub upload: JoinHandle<UploadReport>,
}

/// Handle to a recording in progress.
#[derive(Clone)]
struct RecordingSession {
    stop: StopSignal,
    status: RecordingStatusHandle,
}

pub struct Recorder {
    session: Arc<dyn VoiceSession>,
    encoder: Arc<dyn StreamEncoder>,
    uploader: UploadPipeline,
    options: RecorderOptions,
    active: Mutex<HashMap<ChannelRef, RecordingSession>>,
}

impl Recorder {
    pub fn new(
        session: Arc<dyn VoiceSession>,
        encoder: Arc<dyn StreamEncoder>,
        uploader: UploadPipeline,
        options: RecorderOptions,
    ) -> Self {
        Self {
            session,
            encoder,
            uploader,
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Output format and everything else from `config`; uploads go to `store`.
    pub fn from_config(
        session: Arc<dyn VoiceSession>,
        store: Arc<dyn BlobStore>,
        config: &Config,
    ) -> Self {
        let encoder = encoder::from_config(&config.recording);
        let uploader = UploadPipeline::new(
            store,
            encoder.extension(),
            config.pipeline.max_concurrency,
        );
        Self::new(session, encoder, uploader, RecorderOptions::from(config))
    }

    /// Record `channel` until the duration elapses, the channel empties or
    /// [`Recorder::stop`] is called.
    pub async fn record(&self, channel: ChannelRef) -> Result<RecordingSummary, RecordError> {
        let recording = {
            let mut active = self.active.lock().await;
            if active.contains_key(&channel) {
                return Err(RecordError::AlreadyRecording(channel.to_string()));
            }
            let recording = RecordingSession {
                stop: StopSignal::new(),
                status: RecordingStatusHandle::default(),
            };
            active.insert(channel.clone(), recording.clone());
            recording
        };

        let result = self.run(&channel, &recording).await;
        if let Err(e) = &result {
            recording.status.set_stopped(Some(e.to_string())).await;
        }

        self.active.lock().await.remove(&channel);
        result
    }

    /// Ask a running recording to stop. Returns `false` if nothing was
    /// recording or it was already stopping.
    pub async fn stop(&self, channel: &ChannelRef) -> bool {
        match self.active.lock().await.get(channel) {
            Some(recording) => recording.stop.trigger(StopReason::Manual),
            None => false,
        }
    }

    pub async fn status(&self, channel: &ChannelRef) -> Option<RecordingStatus> {
        let status = self.active.lock().await.get(channel)?.status.clone();
        Some(status.get().await)
    }

    pub async fn active_channels(&self) -> Vec<ChannelRef> {
        self.active.lock().await.keys().cloned().collect()
    }

    async fn run(
        &self,
        channel: &ChannelRef,
        recording: &RecordingSession,
    ) -> Result<RecordingSummary, RecordError> {
        let connector = SessionConnector::new(
            Arc::clone(&self.session),
            self.options.max_join_attempts,
            self.options.join_backoff,
        );

        let mut connection = connector.join(channel).await.map_err(|e| {
            error!("Channel join error: {}", e);
            e
        })?;

        let result = self.capture(channel, recording, connection.as_mut()).await;

        if let Err(e) = connection.disconnect().await {
            warn!("Failed to leave voice channel {}: {}", channel, e);
        }
        result
    }

    async fn capture(
        &self,
        channel: &ChannelRef,
        recording: &RecordingSession,
        connection: &mut dyn VoiceConnection,
    ) -> Result<RecordingSummary, RecordError> {
        let packets = connection
            .take_packets()
            .ok_or(RecordError::NoPacketStream)?;

        let session_dir = self.options.records_dir.join(&channel.channel_id);
        tokio::fs::create_dir_all(&session_dir).await?;

        let stop = recording.stop.clone();

        let timer = self
            .options
            .duration
            .and_then(DurationTimer::new)
            .map(|timer| tokio::spawn(timer.run(stop.clone())));

        let monitor = OccupancyMonitor::new(
            Arc::clone(&self.session),
            channel.clone(),
            self.options.occupancy_poll,
        );
        let monitor = tokio::spawn(monitor.run(stop.clone()));

        recording.status.set_active().await;
        info!("Recording started in channel {}", channel);

        let demux = PacketDemuxer::new(Arc::clone(&self.encoder), &session_dir)
            .run(packets, &stop)
            .await;

        // The stream may have ended on its own; wind the monitors down too.
        stop.trigger(StopReason::StreamEnded);
        let stop_reason = stop.reason();
        recording.status.set_stopping(stop_reason).await;

        // Writers are closed; the upload must not wait on the monitors.
        let uploader = self.uploader.clone();
        let upload_dir = session_dir.clone();
        let upload = tokio::spawn(async move { uploader.upload(&upload_dir).await });

        let recorded = recording
            .status
            .get()
            .await
            .elapsed()
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        info!(
            "Recording in channel {} stopped ({}) after {}s, {} files queued for upload",
            channel,
            stop_reason.map(|r| r.as_str()).unwrap_or("unknown"),
            recorded,
            demux.files.len()
        );

        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                warn!("Duration timer task failed: {}", e);
            }
        }
        let monitor_result = match monitor.await {
            Ok(result) => result.map(|_| ()),
            Err(e) => {
                warn!("Occupancy monitor task failed: {}", e);
                Ok(())
            }
        };

        monitor_result?;
        recording.status.set_stopped(None).await;

        Ok(RecordingSummary {
            channel: channel.clone(),
            session_dir,
            stop_reason,
            demux,
            upload,
        })
    }
}
