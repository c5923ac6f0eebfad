//! Routes the inbound packet stream into one file per speaker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::encoder::{AudioWriter, StreamEncoder};
use super::session::AudioPacket;
use super::stop::StopSignal;

enum WriterSlot {
    Open {
        writer: Box<dyn AudioWriter>,
        path: PathBuf,
    },
    /// Creation or a write failed; later packets for this source are dropped.
    Abandoned,
}

/// What the demux loop produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxSummary {
    /// Files whose writer closed cleanly.
    pub files: Vec<PathBuf>,
    pub packets_written: u64,
    pub packets_dropped: u64,
    pub abandoned_sources: Vec<u32>,
}

/// Owns every per-source writer of one session. Nothing else touches them.
pub struct PacketDemuxer {
    encoder: Arc<dyn StreamEncoder>,
    session_dir: PathBuf,
    writers: HashMap<u32, WriterSlot>,
    summary: DemuxSummary,
}

impl PacketDemuxer {
    pub fn new(encoder: Arc<dyn StreamEncoder>, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            session_dir: session_dir.into(),
            writers: HashMap::new(),
            summary: DemuxSummary::default(),
        }
    }

    pub fn file_path(&self, source_id: u32) -> PathBuf {
        source_file_path(&self.session_dir, source_id, self.encoder.extension())
    }

    /// Consume packets until the stop signal fires or the stream ends, then
    /// close every writer. Packets already queued when the signal fires are
    /// still written.
    pub async fn run(
        mut self,
        mut packets: mpsc::Receiver<AudioPacket>,
        stop: &StopSignal,
    ) -> DemuxSummary {
        loop {
            tokio::select! {
                biased;
                packet = packets.recv() => match packet {
                    Some(packet) => self.handle(packet),
                    None => {
                        info!("Packet stream ended");
                        break;
                    }
                },
                _ = stop.triggered() => {
                    packets.close();
                    while let Ok(packet) = packets.try_recv() {
                        self.handle(packet);
                    }
                    break;
                }
            }
        }

        self.close_all()
    }

    fn handle(&mut self, packet: AudioPacket) {
        let source_id = packet.source_id;

        if !self.writers.contains_key(&source_id) {
            let path = self.file_path(source_id);
            // An upload pass of an earlier recording of this channel may have
            // removed the directory since the session started.
            let created = std::fs::create_dir_all(&self.session_dir)
                .with_context(|| format!("Failed to create {:?}", self.session_dir))
                .and_then(|()| self.encoder.create(&path));
            let slot = match created {
                Ok(writer) => {
                    debug!("Opened writer for source {} at {:?}", source_id, path);
                    WriterSlot::Open { writer, path }
                }
                Err(e) => {
                    error!(
                        "Failed to create file {:?}, giving up on source {}: {:#}",
                        path, source_id, e
                    );
                    self.summary.abandoned_sources.push(source_id);
                    WriterSlot::Abandoned
                }
            };
            self.writers.insert(source_id, slot);
        }

        let Some(slot) = self.writers.get_mut(&source_id) else {
            return;
        };

        let result = match slot {
            WriterSlot::Open { writer, .. } => writer.write(&packet),
            WriterSlot::Abandoned => {
                self.summary.packets_dropped += 1;
                return;
            }
        };

        match result {
            Ok(()) => self.summary.packets_written += 1,
            Err(e) => {
                self.summary.packets_dropped += 1;
                self.summary.abandoned_sources.push(source_id);
                if let WriterSlot::Open { writer, path } =
                    std::mem::replace(slot, WriterSlot::Abandoned)
                {
                    error!(
                        "Failed to write to {:?}, giving up on source {}: {:#}",
                        path, source_id, e
                    );
                    // Close what was written so far so the partial file stays playable.
                    if let Err(e) = writer.close() {
                        warn!("Failed to close abandoned writer {:?}: {:#}", path, e);
                    }
                }
            }
        }
    }

    fn close_all(mut self) -> DemuxSummary {
        for (source_id, slot) in self.writers.drain() {
            if let WriterSlot::Open { writer, path } = slot {
                match writer.close() {
                    Ok(()) => {
                        debug!("Closed writer for source {}", source_id);
                        self.summary.files.push(path);
                    }
                    Err(e) => error!("Failed to close {:?}: {:#}", path, e),
                }
            }
        }

        self.summary.files.sort();
        self.summary.abandoned_sources.sort_unstable();
        info!(
            "Demux finished: {} files, {} packets written, {} dropped",
            self.summary.files.len(),
            self.summary.packets_written,
            self.summary.packets_dropped
        );
        self.summary
    }
}

/// `<session_dir>/<source_id>.<ext>`
pub fn source_file_path(session_dir: &Path, source_id: u32, extension: &str) -> PathBuf {
    session_dir.join(format!("{}.{}", source_id, extension))
}
