//! Per-source audio file writers.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use ogg::writing::{PacketWriteEndInfo, PacketWriter};
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use super::session::AudioPacket;
use crate::config::{AudioFormat, RecordingConfig};

const OPUS_VENDOR: &str = concat!("voicevault ", env!("CARGO_PKG_VERSION"));

/// Creates one writer per speaker file.
pub trait StreamEncoder: Send + Sync {
    /// File extension (without the dot) of the files this encoder produces.
    fn extension(&self) -> &str;

    fn create(&self, path: &Path) -> Result<Box<dyn AudioWriter>>;
}

pub trait AudioWriter: Send {
    fn write(&mut self, packet: &AudioPacket) -> Result<()>;

    /// Flush and finalize the container.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Encoder for the configured output format.
pub fn from_config(config: &RecordingConfig) -> Arc<dyn StreamEncoder> {
    match config.format {
        AudioFormat::Ogg => Arc::new(OggOpusEncoder::new(config.sample_rate, config.channels)),
        AudioFormat::Wav => Arc::new(WavEncoder::new(config.sample_rate, config.channels)),
    }
}

/// Stores Opus packets as received in an Ogg Opus stream, one packet per
/// page. Granule positions follow the RTP timestamps (48 kHz) relative to
/// the first packet.
pub struct OggOpusEncoder {
    sample_rate: u32,
    channels: u8,
}

impl OggOpusEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            // Mapping family 0 carries mono or stereo only.
            channels: if channels >= 2 { 2 } else { 1 },
        }
    }

    fn id_header(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(b"OpusHead");
        head.push(1);
        head.push(self.channels);
        head.extend_from_slice(&0u16.to_le_bytes()); // pre-skip
        head.extend_from_slice(&self.sample_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes()); // output gain
        head.push(0);
        head
    }
}

fn comment_header() -> Vec<u8> {
    let mut tags = Vec::with_capacity(16 + OPUS_VENDOR.len());
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(OPUS_VENDOR.len() as u32).to_le_bytes());
    tags.extend_from_slice(OPUS_VENDOR.as_bytes());
    tags.extend_from_slice(&0u32.to_le_bytes());
    tags
}

fn stream_serial(path: &Path) -> u32 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() as u32
}

impl StreamEncoder for OggOpusEncoder {
    fn extension(&self) -> &str {
        "ogg"
    }

    fn create(&self, path: &Path) -> Result<Box<dyn AudioWriter>> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let serial = stream_serial(path);
        let mut writer = PacketWriter::new(BufWriter::new(file));
        writer
            .write_packet(self.id_header(), serial, PacketWriteEndInfo::EndPage, 0)
            .with_context(|| format!("Failed to write Opus header to {:?}", path))?;

        Ok(Box::new(OggOpusWriter {
            writer,
            serial,
            // The comment header doubles as end-of-stream carrier for a
            // writer that never receives audio.
            pending: Some((comment_header(), 0)),
            last: None,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamPosition {
    sequence: u16,
    timestamp: u32,
    granule: u64,
}

/// `sequence` comes after `last` in RTP order, wraparound included.
fn is_newer(sequence: u16, last: u16) -> bool {
    (sequence.wrapping_sub(last) as i16) > 0
}

struct OggOpusWriter {
    writer: PacketWriter<'static, BufWriter<File>>,
    serial: u32,
    /// Held back one packet so the final one can carry the end-of-stream flag.
    pending: Option<(Vec<u8>, u64)>,
    last: Option<StreamPosition>,
}

impl OggOpusWriter {
    /// Late or duplicate packets keep the current granule so positions
    /// never run backwards.
    fn granule_for(&mut self, packet: &AudioPacket) -> u64 {
        let next = match self.last {
            None => StreamPosition {
                sequence: packet.sequence,
                timestamp: packet.timestamp,
                granule: 0,
            },
            Some(last) if is_newer(packet.sequence, last.sequence) => {
                let delta = packet.timestamp.wrapping_sub(last.timestamp);
                let advance = if (delta as i32) > 0 { u64::from(delta) } else { 0 };
                StreamPosition {
                    sequence: packet.sequence,
                    timestamp: packet.timestamp,
                    granule: last.granule + advance,
                }
            }
            Some(last) => return last.granule,
        };
        self.last = Some(next);
        next.granule
    }
}

impl AudioWriter for OggOpusWriter {
    fn write(&mut self, packet: &AudioPacket) -> Result<()> {
        let granule = self.granule_for(packet);
        if let Some((data, granule)) = self.pending.take() {
            self.writer
                .write_packet(data, self.serial, PacketWriteEndInfo::EndPage, granule)?;
        }
        self.pending = Some((packet.payload.clone(), granule));
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if let Some((data, granule)) = self.pending.take() {
            self.writer
                .write_packet(data, self.serial, PacketWriteEndInfo::EndStream, granule)?;
        }
        self.writer.into_inner().flush()?;
        Ok(())
    }
}

/// Writes packets as WAV. Payloads are expected to be decoded audio:
/// interleaved little-endian signed 16-bit PCM.
pub struct WavEncoder {
    spec: WavSpec,
}

impl WavEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            spec: WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        }
    }
}

impl StreamEncoder for WavEncoder {
    fn extension(&self) -> &str {
        "wav"
    }

    fn create(&self, path: &Path) -> Result<Box<dyn AudioWriter>> {
        let writer = WavWriter::create(path, self.spec)
            .with_context(|| format!("Failed to create {:?}", path))?;
        Ok(Box::new(WavFileWriter {
            writer,
            frame_bytes: 2 * usize::from(self.spec.channels.max(1)),
        }))
    }
}

struct WavFileWriter {
    writer: WavWriter<BufWriter<File>>,
    frame_bytes: usize,
}

impl AudioWriter for WavFileWriter {
    fn write(&mut self, packet: &AudioPacket) -> Result<()> {
        // hound refuses to finalize a partial frame, so trailing bytes that do
        // not make up a whole frame are dropped.
        for frame in packet.payload.chunks_exact(self.frame_bytes) {
            for sample in frame.chunks_exact(2) {
                self.writer
                    .write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
            }
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}
