//! In-process collaborators: frame lists held in memory, a raw RGBA video
//! "codec", a 16-bit PCM audio "codec", and a tagged chunk container.
//!
//! They exist so the pipeline can run end to end without native codecs, and
//! so tests can assert on exactly what the pipeline submitted.

use std::collections::BTreeMap;

use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    AudioEncoder, AudioEncoderConfig, ComponentRenderer, EncodedChunk, FrameSource, MediaError,
    MediaLibrary, Muxer, Raster, RenderError, RenderProps, VideoEncoder, VideoEncoderConfig,
    blend_over, parse_color,
};
use crate::{
    audio::DecodedAudio,
    model::{MediaSource, PropDefinition, PropKind, PropValue},
};

pub const RAW_VIDEO_CODEC: &str = "raw-rgba";
pub const PCM_AUDIO_CODEC: &str = "pcm-s16le";
pub const CONTAINER_MAGIC: &[u8; 8] = b"CUTLANE1";

const VIDEO_TAG: u8 = b'V';
const AUDIO_TAG: u8 = b'A';

/// Frames decoded up front; seeks land on the frame containing the target.
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    frames: Vec<Raster>,
    fps: f64,
    position: usize,
}

impl MemoryFrameSource {
    #[must_use]
    pub fn new(frames: Vec<Raster>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            position: 0,
        }
    }

    #[must_use]
    pub fn still(raster: Raster) -> Self {
        Self::new(vec![raster], 0.0)
    }
}

impl FrameSource for MemoryFrameSource {
    fn natural_size(&self) -> (u32, u32) {
        self.frames.first().map_or((0, 0), Raster::size)
    }

    fn seek(&mut self, time: f64) -> Result<f64, MediaError> {
        if self.frames.is_empty() {
            return Err(MediaError::Seek {
                target: time,
                reason: "source has no frames".to_string(),
            });
        }
        if self.fps <= 0.0 {
            self.position = 0;
            return Ok(time);
        }
        let index = crate::time::seconds_to_frame(time, self.fps) as usize;
        self.position = index.min(self.frames.len() - 1);
        Ok(self.position as f64 / self.fps)
    }

    fn current_frame(&mut self) -> Result<Raster, MediaError> {
        self.frames
            .get(self.position)
            .cloned()
            .ok_or_else(|| MediaError::Decode(format!("no frame at index {}", self.position)))
    }
}

#[derive(Debug, Clone)]
enum MemoryMedia {
    Frames { frames: Vec<Raster>, fps: f64 },
    Audio(DecodedAudio),
}

/// Media keyed by source id. Video media may carry both frames and audio.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    entries: BTreeMap<Uuid, Vec<MemoryMedia>>,
}

impl MemoryLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_frames(&mut self, media_id: Uuid, frames: Vec<Raster>, fps: f64) {
        self.entries
            .entry(media_id)
            .or_default()
            .push(MemoryMedia::Frames { frames, fps });
    }

    pub fn insert_still(&mut self, media_id: Uuid, raster: Raster) {
        self.insert_frames(media_id, vec![raster], 0.0);
    }

    pub fn insert_audio(&mut self, media_id: Uuid, audio: DecodedAudio) {
        self.entries
            .entry(media_id)
            .or_default()
            .push(MemoryMedia::Audio(audio));
    }
}

impl MediaLibrary for MemoryLibrary {
    fn open_frame_source(&self, media: &MediaSource) -> Result<Box<dyn FrameSource>, MediaError> {
        self.entries
            .get(&media.id)
            .and_then(|entries| {
                entries.iter().find_map(|entry| match entry {
                    MemoryMedia::Frames { frames, fps } => {
                        Some(MemoryFrameSource::new(frames.clone(), *fps))
                    }
                    MemoryMedia::Audio(_) => None,
                })
            })
            .map(|source| Box::new(source) as Box<dyn FrameSource>)
            .ok_or_else(|| MediaError::Unavailable {
                media_id: media.id,
                reason: "no frames registered".to_string(),
            })
    }

    fn load_audio(&self, media: &MediaSource) -> Result<Option<DecodedAudio>, MediaError> {
        Ok(self.entries.get(&media.id).and_then(|entries| {
            entries.iter().find_map(|entry| match entry {
                MemoryMedia::Audio(audio) => Some(audio.clone()),
                MemoryMedia::Frames { .. } => None,
            })
        }))
    }
}

/// Stores each frame's RGBA bytes verbatim.
#[derive(Debug, Clone, Default)]
pub struct RawVideoEncoder {
    config: Option<VideoEncoderConfig>,
    frames_encoded: u64,
}

impl RawVideoEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), MediaError> {
        if config.codec != RAW_VIDEO_CODEC {
            return Err(MediaError::Encode(format!(
                "unsupported video codec `{}`",
                config.codec
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &Raster,
        timestamp: f64,
        is_key: bool,
    ) -> Result<Vec<EncodedChunk>, MediaError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| MediaError::Encode("encoder used before configure".to_string()))?;
        if frame.size() != (config.width, config.height) {
            return Err(MediaError::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, config.width, config.height
            )));
        }
        self.frames_encoded += 1;
        Ok(vec![EncodedChunk {
            timestamp,
            duration: 1.0 / config.fps,
            is_key,
            data: frame.pixels.clone(),
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncodedChunk>, MediaError> {
        debug!(frames = self.frames_encoded, "raw video encoder flushed");
        Ok(Vec::new())
    }
}

/// Interleaved float samples to little-endian signed 16-bit.
#[derive(Debug, Clone, Default)]
pub struct PcmAudioEncoder {
    config: Option<AudioEncoderConfig>,
}

impl PcmAudioEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioEncoder for PcmAudioEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), MediaError> {
        if config.codec != PCM_AUDIO_CODEC {
            return Err(MediaError::Encode(format!(
                "unsupported audio codec `{}`",
                config.codec
            )));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, samples: &[f32], timestamp: f64) -> Result<Vec<EncodedChunk>, MediaError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| MediaError::Encode("encoder used before configure".to_string()))?;
        let channels = usize::from(config.channels.max(1));
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            data.extend_from_slice(&value.to_le_bytes());
        }
        Ok(vec![EncodedChunk {
            timestamp,
            duration: (samples.len() / channels) as f64 / f64::from(config.sample_rate.max(1)),
            is_key: true,
            data,
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncodedChunk>, MediaError> {
        Ok(Vec::new())
    }
}

/// One record read back from a [`ChunkMuxer`] container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerChunk {
    pub is_video: bool,
    pub chunk: EncodedChunk,
}

/// Writes `CUTLANE1` followed by tagged records:
/// `tag:u8 key:u8 timestamp:f64 duration:f64 len:u32 data`, all little-endian.
#[derive(Debug, Clone, Default)]
pub struct ChunkMuxer {
    video: Vec<EncodedChunk>,
    audio: Vec<EncodedChunk>,
    finalized: bool,
}

impl ChunkMuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads records back, in file order.
    pub fn parse(bytes: &[u8]) -> Result<Vec<ContainerChunk>, MediaError> {
        let body = bytes
            .strip_prefix(CONTAINER_MAGIC.as_slice())
            .ok_or_else(|| MediaError::Container("missing container magic".to_string()))?;
        let mut cursor = body;
        let mut chunks = Vec::new();
        while !cursor.is_empty() {
            let (header, rest) = split(cursor, 22)?;
            let tag = header[0];
            let is_key = header[1] != 0;
            let timestamp = f64::from_le_bytes(array(&header[2..10])?);
            let duration = f64::from_le_bytes(array(&header[10..18])?);
            let len = u32::from_le_bytes(array(&header[18..22])?) as usize;
            let (data, rest) = split(rest, len)?;
            chunks.push(ContainerChunk {
                is_video: tag == VIDEO_TAG,
                chunk: EncodedChunk {
                    timestamp,
                    duration,
                    is_key,
                    data: data.to_vec(),
                },
            });
            cursor = rest;
        }
        Ok(chunks)
    }
}

fn split(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8]), MediaError> {
    if bytes.len() < at {
        return Err(MediaError::Container("truncated record".to_string()));
    }
    Ok(bytes.split_at(at))
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], MediaError> {
    bytes
        .try_into()
        .map_err(|_| MediaError::Container("malformed record header".to_string()))
}

fn write_record(out: &mut Vec<u8>, tag: u8, chunk: &EncodedChunk) -> Result<(), MediaError> {
    let len = u32::try_from(chunk.data.len())
        .map_err(|_| MediaError::Container("chunk larger than 4 GiB".to_string()))?;
    out.push(tag);
    out.push(u8::from(chunk.is_key));
    out.extend_from_slice(&chunk.timestamp.to_le_bytes());
    out.extend_from_slice(&chunk.duration.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&chunk.data);
    Ok(())
}

impl Muxer for ChunkMuxer {
    fn add_video_chunk(&mut self, chunk: EncodedChunk) -> Result<(), MediaError> {
        if let Some(last) = self.video.last()
            && chunk.timestamp <= last.timestamp
        {
            return Err(MediaError::Container(format!(
                "video chunk at {:.6}s is not after {:.6}s",
                chunk.timestamp, last.timestamp
            )));
        }
        self.video.push(chunk);
        Ok(())
    }

    fn add_audio_chunk(&mut self, chunk: EncodedChunk) -> Result<(), MediaError> {
        self.audio.push(chunk);
        Ok(())
    }

    /// Interleaves both streams by timestamp, video first on ties.
    #[instrument(skip(self), fields(video = self.video.len(), audio = self.audio.len()))]
    fn finalize(&mut self) -> Result<Vec<u8>, MediaError> {
        if self.finalized {
            return Err(MediaError::Container("container already finalized".to_string()));
        }
        self.finalized = true;

        let mut records: Vec<(u8, &EncodedChunk)> = self
            .video
            .iter()
            .map(|chunk| (VIDEO_TAG, chunk))
            .chain(self.audio.iter().map(|chunk| (AUDIO_TAG, chunk)))
            .collect();
        records.sort_by(|left, right| {
            left.1
                .timestamp
                .total_cmp(&right.1.timestamp)
                .then_with(|| right.0.cmp(&left.0))
        });

        let mut out = CONTAINER_MAGIC.to_vec();
        for (tag, chunk) in records {
            write_record(&mut out, tag, chunk)?;
        }
        debug!(bytes = out.len(), "container finalized");
        Ok(out)
    }
}

pub const TITLE_CARD_ID: &str = "title-card";

/// Solid card with an optional background image and a progress bar along
/// the bottom edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleCardRenderer;

impl TitleCardRenderer {
    #[must_use]
    pub fn inputs() -> Vec<PropDefinition> {
        vec![
            PropDefinition::new(
                "title",
                PropKind::String,
                PropValue::Text("Untitled".to_string()),
            ),
            PropDefinition::new(
                "color",
                PropKind::Color,
                PropValue::Color("#202040".to_string()),
            ),
            PropDefinition::new(
                "bar_color",
                PropKind::Color,
                PropValue::Color("#f0f0f0".to_string()),
            ),
            PropDefinition::new("background", PropKind::Media, PropValue::Media(None)),
        ]
    }
}

impl ComponentRenderer for TitleCardRenderer {
    fn content_id(&self) -> &str {
        TITLE_CARD_ID
    }

    fn declared_inputs(&self) -> Vec<PropDefinition> {
        Self::inputs()
    }

    fn render(&self, props: &RenderProps) -> Result<Raster, RenderError> {
        let color = props
            .text("color")
            .map_or(Some([32, 32, 64, 255]), parse_color)
            .ok_or_else(|| RenderError::Failed("color is not a hex color".to_string()))?;
        let bar = props
            .text("bar_color")
            .and_then(parse_color)
            .unwrap_or([240, 240, 240, 255]);

        let mut raster = Raster::filled(props.width, props.height, color);
        if let Some(background) = props.media("background") {
            raster.draw_stretched(background);
        }

        let bar_height = (props.height / 20).max(1);
        let bar_width =
            (f64::from(props.width) * props.progress.clamp(0.0, 1.0)).round() as u32;
        for y in props.height.saturating_sub(bar_height)..props.height {
            for x in 0..bar_width.min(props.width) {
                let blended = blend_over(raster.pixel(x, y), bar, 1.0);
                raster.set_pixel(x, y, blended);
            }
        }
        Ok(raster)
    }
}
