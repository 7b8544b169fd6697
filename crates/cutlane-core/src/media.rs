//! Collaborator seams the renderer and export pipeline drive: frame sources,
//! component renderers, encoders and the muxer. Concrete codecs live outside
//! the core; [`memory`] carries in-process implementations and [`disk`]
//! decodes audio files.

pub mod disk;
pub mod memory;

use std::{
    collections::{BTreeMap, BTreeSet},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    audio::DecodedAudio,
    model::{MediaKind, MediaSource, PropDefinition, PropValue},
};

/// Default distance a landed seek may sit from its target before a retry.
pub const DEFAULT_SEEK_TOLERANCE: f64 = 0.02;

/// Straight-alpha RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Raster {
    /// Fully transparent raster.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let offset = self.offset(x, y);
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        self.pixels[offset..offset + 4].copy_from_slice(&rgba);
    }

    /// Nearest-neighbour lookup for a point in a `box_width` × `box_height`
    /// space stretched over this raster.
    #[must_use]
    pub fn sample(&self, u: f64, v: f64, box_width: f64, box_height: f64) -> [u8; 4] {
        if self.is_empty() || box_width <= 0.0 || box_height <= 0.0 {
            return [0, 0, 0, 0];
        }
        let x = (u / box_width * f64::from(self.width)).floor();
        let y = (v / box_height * f64::from(self.height)).floor();
        if x < 0.0 || y < 0.0 {
            return [0, 0, 0, 0];
        }
        self.pixel(x as u32, y as u32)
    }

    /// Draws `source` stretched over the whole raster, source-over.
    pub fn draw_stretched(&mut self, source: &Raster) {
        let (width, height) = (f64::from(self.width), f64::from(self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                let texel = source.sample(f64::from(x) + 0.5, f64::from(y) + 0.5, width, height);
                let blended = blend_over(self.pixel(x, y), texel, 1.0);
                self.set_pixel(x, y, blended);
            }
        }
    }
}

/// Source-over blend of straight-alpha `top` onto `bottom`, with `top`'s
/// alpha scaled by `coverage`.
#[must_use]
pub fn blend_over(bottom: [u8; 4], top: [u8; 4], coverage: f64) -> [u8; 4] {
    let top_alpha = f64::from(top[3]) / 255.0 * coverage.clamp(0.0, 1.0);
    if top_alpha <= 0.0 {
        return bottom;
    }
    let bottom_alpha = f64::from(bottom[3]) / 255.0;
    let out_alpha = top_alpha + bottom_alpha * (1.0 - top_alpha);
    if out_alpha <= 0.0 {
        return [0, 0, 0, 0];
    }
    let channel = |index: usize| {
        let value = (f64::from(top[index]) * top_alpha
            + f64::from(bottom[index]) * bottom_alpha * (1.0 - top_alpha))
            / out_alpha;
        value.round().clamp(0.0, 255.0) as u8
    };
    [
        channel(0),
        channel(1),
        channel(2),
        (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media {media_id} is not available: {reason}")]
    Unavailable { media_id: Uuid, reason: String },
    #[error("seek to {target:.3}s failed: {reason}")]
    Seek { target: f64, reason: String },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encoder failed: {0}")]
    Encode(String),
    #[error("container failed: {0}")]
    Container(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderError {
    #[error("no renderer registered for `{0}`")]
    MissingRenderer(String),
    #[error("renderer failed: {0}")]
    Failed(String),
    #[error("renderer panicked: {0}")]
    Panicked(String),
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),
}

/// Decoded frames of one video or still source.
pub trait FrameSource: Send {
    fn natural_size(&self) -> (u32, u32);

    /// Seeks and blocks until a frame is committed, returning where it landed.
    fn seek(&mut self, time: f64) -> Result<f64, MediaError>;

    fn current_frame(&mut self) -> Result<Raster, MediaError>;
}

/// A media reference handed to a component, already turned into pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedMedia {
    pub media_id: Uuid,
    pub kind: MediaKind,
    pub content: Option<Raster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ResolvedProp {
    Value(PropValue),
    Media(NestedMedia),
    /// A media input with no target, or one whose target is gone.
    Empty,
}

/// Everything a component sees for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProps {
    pub current_time: f64,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub progress: f64,
    pub values: BTreeMap<String, ResolvedProp>,
}

impl RenderProps {
    #[must_use]
    pub fn new(current_time: f64, duration: f64, width: u32, height: u32) -> Self {
        let progress = if duration > 0.0 {
            current_time / duration
        } else {
            0.0
        };
        Self {
            current_time,
            duration,
            width,
            height,
            progress,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ResolvedProp::Value(PropValue::Text(value) | PropValue::Color(value))) => {
                Some(value)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn media(&self, name: &str) -> Option<&Raster> {
        match self.values.get(name) {
            Some(ResolvedProp::Media(nested)) => nested.content.as_ref(),
            _ => None,
        }
    }
}

/// Procedural content producer keyed by a stable content id.
pub trait ComponentRenderer: Send + Sync {
    fn content_id(&self) -> &str;

    fn declared_inputs(&self) -> Vec<PropDefinition>;

    fn render(&self, props: &RenderProps) -> Result<Raster, RenderError>;
}

#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: BTreeMap<String, Arc<dyn ComponentRenderer>>,
}

impl std::fmt::Debug for RendererRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RendererRegistry")
            .field("content_ids", &self.renderers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RendererRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, renderer: Arc<dyn ComponentRenderer>) {
        let content_id = renderer.content_id().to_string();
        if self.renderers.insert(content_id.clone(), renderer).is_some() {
            debug!(%content_id, "component renderer replaced");
        }
    }

    #[must_use]
    pub fn get(&self, content_id: &str) -> Option<Arc<dyn ComponentRenderer>> {
        self.renderers.get(content_id).cloned()
    }

    #[must_use]
    pub fn declared_inputs(&self, content_id: &str) -> Option<Vec<PropDefinition>> {
        self.renderers
            .get(content_id)
            .map(|renderer| renderer.declared_inputs())
    }

    /// A component media source carrying the renderer's declared inputs.
    #[must_use]
    pub fn media_source(&self, name: &str, content_id: &str) -> Option<MediaSource> {
        let inputs = self.declared_inputs(content_id)?;
        Some(MediaSource::component(name, content_id, inputs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub timestamp: f64,
    pub duration: f64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEncoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

pub trait VideoEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> Result<(), MediaError>;

    fn encode(
        &mut self,
        frame: &Raster,
        timestamp: f64,
        is_key: bool,
    ) -> Result<Vec<EncodedChunk>, MediaError>;

    fn flush(&mut self) -> Result<Vec<EncodedChunk>, MediaError>;
}

pub trait AudioEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> Result<(), MediaError>;

    /// `samples` are interleaved across the configured channel count.
    fn encode(&mut self, samples: &[f32], timestamp: f64) -> Result<Vec<EncodedChunk>, MediaError>;

    fn flush(&mut self) -> Result<Vec<EncodedChunk>, MediaError>;
}

pub trait Muxer {
    fn add_video_chunk(&mut self, chunk: EncodedChunk) -> Result<(), MediaError>;

    fn add_audio_chunk(&mut self, chunk: EncodedChunk) -> Result<(), MediaError>;

    fn finalize(&mut self) -> Result<Vec<u8>, MediaError>;
}

/// Opens decoders for the media a project references.
pub trait MediaLibrary {
    /// Frame source for video and image media.
    fn open_frame_source(&self, media: &MediaSource) -> Result<Box<dyn FrameSource>, MediaError>;

    /// Decoded audio for audio-bearing media, `None` when it has no audio.
    fn load_audio(&self, media: &MediaSource) -> Result<Option<DecodedAudio>, MediaError>;
}

/// Per-run decoder cache. Frames are captured one clip at a time; a source
/// is only ever positioned by the clip currently being drawn.
pub struct MediaSession<'a> {
    library: &'a dyn MediaLibrary,
    seek_tolerance: f64,
    sources: BTreeMap<Uuid, Box<dyn FrameSource>>,
    unavailable: BTreeSet<Uuid>,
    seek_misses: u64,
}

impl<'a> MediaSession<'a> {
    #[must_use]
    pub fn new(library: &'a dyn MediaLibrary, seek_tolerance: f64) -> Self {
        Self {
            library,
            seek_tolerance: seek_tolerance.max(0.0),
            sources: BTreeMap::new(),
            unavailable: BTreeSet::new(),
            seek_misses: 0,
        }
    }

    /// Seeks that stayed outside tolerance after their retry.
    #[must_use]
    pub fn seek_misses(&self) -> u64 {
        self.seek_misses
    }

    fn source(&mut self, media: &MediaSource) -> Result<&mut Box<dyn FrameSource>, MediaError> {
        if self.unavailable.contains(&media.id) {
            return Err(MediaError::Unavailable {
                media_id: media.id,
                reason: "failed to open earlier in this run".to_string(),
            });
        }
        if !self.sources.contains_key(&media.id) {
            match self.library.open_frame_source(media) {
                Ok(source) => {
                    self.sources.insert(media.id, source);
                }
                Err(error) => {
                    warn!(media_id = %media.id, %error, "frame source unavailable");
                    self.unavailable.insert(media.id);
                    return Err(error);
                }
            }
        }
        self.sources
            .get_mut(&media.id)
            .ok_or_else(|| MediaError::Unavailable {
                media_id: media.id,
                reason: "frame source missing from cache".to_string(),
            })
    }

    /// Seeks to `time` and returns the committed frame. A landing outside
    /// tolerance is retried once; a second miss keeps whatever was decoded.
    pub fn capture(&mut self, media: &MediaSource, time: f64) -> Result<Raster, MediaError> {
        let tolerance = self.seek_tolerance;
        let mut missed = false;
        {
            let source = self.source(media)?;
            let mut landed = source.seek(time)?;
            if (landed - time).abs() > tolerance {
                debug!(media_id = %media.id, target = time, landed, "seek drifted, retrying");
                landed = source.seek(time)?;
                if (landed - time).abs() > tolerance {
                    warn!(
                        media_id = %media.id,
                        target = time,
                        landed,
                        "seek did not converge, using current frame"
                    );
                    missed = true;
                }
            }
        }
        if missed {
            self.seek_misses += 1;
        }
        self.source(media)?.current_frame()
    }

    /// Drops every open decoder.
    pub fn release(&mut self) {
        let released = self.sources.len();
        self.sources.clear();
        debug!(released, "media session released");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderFailure {
    pub clip_id: Uuid,
    pub time: f64,
    pub error: RenderError,
}

/// Error boundary around per-clip content producers. A clip that fails once
/// is quarantined and contributes nothing for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct ClipSupervisor {
    failures: Vec<RenderFailure>,
    quarantined: BTreeSet<Uuid>,
}

impl ClipSupervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_quarantined(&self, clip_id: Uuid) -> bool {
        self.quarantined.contains(&clip_id)
    }

    #[must_use]
    pub fn failures(&self) -> &[RenderFailure] {
        &self.failures
    }

    #[must_use]
    pub fn into_failures(self) -> Vec<RenderFailure> {
        self.failures
    }

    /// Runs `produce`, turning both errors and panics into an empty
    /// contribution.
    pub fn guard(
        &mut self,
        clip_id: Uuid,
        time: f64,
        produce: impl FnOnce() -> Result<Raster, RenderError>,
    ) -> Option<Raster> {
        if self.is_quarantined(clip_id) {
            return None;
        }
        let outcome = match catch_unwind(AssertUnwindSafe(produce)) {
            Ok(result) => result,
            Err(payload) => Err(RenderError::Panicked(panic_message(payload.as_ref()))),
        };
        match outcome {
            Ok(raster) => Some(raster),
            Err(error) => {
                warn!(%clip_id, time, %error, "clip isolated after render failure");
                self.quarantined.insert(clip_id);
                self.failures.push(RenderFailure {
                    clip_id,
                    time,
                    error,
                });
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Parses `#rrggbb` or `#rrggbbaa`.
#[must_use]
pub fn parse_color(value: &str) -> Option<[u8; 4]> {
    let hex = value.strip_prefix('#')?;
    if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
        return None;
    }
    let channel = |index: usize| u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).ok();
    let alpha = if hex.len() == 8 { channel(3)? } else { 255 };
    Some([channel(0)?, channel(1)?, channel(2)?, alpha])
}
