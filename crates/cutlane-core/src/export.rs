use std::{
    fs,
    io::Write,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    audio::{self, DecodedAudio, SkippedPlacement},
    media::{
        AudioEncoder, AudioEncoderConfig, DEFAULT_SEEK_TOLERANCE, EncodedChunk, MediaError,
        MediaLibrary, Muxer, RenderFailure, RendererRegistry, VideoEncoder, VideoEncoderConfig,
        memory::{PCM_AUDIO_CODEC, RAW_VIDEO_CODEC},
    },
    model::Project,
    render::Compositor,
    time::{frame_to_seconds, keyframe_interval_frames, total_frames},
};

/// Share of the progress range spent rendering frames; the rest covers
/// flushing, mixing and muxing.
const RENDER_PROGRESS_SHARE: f64 = 95.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate: u32,
    /// Frames per chunk handed to the audio encoder.
    pub audio_chunk_frames: usize,
    pub keyframe_interval_seconds: f64,
    pub seek_tolerance: f64,
    /// Frames between cooperative yields to the host; zero never yields.
    pub yield_every_frames: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            bitrate: 8_000_000,
            video_codec: RAW_VIDEO_CODEC.to_string(),
            audio_codec: PCM_AUDIO_CODEC.to_string(),
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_bitrate: 192_000,
            audio_chunk_frames: 1_024,
            keyframe_interval_seconds: 2.0,
            seek_tolerance: DEFAULT_SEEK_TOLERANCE,
            yield_every_frames: 5,
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<(), ExportError> {
        let problem = if self.width == 0 || self.height == 0 {
            Some(format!("resolution {}x{} must be positive", self.width, self.height))
        } else if !self.fps.is_finite() || self.fps <= 0.0 {
            Some(format!("fps {} must be positive", self.fps))
        } else if self.bitrate == 0 {
            Some("bitrate must be positive".to_string())
        } else if self.audio_sample_rate == 0 || self.audio_channels == 0 {
            Some("audio sample rate and channel count must be positive".to_string())
        } else {
            None
        };
        problem.map_or(Ok(()), |problem| Err(ExportError::InvalidSettings(problem)))
    }

    #[must_use]
    pub fn video_config(&self) -> VideoEncoderConfig {
        VideoEncoderConfig {
            codec: self.video_codec.clone(),
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            fps: self.fps,
        }
    }

    #[must_use]
    pub fn audio_config(&self) -> AudioEncoderConfig {
        AudioEncoderConfig {
            codec: self.audio_codec.clone(),
            sample_rate: self.audio_sample_rate,
            channels: self.audio_channels,
            bitrate: self.audio_bitrate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ExportState {
    Initializing,
    Rendering { frame: u64, total_frames: u64 },
    FlushingEncoders,
    MixingAudio,
    Muxing,
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export settings: {0}")]
    InvalidSettings(String),
    #[error("timeline is empty")]
    EmptyTimeline,
    #[error("export cancelled before frame {frame}")]
    Cancelled { frame: u64 },
    #[error("{stage} encoder failed")]
    Encoder {
        stage: &'static str,
        #[source]
        source: MediaError,
    },
    #[error("muxer failed")]
    Muxer(#[source] MediaError),
    #[error("export output failed: {0:#}")]
    Io(#[from] anyhow::Error),
}

/// Cooperative cancellation flag shared with the host.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Host hooks for one export run.
pub trait ExportObserver {
    fn state_changed(&mut self, _state: &ExportState) {}

    fn progress(&mut self, _percent: u8) {}

    /// Called every `yield_every_frames` frames so the host can pump its
    /// event loop or flip the cancel token.
    fn yield_now(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ExportObserver for NullObserver {}

pub struct ExportCollaborators<'a> {
    pub library: &'a dyn MediaLibrary,
    pub registry: &'a RendererRegistry,
    pub video_encoder: &'a mut dyn VideoEncoder,
    pub audio_encoder: &'a mut dyn AudioEncoder,
    pub muxer: &'a mut dyn Muxer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub project_id: Uuid,
    pub frames: u64,
    pub duration_seconds: f64,
    pub video_chunks: usize,
    pub audio_chunks: usize,
    pub audio_placements: usize,
    pub render_failures: Vec<RenderFailure>,
    pub skipped_audio: Vec<SkippedPlacement>,
    pub seek_misses: u64,
    pub container_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub container: Vec<u8>,
    /// Mixed soundtrack, absent when nothing on the timeline carries audio.
    pub mixdown: Option<DecodedAudio>,
    pub report: ExportReport,
}

#[must_use]
pub fn progress_percent(frame: u64, total_frames: u64) -> u8 {
    if total_frames == 0 {
        return 0;
    }
    (frame as f64 / total_frames as f64 * RENDER_PROGRESS_SHARE).round() as u8
}

/// Renders, encodes and muxes `project` into container bytes.
///
/// The project is cloned up front, so edits made while the export runs are
/// never observed. Frames go to the encoder strictly in order. A clip whose
/// content fails is left out and recorded; encoder and muxer failures abort
/// the run. Cancellation is honoured at frame boundaries and yields no output.
#[instrument(skip_all, fields(project_id = %project.id, width = settings.width, height = settings.height, fps = settings.fps))]
pub fn export_project(
    project: &Project,
    settings: &ExportSettings,
    collaborators: ExportCollaborators<'_>,
    cancel: &CancelToken,
    observer: &mut dyn ExportObserver,
) -> Result<ExportOutput, ExportError> {
    let snapshot = project.clone();
    let result = run_export(&snapshot, settings, collaborators, cancel, observer);
    match &result {
        Ok(output) => {
            observer.progress(100);
            observer.state_changed(&ExportState::Done);
            info!(
                frames = output.report.frames,
                bytes = output.report.container_bytes,
                render_failures = output.report.render_failures.len(),
                "export completed"
            );
        }
        Err(ExportError::Cancelled { frame }) => {
            observer.state_changed(&ExportState::Cancelled);
            info!(frame, "export cancelled");
        }
        Err(error) => {
            observer.state_changed(&ExportState::Failed);
            warn!(%error, "export failed");
        }
    }
    result
}

fn run_export(
    project: &Project,
    settings: &ExportSettings,
    collaborators: ExportCollaborators<'_>,
    cancel: &CancelToken,
    observer: &mut dyn ExportObserver,
) -> Result<ExportOutput, ExportError> {
    let ExportCollaborators {
        library,
        registry,
        video_encoder,
        audio_encoder,
        muxer,
    } = collaborators;

    observer.state_changed(&ExportState::Initializing);
    settings.validate()?;
    let duration_seconds = project.total_duration();
    if duration_seconds <= 0.0 {
        return Err(ExportError::EmptyTimeline);
    }
    let frame_total = total_frames(duration_seconds, settings.fps);
    let key_interval = keyframe_interval_frames(settings.keyframe_interval_seconds, settings.fps);
    let has_audio = !audio::collect_placements(project).is_empty();

    video_encoder
        .configure(&settings.video_config())
        .map_err(|source| ExportError::Encoder {
            stage: "video",
            source,
        })?;
    if has_audio {
        audio_encoder
            .configure(&settings.audio_config())
            .map_err(|source| ExportError::Encoder {
                stage: "audio",
                source,
            })?;
    }
    info!(frame_total, key_interval, has_audio, "export initialized");

    let mut compositor = Compositor::new(
        library,
        registry,
        settings.width,
        settings.height,
        settings.seek_tolerance,
    );
    let mut video_chunks: Vec<EncodedChunk> = Vec::new();
    for frame in 0..frame_total {
        if cancel.is_cancelled() {
            compositor.finish();
            return Err(ExportError::Cancelled { frame });
        }
        observer.state_changed(&ExportState::Rendering {
            frame,
            total_frames: frame_total,
        });
        observer.progress(progress_percent(frame, frame_total));

        let time = frame_to_seconds(frame, settings.fps);
        let (plan, raster) = compositor.render(project, time);
        debug!(frame, time, layers = plan.layers.len(), "frame composed");

        let chunks = video_encoder
            .encode(&raster, time, frame % key_interval == 0)
            .map_err(|source| ExportError::Encoder {
                stage: "video",
                source,
            })?;
        video_chunks.extend(chunks);

        if settings.yield_every_frames > 0 && (frame + 1) % settings.yield_every_frames == 0 {
            observer.yield_now();
        }
    }
    let seek_misses = compositor.seek_misses();
    let render_failures = compositor.finish();

    observer.state_changed(&ExportState::FlushingEncoders);
    video_chunks.extend(video_encoder.flush().map_err(|source| ExportError::Encoder {
        stage: "video",
        source,
    })?);

    observer.state_changed(&ExportState::MixingAudio);
    let mut audio_chunks: Vec<EncodedChunk> = Vec::new();
    let mut skipped_audio = Vec::new();
    let mut audio_placements = 0;
    let mixdown = if has_audio {
        let mixdown = audio::mix_project(
            project,
            library,
            settings.audio_sample_rate,
            settings.audio_channels,
        );
        for (timestamp, samples) in audio::chunks(&mixdown.audio, settings.audio_chunk_frames) {
            let encoded = audio_encoder
                .encode(samples, timestamp)
                .map_err(|source| ExportError::Encoder {
                    stage: "audio",
                    source,
                })?;
            audio_chunks.extend(encoded);
        }
        audio_chunks.extend(audio_encoder.flush().map_err(|source| ExportError::Encoder {
            stage: "audio",
            source,
        })?);
        skipped_audio = mixdown.skipped;
        audio_placements = mixdown.placements;
        Some(mixdown.audio)
    } else {
        debug!("no audio-bearing clips, audio encoder skipped");
        None
    };

    observer.state_changed(&ExportState::Muxing);
    let video_count = video_chunks.len();
    let audio_count = audio_chunks.len();
    for chunk in video_chunks {
        muxer.add_video_chunk(chunk).map_err(ExportError::Muxer)?;
    }
    for chunk in audio_chunks {
        muxer.add_audio_chunk(chunk).map_err(ExportError::Muxer)?;
    }
    let container = muxer.finalize().map_err(ExportError::Muxer)?;

    Ok(ExportOutput {
        report: ExportReport {
            project_id: project.id,
            frames: frame_total,
            duration_seconds,
            video_chunks: video_count,
            audio_chunks: audio_count,
            audio_placements,
            render_failures,
            skipped_audio,
            seek_misses,
            container_bytes: container.len(),
        },
        container,
        mixdown,
    })
}

/// Writes container bytes through a temporary file in the target directory
/// so a failed write never leaves a partial artifact at `path`.
#[instrument(skip(bytes), fields(path = %path.display(), bytes = bytes.len()))]
pub fn write_container(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create export output directory: {}",
            parent.display()
        )
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    temp.write_all(bytes)
        .context("failed to write container bytes")?;
    temp.persist(path)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to move container into {}", path.display()))?;
    info!("container written");
    Ok(())
}

/// Runs an export and writes its container to `path` only on success.
pub fn export_to_file(
    project: &Project,
    settings: &ExportSettings,
    collaborators: ExportCollaborators<'_>,
    cancel: &CancelToken,
    observer: &mut dyn ExportObserver,
    path: &Path,
) -> Result<ExportOutput, ExportError> {
    let output = export_project(project, settings, collaborators, cancel, observer)?;
    write_container(path, &output.container)?;
    Ok(output)
}
