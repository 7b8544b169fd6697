use std::{fs, fs::File, io::ErrorKind, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    media::MediaLibrary,
    model::{MediaKind, Project},
    time::{samples_to_seconds, seconds_to_samples},
};

/// Interleaved float samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    #[must_use]
    pub fn silent(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            samples: vec![0.0; frames * usize::from(channels.max(1))],
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        samples_to_seconds(self.frame_count() as u64, self.sample_rate)
    }

    /// Linearly interpolated sample of `channel` at a fractional frame position.
    fn sample_at(&self, position: f64, channel: usize) -> f32 {
        let channels = usize::from(self.channels.max(1));
        let frames = self.frame_count();
        if frames == 0 || position < 0.0 {
            return 0.0;
        }
        let index = position.floor() as usize;
        if index >= frames {
            return 0.0;
        }
        let channel = channel.min(channels - 1);
        let current = self.samples[index * channels + channel];
        let next = if index + 1 < frames {
            self.samples[(index + 1) * channels + channel]
        } else {
            current
        };
        let fraction = (position - index as f64) as f32;
        current + (next - current) * fraction
    }
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {}", path.display()))?;
    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);
    let mut channels = track
        .codec_params
        .channels
        .map_or(2, |value| value.count() as u16);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!(
                    "audio stream reset required for {}",
                    path.display()
                ));
            }
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!(
            "decoded zero samples from {}",
            path.display()
        ));
    }

    debug!(
        sample_rate,
        channels,
        samples = samples.len(),
        "audio decode complete"
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

/// One stretch of source audio scheduled on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPlacement {
    pub clip_id: Uuid,
    pub media_id: Uuid,
    /// Timeline second the stretch starts at.
    pub timeline_start: f64,
    /// Source second aligned with `timeline_start`.
    pub source_offset: f64,
    pub duration: f64,
}

/// Audio-bearing clips on unmuted tracks, plus audio media referenced by
/// component inputs, which play for the component clip's span.
#[must_use]
pub fn collect_placements(project: &Project) -> Vec<AudioPlacement> {
    let mut placements = Vec::new();
    for track in project.tracks.iter().filter(|track| !track.muted) {
        for clip in project.clips_on_track(track.id) {
            if clip.kind.carries_audio() {
                placements.push(AudioPlacement {
                    clip_id: clip.id,
                    media_id: clip.media_id,
                    timeline_start: clip.start_time,
                    source_offset: clip.trim_start,
                    duration: clip.duration,
                });
            } else if clip.kind == MediaKind::Component {
                for reference in clip.props.values().filter_map(|value| value.media_ref()) {
                    let Some(media) = project.media_source(reference) else {
                        continue;
                    };
                    if media.kind.carries_audio() {
                        placements.push(AudioPlacement {
                            clip_id: clip.id,
                            media_id: media.id,
                            timeline_start: clip.start_time,
                            source_offset: clip.trim_start,
                            duration: clip.duration,
                        });
                    }
                }
            }
        }
    }
    placements
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPlacement {
    pub clip_id: Uuid,
    pub media_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mixdown {
    pub audio: DecodedAudio,
    pub placements: usize,
    pub skipped: Vec<SkippedPlacement>,
}

/// Renders every placement into one buffer covering the project length.
/// Sources are resampled linearly and mapped onto the output channels; a
/// placement whose audio cannot be loaded is skipped, not fatal.
#[instrument(skip(project, library), fields(project_id = %project.id, sample_rate, channels))]
pub fn mix_project(
    project: &Project,
    library: &dyn MediaLibrary,
    sample_rate: u32,
    channels: u16,
) -> Mixdown {
    let sample_rate = sample_rate.max(1);
    let out_channels = usize::from(channels.max(1));
    let total = seconds_to_samples(project.total_duration(), sample_rate) as usize;
    let mut audio = DecodedAudio::silent(sample_rate, channels.max(1), total);
    let placements = collect_placements(project);
    let mut skipped = Vec::new();
    let mut mixed = 0;

    for placement in &placements {
        let Some(media) = project.media_source(placement.media_id) else {
            continue;
        };
        let source = match library.load_audio(media) {
            Ok(Some(source)) if source.sample_rate > 0 && !source.samples.is_empty() => source,
            Ok(_) => {
                debug!(media_id = %media.id, "media has no audio");
                continue;
            }
            Err(error) => {
                warn!(clip_id = %placement.clip_id, media_id = %media.id, %error, "audio skipped");
                skipped.push(SkippedPlacement {
                    clip_id: placement.clip_id,
                    media_id: media.id,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let start = seconds_to_samples(placement.timeline_start, sample_rate) as usize;
        let length = seconds_to_samples(placement.duration, sample_rate) as usize;
        let end = (start + length).min(total);
        let ratio = f64::from(source.sample_rate) / f64::from(sample_rate);
        let source_start = placement.source_offset * f64::from(source.sample_rate);
        let source_channels = usize::from(source.channels.max(1));

        for frame in start..end {
            let position = source_start + (frame - start) as f64 * ratio;
            for channel in 0..out_channels {
                let value = if out_channels == 1 && source_channels > 1 {
                    (0..source_channels)
                        .map(|source_channel| source.sample_at(position, source_channel))
                        .sum::<f32>()
                        / source_channels as f32
                } else {
                    source.sample_at(position, channel)
                };
                audio.samples[frame * out_channels + channel] += value;
            }
        }
        mixed += 1;
    }

    for sample in &mut audio.samples {
        *sample = sample.clamp(-1.0, 1.0);
    }

    info!(
        frames = total,
        placements = mixed,
        skipped = skipped.len(),
        "audio mixdown complete"
    );
    Mixdown {
        audio,
        placements: mixed,
        skipped,
    }
}

/// Splits interleaved audio into chunks of `chunk_frames` frames, each with
/// its sample-accurate start time.
pub fn chunks(audio: &DecodedAudio, chunk_frames: usize) -> impl Iterator<Item = (f64, &[f32])> {
    let channels = usize::from(audio.channels.max(1));
    let sample_rate = audio.sample_rate;
    audio
        .samples
        .chunks(chunk_frames.max(1) * channels)
        .enumerate()
        .map(move |(index, chunk)| {
            let first_frame = (index * chunk_frames.max(1)) as u64;
            (samples_to_seconds(first_frame, sample_rate), chunk)
        })
}

#[instrument(skip(audio), fields(path = %path.display(), sample_rate = audio.sample_rate, channels = audio.channels))]
pub fn write_wav(audio: &DecodedAudio, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create wav output directory: {}",
                parent.display()
            )
        })?;
    }

    let spec = hound::WavSpec {
        channels: audio.channels.max(1),
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;
    for sample in &audio.samples {
        let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(quantized)
            .context("failed to write wav sample")?;
    }
    writer.finalize().context("failed to finalize wav file")?;
    info!("wav mixdown written");
    Ok(())
}
