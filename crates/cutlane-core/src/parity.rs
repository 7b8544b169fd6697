use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    audio,
    export::ExportSettings,
    media::{MediaLibrary, RendererRegistry},
    model::Project,
    render::Compositor,
    time::{frame_to_seconds, total_frames},
};

const PARITY_SCHEMA_VERSION: u32 = 1;

/// Fingerprints of everything an export derives from a project, minus codec
/// output. Two runs over the same project and settings must match exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub project_id: String,
    pub track_count: usize,
    pub clip_count: usize,
    pub frame_count: u64,
    pub render_failures: usize,
    pub project_hash: String,
    pub plan_hash: String,
    pub pixel_hash: String,
    pub audio_hash: String,
}

#[instrument(skip_all, fields(project_id = %project.id, fps = settings.fps))]
pub fn generate_parity_report(
    project: &Project,
    library: &dyn MediaLibrary,
    registry: &RendererRegistry,
    settings: &ExportSettings,
) -> Result<ParityReport> {
    let project_bytes = serde_json::to_vec(project).context("failed to serialize project")?;
    let frame_count = total_frames(project.total_duration(), settings.fps);

    let mut plan_hasher = Sha256::new();
    let mut pixel_hasher = Sha256::new();
    let mut compositor = Compositor::new(
        library,
        registry,
        settings.width,
        settings.height,
        settings.seek_tolerance,
    );
    for frame in 0..frame_count {
        let (plan, raster) = compositor.render(project, frame_to_seconds(frame, settings.fps));
        let plan_bytes = serde_json::to_vec(&plan).context("failed to serialize frame plan")?;
        plan_hasher.update(&plan_bytes);
        pixel_hasher.update(&raster.pixels);
    }
    let render_failures = compositor.finish().len();

    let mixdown = audio::mix_project(
        project,
        library,
        settings.audio_sample_rate,
        settings.audio_channels,
    );
    let mut audio_bytes = Vec::with_capacity(mixdown.audio.samples.len() * 2);
    for sample in &mixdown.audio.samples {
        let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        audio_bytes.extend_from_slice(&quantized.to_le_bytes());
    }

    debug!(frame_count, render_failures, "parity fingerprints computed");
    Ok(ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        project_id: project.id.to_string(),
        track_count: project.tracks.len(),
        clip_count: project.clips.len(),
        frame_count,
        render_failures,
        project_hash: hash_hex(&project_bytes),
        plan_hash: format!("{:x}", plan_hasher.finalize()),
        pixel_hash: format!("{:x}", pixel_hasher.finalize()),
        audio_hash: hash_hex(&audio_bytes),
    })
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
