use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    editing::{DEFAULT_DROP_EDGE_FRACTION, DEFAULT_SNAP_THRESHOLD_PX, DragLayout, SnapSettings},
    export::ExportSettings,
};

pub const CONFIG_FILE_NAME: &str = "cutlane.config.toml";
pub const CONFIG_PATH_ENV: &str = "CUTLANE_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CutlaneConfig {
    pub export: ExportConfig,
    pub editing: EditingConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate: u32,
    pub audio_chunk_frames: usize,
    pub keyframe_interval_seconds: f64,
    pub seek_tolerance_seconds: f64,
    pub yield_every_frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EditingConfig {
    pub snap_enabled: bool,
    pub snap_threshold_px: f64,
    pub default_zoom_px_per_second: f64,
    pub drop_edge_fraction: f64,
    pub track_row_height_px: f64,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    /// Compact log lines on stdout next to the JSON file.
    pub stdout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let settings = ExportSettings::default();
        Self {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            bitrate: settings.bitrate,
            audio_sample_rate: settings.audio_sample_rate,
            audio_channels: settings.audio_channels,
            audio_bitrate: settings.audio_bitrate,
            audio_chunk_frames: settings.audio_chunk_frames,
            keyframe_interval_seconds: settings.keyframe_interval_seconds,
            seek_tolerance_seconds: settings.seek_tolerance,
            yield_every_frames: settings.yield_every_frames,
        }
    }
}

impl Default for EditingConfig {
    fn default() -> Self {
        Self {
            snap_enabled: true,
            snap_threshold_px: DEFAULT_SNAP_THRESHOLD_PX,
            default_zoom_px_per_second: 100.0,
            drop_edge_fraction: DEFAULT_DROP_EDGE_FRACTION,
            track_row_height_px: 48.0,
            history_limit: 200,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: crate::diagnostics::DEFAULT_FILTER.to_string(),
            trace_file_prefix: "cutlane".to_string(),
            stdout: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl ExportConfig {
    #[must_use]
    pub fn settings(&self) -> ExportSettings {
        ExportSettings {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: self.bitrate,
            audio_sample_rate: self.audio_sample_rate,
            audio_channels: self.audio_channels,
            audio_bitrate: self.audio_bitrate,
            audio_chunk_frames: self.audio_chunk_frames,
            keyframe_interval_seconds: self.keyframe_interval_seconds,
            seek_tolerance: self.seek_tolerance_seconds,
            yield_every_frames: self.yield_every_frames,
            ..ExportSettings::default()
        }
    }
}

impl EditingConfig {
    #[must_use]
    pub fn snap(&self) -> SnapSettings {
        SnapSettings {
            enabled: self.snap_enabled,
            threshold_px: self.snap_threshold_px,
            zoom: self.default_zoom_px_per_second,
        }
    }

    #[must_use]
    pub fn drag_layout(&self) -> DragLayout {
        DragLayout {
            row_height: self.track_row_height_px,
            edge_fraction: self.drop_edge_fraction,
            snap: self.snap(),
        }
    }
}

impl CutlaneConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: CutlaneConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Loads the discovered config, falling back to defaults when none exists
    /// or it cannot be parsed.
    #[must_use]
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "using default config");
                Self::default()
            }
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config: CutlaneConfig = toml::from_str(
            r#"
            [export]
            fps = 24.0
            width = 640

            [editing]
            snap_threshold_px = 12.0
            "#,
        )
        .expect("config should parse");

        let settings = config.export.settings();
        assert_eq!(settings.width, 640);
        assert_eq!(settings.height, 720);
        assert!((settings.fps - 24.0).abs() < f64::EPSILON);
        assert!((config.editing.snap().threshold_px - 12.0).abs() < f64::EPSILON);
        assert_eq!(config.paths.logs_dir, PathBuf::from("logs"));
    }

    #[test]
    fn from_path_reads_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[diagnostics]\ntrace_file_prefix = \"render-farm\"\n").expect("write");
        let config = CutlaneConfig::from_path(&path).expect("load");
        assert_eq!(config.diagnostics.trace_file_prefix, "render-farm");
        assert!(config.diagnostics.stdout);
        assert_eq!(config.export, ExportConfig::default());
    }
}
