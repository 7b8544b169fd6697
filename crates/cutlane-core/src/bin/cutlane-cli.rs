use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cutlane_core::{
    CancelToken, CutlaneConfig, ExportCollaborators, ExportObserver, ExportState, MediaLibrary,
    audio::write_wav,
    export::export_to_file,
    fixtures::{demo_library, demo_project, demo_registry},
    generate_parity_report, init_tracing,
    media::{
        disk::DiskAudioLibrary,
        memory::{ChunkMuxer, PcmAudioEncoder, RawVideoEncoder},
    },
    parity::write_parity_report,
};

#[derive(Debug, Parser)]
#[command(name = "cutlane-cli")]
#[command(about = "Headless tools for Cutlane export and parity workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the configured log directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Renders the built-in demo timeline to a container and a WAV mixdown.
    DemoExport {
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[arg(long)]
        fps: Option<f64>,

        /// Decodes audio media from files under this directory when present.
        #[arg(long)]
        media_root: Option<PathBuf>,
    },
    /// Fingerprints the demo timeline's frame plans, pixels and audio.
    ParityReport {
        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,
    },
}

struct LogObserver;

impl ExportObserver for LogObserver {
    fn state_changed(&mut self, state: &ExportState) {
        if !matches!(state, ExportState::Rendering { .. }) {
            tracing::info!(?state, "export state");
        }
    }

    fn progress(&mut self, percent: u8) {
        tracing::debug!(percent, "export progress");
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CutlaneConfig::load_or_default();
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing(&log_dir, &config.diagnostics)?;

    match cli.command {
        Commands::DemoExport {
            output_dir,
            width,
            height,
            fps,
            media_root,
        } => {
            let output_dir = output_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            std::fs::create_dir_all(&output_dir).with_context(|| {
                format!("failed to create output directory {}", output_dir.display())
            })?;

            let mut settings = config.export.settings();
            settings.width = width.unwrap_or(settings.width);
            settings.height = height.unwrap_or(settings.height);
            settings.fps = fps.unwrap_or(settings.fps);

            let project = demo_project();
            let library: Box<dyn MediaLibrary> = match media_root {
                Some(root) => Box::new(DiskAudioLibrary::new(root, demo_library())),
                None => Box::new(demo_library()),
            };
            let registry = demo_registry();
            let mut video_encoder = RawVideoEncoder::new();
            let mut audio_encoder = PcmAudioEncoder::new();
            let mut muxer = ChunkMuxer::new();
            let container_path = output_dir.join("demo.cutlane");

            let output = export_to_file(
                &project,
                &settings,
                ExportCollaborators {
                    library: library.as_ref(),
                    registry: &registry,
                    video_encoder: &mut video_encoder,
                    audio_encoder: &mut audio_encoder,
                    muxer: &mut muxer,
                },
                &CancelToken::new(),
                &mut LogObserver,
                &container_path,
            )?;

            if let Some(mixdown) = &output.mixdown {
                write_wav(mixdown, &output_dir.join("demo.wav"))?;
            }
            let report_json = serde_json::to_string_pretty(&output.report)
                .context("failed to encode export report")?;
            std::fs::write(output_dir.join("demo.report.json"), report_json)
                .context("failed to write export report")?;
            tracing::info!(
                path = %container_path.display(),
                frames = output.report.frames,
                "demo export written"
            );
        }
        Commands::ParityReport { output } => {
            let settings = config.export.settings();
            let report = generate_parity_report(
                &demo_project(),
                &demo_library(),
                &demo_registry(),
                &settings,
            )?;
            write_parity_report(&output, &report)?;
            tracing::info!(path = %output.display(), "parity report generated");
        }
    }

    Ok(())
}
