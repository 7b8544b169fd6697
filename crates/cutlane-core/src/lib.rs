pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod editing;
pub mod engine;
pub mod export;
pub mod fixtures;
pub mod history;
pub mod keyframes;
pub mod media;
pub mod model;
pub mod parity;
pub mod render;
pub mod resolve;
pub mod time;

pub use audio::{DecodedAudio, Mixdown, decode_audio_file, mix_project, write_wav};
pub use config::CutlaneConfig;
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use editing::{
    ClipDrag, DropOutcome, DropRequest, DropZone, PointerEvent, SnapSettings, TrimEdge,
    TrimRequest,
};
pub use engine::{ClipPatch, Engine, EngineError, KeyframePatch, PlaceClipRequest, TrackPatch};
pub use export::{
    CancelToken, ExportCollaborators, ExportError, ExportObserver, ExportOutput, ExportReport,
    ExportSettings, ExportState, export_project, export_to_file,
};
pub use history::History;
pub use media::{
    ComponentRenderer, FrameSource, MediaLibrary, Muxer, Raster, RenderError, RendererRegistry,
    VideoEncoder,
};
pub use model::{
    AnimatableProp, Clip, Easing, Keyframe, Mask, MaskShape, MediaKind, MediaSource, Project,
    PropDefinition, PropKind, PropValue, Track, Transform,
};
pub use parity::{ParityReport, generate_parity_report};
pub use render::{FramePlan, LayerPlan, compose_frame, plan_frame};
pub use resolve::{ClipGeometry, ResolvedTransform, resolve_mask, resolve_transform};
