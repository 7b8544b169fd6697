//! Frame planning and compositing shared by preview and export.
//!
//! A [`FramePlan`] is the deterministic part of a frame: which clips are
//! visible, in which order, at which local time and with which resolved
//! geometry. [`Compositor`] turns a plan into pixels by pulling content from
//! the media collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::{
    media::{
        ClipSupervisor, MediaLibrary, MediaSession, NestedMedia, Raster, RenderError,
        RenderFailure, RenderProps, RendererRegistry, ResolvedProp, blend_over,
    },
    model::{Clip, Mask, MediaKind, MediaSource, Project, PropValue},
    resolve::{ClipGeometry, ResolvedTransform, mask_coverage, resolve_mask, resolve_transform},
};

pub const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPlan {
    pub clip_id: Uuid,
    pub track_id: Uuid,
    pub media_id: Uuid,
    pub kind: MediaKind,
    /// Track position; larger values draw later.
    pub z: usize,
    pub local_time: f64,
    /// Position inside the source media, trim applied.
    pub source_time: f64,
    pub duration: f64,
    pub transform: ResolvedTransform,
    pub mask: Option<Mask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePlan {
    pub time: f64,
    pub layers: Vec<LayerPlan>,
}

/// Visual clips under `time` on visible tracks, bottom track first.
#[must_use]
pub fn visible_clips(project: &Project, time: f64) -> Vec<(usize, &Clip)> {
    project
        .tracks
        .iter()
        .enumerate()
        .filter(|(_, track)| !track.hidden)
        .flat_map(|(z, track)| {
            project
                .clips_on_track(track.id)
                .into_iter()
                .filter(move |clip| clip.kind.is_visual() && clip.is_active_at(time))
                .map(move |clip| (z, clip))
        })
        .collect()
}

#[must_use]
pub fn plan_frame(project: &Project, time: f64) -> FramePlan {
    let layers = visible_clips(project, time)
        .into_iter()
        .map(|(z, clip)| {
            let local_time = time - clip.start_time;
            LayerPlan {
                clip_id: clip.id,
                track_id: clip.track_id,
                media_id: clip.media_id,
                kind: clip.kind,
                z,
                local_time,
                source_time: clip.trim_start + local_time,
                duration: clip.duration,
                transform: resolve_transform(clip, local_time),
                mask: resolve_mask(clip, local_time),
            }
        })
        .collect();
    FramePlan { time, layers }
}

/// Draws frames at a fixed output size. One instance serves a whole preview
/// session or export run so decoders and clip isolation persist across frames.
pub struct Compositor<'a> {
    registry: &'a RendererRegistry,
    session: MediaSession<'a>,
    supervisor: ClipSupervisor,
    width: u32,
    height: u32,
}

impl<'a> Compositor<'a> {
    #[must_use]
    pub fn new(
        library: &'a dyn MediaLibrary,
        registry: &'a RendererRegistry,
        width: u32,
        height: u32,
        seek_tolerance: f64,
    ) -> Self {
        Self {
            registry,
            session: MediaSession::new(library, seek_tolerance),
            supervisor: ClipSupervisor::new(),
            width,
            height,
        }
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn failures(&self) -> &[RenderFailure] {
        self.supervisor.failures()
    }

    #[must_use]
    pub fn seek_misses(&self) -> u64 {
        self.session.seek_misses()
    }

    /// Releases decoders and hands back the recorded clip failures.
    pub fn finish(mut self) -> Vec<RenderFailure> {
        self.session.release();
        self.supervisor.into_failures()
    }

    #[instrument(skip(self, project), fields(project_id = %project.id, time))]
    pub fn render(&mut self, project: &Project, time: f64) -> (FramePlan, Raster) {
        let plan = plan_frame(project, time);
        let raster = self.compose(project, &plan);
        (plan, raster)
    }

    /// Draws every layer of `plan` in order. Layers whose content cannot be
    /// produced are left out.
    pub fn compose(&mut self, project: &Project, plan: &FramePlan) -> Raster {
        let mut frame = Raster::filled(self.width, self.height, BACKGROUND);
        for layer in &plan.layers {
            let Some(clip) = project.clip(layer.clip_id) else {
                continue;
            };
            let Some(content) = self.layer_content(project, clip, layer) else {
                trace!(clip_id = %layer.clip_id, "layer contributes nothing");
                continue;
            };
            draw_layer(&mut frame, &content, &layer.transform, layer.mask.as_ref());
        }
        frame
    }

    fn layer_content(&mut self, project: &Project, clip: &Clip, layer: &LayerPlan) -> Option<Raster> {
        let Some(media) = project.media_source(clip.media_id) else {
            return self.supervisor.guard(clip.id, layer.local_time, || {
                Err(RenderError::MediaUnavailable(clip.media_id.to_string()))
            });
        };
        let local_time = layer.local_time;
        let source_time = layer.source_time;
        let mut content = ContentSource {
            session: &mut self.session,
            registry: self.registry,
            width: self.width,
            height: self.height,
        };
        match clip.kind {
            MediaKind::Video | MediaKind::Image => {
                self.supervisor.guard(clip.id, local_time, || content.capture(media, source_time))
            }
            MediaKind::Component => self.supervisor.guard(clip.id, local_time, || {
                let props = content.component_props(project, clip, media, local_time, true)?;
                content.render_component(media, &props)
            }),
            MediaKind::Audio => None,
        }
    }
}

/// Pulls pixels for one clip, nested media included. Everything here runs
/// inside the owning clip's supervisor guard, so a nested failure isolates
/// that clip.
struct ContentSource<'s, 'a> {
    session: &'s mut MediaSession<'a>,
    registry: &'a RendererRegistry,
    width: u32,
    height: u32,
}

impl ContentSource<'_, '_> {
    fn capture(&mut self, media: &MediaSource, time: f64) -> Result<Raster, RenderError> {
        self.session
            .capture(media, time)
            .map_err(|error| RenderError::MediaUnavailable(error.to_string()))
    }

    fn render_component(&self, media: &MediaSource, props: &RenderProps) -> Result<Raster, RenderError> {
        let content_id = media.content_id.as_deref().unwrap_or_default();
        let renderer = self
            .registry
            .get(content_id)
            .ok_or_else(|| RenderError::MissingRenderer(content_id.to_string()))?;
        renderer.render(props)
    }

    /// Declared defaults overlaid with the clip's values, media references
    /// turned into pixels. Nested components see their own media inputs as
    /// empty, which bounds nesting at one level.
    fn component_props(
        &mut self,
        project: &Project,
        clip: &Clip,
        media: &MediaSource,
        local_time: f64,
        resolve_nested: bool,
    ) -> Result<RenderProps, RenderError> {
        let mut props = RenderProps::new(local_time, clip.duration, self.width, self.height);
        let mut raw: BTreeMap<String, PropValue> = media
            .inputs
            .iter()
            .map(|input| (input.name.clone(), input.default.clone()))
            .collect();
        for (name, value) in &clip.props {
            raw.insert(name.clone(), value.clone());
        }

        for (name, value) in raw {
            let resolved = match value {
                PropValue::Media(None) => ResolvedProp::Empty,
                PropValue::Media(Some(_)) if !resolve_nested => ResolvedProp::Empty,
                PropValue::Media(Some(reference)) if reference == media.id => ResolvedProp::Empty,
                PropValue::Media(Some(reference)) => match project.media_source(reference) {
                    Some(nested) => {
                        ResolvedProp::Media(self.nested_media(project, clip, nested, local_time)?)
                    }
                    None => {
                        debug!(clip_id = %clip.id, prop = %name, %reference, "stale media reference");
                        ResolvedProp::Empty
                    }
                },
                other => ResolvedProp::Value(other),
            };
            props.values.insert(name, resolved);
        }
        Ok(props)
    }

    fn nested_media(
        &mut self,
        project: &Project,
        clip: &Clip,
        nested: &MediaSource,
        local_time: f64,
    ) -> Result<NestedMedia, RenderError> {
        let content = match nested.kind {
            MediaKind::Video | MediaKind::Image => {
                Some(self.capture(nested, clip.trim_start + local_time)?)
            }
            MediaKind::Component => {
                let inner = Clip {
                    props: BTreeMap::new(),
                    ..clip.clone()
                };
                let props = self.component_props(project, &inner, nested, local_time, false)?;
                Some(self.render_component(nested, &props)?)
            }
            MediaKind::Audio => None,
        };
        Ok(NestedMedia {
            media_id: nested.id,
            kind: nested.kind,
            content,
        })
    }
}

/// Preview entry point: one frame through the same compositor export uses.
#[must_use]
pub fn compose_frame(
    project: &Project,
    time: f64,
    library: &dyn MediaLibrary,
    registry: &RendererRegistry,
    size: (u32, u32),
    seek_tolerance: f64,
) -> (FramePlan, Raster) {
    let mut compositor = Compositor::new(library, registry, size.0, size.1, seek_tolerance);
    let output = compositor.render(project, time);
    compositor.finish();
    output
}

/// Draws `content` through its clip geometry and mask, source-over.
pub fn draw_layer(
    frame: &mut Raster,
    content: &Raster,
    transform: &ResolvedTransform,
    mask: Option<&Mask>,
) {
    if content.is_empty() || frame.is_empty() {
        return;
    }
    let geometry = ClipGeometry::new(transform, content.size(), frame.size());
    let (min_x, min_y, max_x, max_y) = geometry.bounds();
    let x_range = pixel_span(min_x, max_x, frame.width);
    let y_range = pixel_span(min_y, max_y, frame.height);

    for y in y_range {
        for x in x_range.clone() {
            let Some((u, v)) = geometry.frame_to_box(f64::from(x) + 0.5, f64::from(y) + 0.5)
            else {
                continue;
            };
            let coverage = mask.map_or(1.0, |mask| {
                mask_coverage(mask, u, v, geometry.box_width, geometry.box_height)
            });
            if coverage <= 0.0 {
                continue;
            }
            let texel = content.sample(u, v, geometry.box_width, geometry.box_height);
            let blended = blend_over(frame.pixel(x, y), texel, coverage);
            frame.set_pixel(x, y, blended);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_span(min: f64, max: f64, limit: u32) -> std::ops::Range<u32> {
    let start = min.floor().max(0.0).min(f64::from(limit)) as u32;
    let end = max.ceil().max(0.0).min(f64::from(limit)) as u32;
    start..end.max(start)
}
