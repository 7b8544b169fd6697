//! Interactive timeline edits: snapping, moves, trims, ripple and drops.
//!
//! The math is independent of how pointer input arrives; [`ClipDrag`] turns
//! a platform-neutral pointer stream into engine calls.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    engine::{ClipPatch, Engine, EngineError, apply_patch, ensure_free},
    model::{Clip, MIN_CLIP_DURATION, Project, TIME_EPSILON, Track},
};

pub const DEFAULT_SNAP_THRESHOLD_PX: f64 = 8.0;
pub const DEFAULT_DROP_EDGE_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SnapSettings {
    pub enabled: bool,
    pub threshold_px: f64,
    /// Timeline zoom in pixels per second.
    pub zoom: f64,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_px: DEFAULT_SNAP_THRESHOLD_PX,
            zoom: 100.0,
        }
    }
}

impl SnapSettings {
    #[must_use]
    pub fn threshold_seconds(&self) -> f64 {
        if self.zoom <= 0.0 {
            0.0
        } else {
            self.threshold_px / self.zoom
        }
    }
}

/// Closest candidate within `threshold_px / zoom` seconds of `raw`.
#[must_use]
pub fn snap_time(raw: f64, candidates: &[f64], settings: &SnapSettings) -> Option<f64> {
    if !settings.enabled || settings.zoom <= 0.0 {
        return None;
    }
    let threshold = settings.threshold_seconds();
    candidates
        .iter()
        .copied()
        .map(|candidate| (candidate, (candidate - raw).abs()))
        .filter(|(_, distance)| *distance <= threshold)
        .min_by(|left, right| left.1.total_cmp(&right.1))
        .map(|(candidate, _)| candidate)
}

/// Zero, the playhead, and both edges of every other clip on `track_id`.
#[must_use]
pub fn snap_candidates(project: &Project, track_id: Uuid, exclude_clip: Uuid) -> Vec<f64> {
    let mut candidates = vec![0.0, project.playhead];
    for clip in project
        .clips
        .iter()
        .filter(|clip| clip.track_id == track_id && clip.id != exclude_clip)
    {
        candidates.push(clip.start_time);
        candidates.push(clip.end_time());
    }
    candidates
}

/// Snaps a moving clip by its leading edge first, then its trailing edge.
#[must_use]
pub fn snap_clip_start(
    project: &Project,
    clip: &Clip,
    track_id: Uuid,
    raw_start: f64,
    settings: &SnapSettings,
) -> f64 {
    let candidates = snap_candidates(project, track_id, clip.id);
    if let Some(snapped) = snap_time(raw_start, &candidates, settings) {
        return snapped;
    }
    if let Some(snapped) = snap_time(raw_start + clip.duration, &candidates, settings) {
        return (snapped - clip.duration).max(0.0);
    }
    raw_start
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrimEdge {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrimRequest {
    pub edge: TrimEdge,
    /// Seconds the edge moves on the timeline; positive moves it right.
    pub delta: f64,
    /// Shift every later clip on the track by the change in end time.
    pub ripple: bool,
}

/// Timing fields after a trim, before neighbours are considered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimmedTiming {
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    pub original_duration: f64,
}

impl TrimmedTiming {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    fn of(clip: &Clip) -> Self {
        Self {
            start_time: clip.start_time,
            duration: clip.duration,
            trim_start: clip.trim_start,
            trim_end: clip.trim_end,
            original_duration: clip.original_duration,
        }
    }
}

/// Free space around a clip on its track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimBounds {
    /// End of the previous clip, or zero.
    pub earliest_start: f64,
    /// Start of the next clip, unbounded when rippling or at the track end.
    pub latest_end: f64,
}

impl TrimBounds {
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            earliest_start: 0.0,
            latest_end: f64::INFINITY,
        }
    }

    #[must_use]
    pub fn around(project: &Project, clip: &Clip) -> Self {
        let mut bounds = Self::unbounded();
        for other in project
            .clips
            .iter()
            .filter(|other| other.track_id == clip.track_id && other.id != clip.id)
        {
            if other.end_time() <= clip.start_time + TIME_EPSILON {
                bounds.earliest_start = bounds.earliest_start.max(other.end_time());
            } else if other.start_time >= clip.end_time() - TIME_EPSILON {
                bounds.latest_end = bounds.latest_end.min(other.start_time);
            }
        }
        bounds
    }
}

/// Applies a trim to one clip, clamping rather than rejecting.
///
/// Decoded media moves its source window and keeps
/// `duration == original_duration - trim_start - trim_end`; flexible media
/// resizes directly. Nothing ever shrinks below [`MIN_CLIP_DURATION`].
/// With `ripple` the start edge stays put and the clip shortens or grows
/// from its tail instead.
#[must_use]
pub fn trim_timing(clip: &Clip, request: &TrimRequest, bounds: &TrimBounds) -> TrimmedTiming {
    let mut timing = TrimmedTiming::of(clip);
    let delta = if request.delta.is_finite() { request.delta } else { 0.0 };
    let old_end = clip.end_time();

    if clip.is_flexible() {
        match (request.edge, request.ripple) {
            (TrimEdge::End, _) => {
                let end = (old_end + delta)
                    .min(bounds.latest_end)
                    .max(clip.start_time + MIN_CLIP_DURATION);
                timing.duration = end - clip.start_time;
            }
            (TrimEdge::Start, false) => {
                let start = (clip.start_time + delta)
                    .max(bounds.earliest_start)
                    .max(0.0)
                    .min(old_end - MIN_CLIP_DURATION);
                timing.start_time = start;
                timing.duration = old_end - start;
            }
            (TrimEdge::Start, true) => {
                timing.duration = (clip.duration - delta).max(MIN_CLIP_DURATION);
            }
        }
        timing.original_duration = timing.duration + timing.trim_start + timing.trim_end;
        return timing;
    }

    let max_trim = |other_trim: f64| (clip.original_duration - other_trim - MIN_CLIP_DURATION).max(0.0);
    match (request.edge, request.ripple) {
        (TrimEdge::End, _) => {
            let growth_room = bounds.latest_end - old_end;
            let delta = delta.min(growth_room);
            timing.trim_end = (clip.trim_end - delta).clamp(0.0, max_trim(clip.trim_start));
        }
        (TrimEdge::Start, false) => {
            let shrink_room = (clip.start_time - bounds.earliest_start).max(0.0);
            let delta = delta.max(-shrink_room);
            timing.trim_start = (clip.trim_start + delta).clamp(0.0, max_trim(clip.trim_end));
            timing.start_time = clip.start_time + (timing.trim_start - clip.trim_start);
        }
        (TrimEdge::Start, true) => {
            timing.trim_start = (clip.trim_start + delta).clamp(0.0, max_trim(clip.trim_end));
        }
    }
    timing.duration = clip.original_duration - timing.trim_start - timing.trim_end;
    timing
}

/// Outcome of dropping a dragged clip onto a track row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DropOutcome {
    Reassigned { track_id: Uuid },
    InsertedTrack { track_id: Uuid, index: usize },
}

/// Which part of a track row the pointer is over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropZone {
    Above,
    Middle,
    Below,
}

/// Classifies a vertical offset within a row of height `row_height`.
#[must_use]
pub fn drop_zone(offset_in_row: f64, row_height: f64, edge_fraction: f64) -> DropZone {
    let edge = row_height * edge_fraction.clamp(0.0, 0.5);
    if offset_in_row < edge {
        DropZone::Above
    } else if offset_in_row > row_height - edge {
        DropZone::Below
    } else {
        DropZone::Middle
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DropRequest {
    pub clip_id: Uuid,
    /// Row index; rows follow `Project::tracks` order.
    pub track_index: usize,
    pub zone: DropZone,
    pub start_time: f64,
}

impl Engine {
    /// Moves a clip to a new start and optionally a new track, snapping first.
    #[instrument(skip(self, snap), fields(clip_id = %clip_id, start_time, track_id = ?track_id))]
    pub fn move_clip(
        &mut self,
        clip_id: Uuid,
        start_time: f64,
        track_id: Option<Uuid>,
        snap: Option<&SnapSettings>,
    ) -> Result<Clip, EngineError> {
        let project = self.project();
        let clip = project
            .clip(clip_id)
            .ok_or(EngineError::ClipNotFound(clip_id))?;
        let target_track = track_id.unwrap_or(clip.track_id);
        let raw_start = start_time.max(0.0);
        let start_time = match snap {
            Some(settings) => snap_clip_start(project, clip, target_track, raw_start, settings),
            None => raw_start,
        };
        if (start_time - raw_start).abs() > f64::EPSILON {
            debug!(raw_start, snapped = start_time, "move snapped");
        }

        self.update_clip(
            clip_id,
            ClipPatch {
                track_id: Some(target_track),
                start_time: Some(start_time),
                ..ClipPatch::default()
            },
        )
    }

    /// Trims one edge of a clip; with ripple, later clips on the same track
    /// shift by the change in end time so their gaps are preserved.
    #[instrument(skip(self), fields(clip_id = %clip_id, edge = ?request.edge, delta = request.delta, ripple = request.ripple))]
    pub fn trim_clip(&mut self, clip_id: Uuid, request: TrimRequest) -> Result<Clip, EngineError> {
        let trimmed = self.apply("trim clip", |project| {
            let clip = project
                .clip(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?
                .clone();
            let bounds = if request.ripple {
                TrimBounds::unbounded()
            } else {
                TrimBounds::around(project, &clip)
            };
            let timing = trim_timing(&clip, &request, &bounds);
            let shift = timing.end_time() - clip.end_time();

            if request.ripple && shift.abs() > f64::EPSILON {
                ripple_shift(project, &clip, shift);
            }

            apply_patch(
                project,
                clip_id,
                ClipPatch {
                    start_time: Some(timing.start_time),
                    duration: Some(timing.duration),
                    trim_start: Some(timing.trim_start),
                    trim_end: Some(timing.trim_end),
                    original_duration: Some(timing.original_duration),
                    ..ClipPatch::default()
                },
            )
        })?;
        info!(
            start_time = trimmed.start_time,
            duration = trimmed.duration,
            "clip trimmed"
        );
        Ok(trimmed)
    }

    /// Drops a clip onto a row. The middle zone reassigns when the track has
    /// room; the edge zones do the same, or insert a new track beside the row
    /// when the target track is occupied.
    #[instrument(skip(self), fields(clip_id = %request.clip_id, track_index = request.track_index, zone = ?request.zone))]
    pub fn drop_clip(&mut self, request: DropRequest) -> Result<DropOutcome, EngineError> {
        let outcome = self.apply("drop clip", |project| {
            let clip = project
                .clip(request.clip_id)
                .ok_or(EngineError::ClipNotFound(request.clip_id))?
                .clone();
            let track_id = project
                .tracks
                .get(request.track_index)
                .map(|track| track.id)
                .ok_or(EngineError::TrackIndexOutOfRange(request.track_index))?;

            let mut candidate = clip.clone();
            candidate.track_id = track_id;
            candidate.start_time = request.start_time.max(0.0);
            let fits = ensure_free(project, &candidate);

            match (fits, request.zone) {
                (Ok(()), _) => {
                    apply_patch(project, clip.id, placement_patch(&candidate))?;
                    Ok(DropOutcome::Reassigned { track_id })
                }
                (Err(error), DropZone::Middle) => Err(error),
                (Err(_), zone) => {
                    let index = if zone == DropZone::Above {
                        request.track_index
                    } else {
                        request.track_index + 1
                    };
                    let track = Track::new(format!("Track {}", project.tracks.len() + 1));
                    let new_track_id = track.id;
                    project.tracks.insert(index, track);
                    candidate.track_id = new_track_id;
                    apply_patch(project, clip.id, placement_patch(&candidate))?;
                    Ok(DropOutcome::InsertedTrack {
                        track_id: new_track_id,
                        index,
                    })
                }
            }
        });

        match &outcome {
            Ok(outcome) => info!(?outcome, "clip dropped"),
            Err(error) => warn!(%error, "drop rejected"),
        }
        outcome
    }
}

fn placement_patch(clip: &Clip) -> ClipPatch {
    ClipPatch {
        track_id: Some(clip.track_id),
        start_time: Some(clip.start_time),
        ..ClipPatch::default()
    }
}

fn ripple_shift(project: &mut Project, trimmed: &Clip, shift: f64) {
    let threshold = trimmed.end_time() - TIME_EPSILON;
    for other in project.clips.iter_mut().filter(|other| {
        other.track_id == trimmed.track_id && other.id != trimmed.id && other.start_time >= threshold
    }) {
        other.start_time = (other.start_time + shift).max(0.0);
    }
}

/// Pointer input in timeline pixels, independent of any windowing toolkit.
/// `x` runs along time; `y` is measured from the top of the first track row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { clip_id: Uuid, x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Up { x: f64, y: f64 },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragState {
    pub clip_id: Uuid,
    pub origin_x: f64,
    pub origin_y: f64,
    pub origin_start: f64,
    pub origin_row: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GesturePhase {
    #[default]
    Idle,
    Dragging(DragState),
    Committing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragLayout {
    pub row_height: f64,
    pub edge_fraction: f64,
    pub snap: SnapSettings,
}

impl Default for DragLayout {
    fn default() -> Self {
        Self {
            row_height: 48.0,
            edge_fraction: DEFAULT_DROP_EDGE_FRACTION,
            snap: SnapSettings::default(),
        }
    }
}

/// Idle → Dragging → Committing → Idle. All intermediate moves of one drag
/// are folded into a single undo step.
#[derive(Debug, Clone, Default)]
pub struct ClipDrag {
    pub layout: DragLayout,
    phase: GesturePhase,
}

impl ClipDrag {
    #[must_use]
    pub fn new(layout: DragLayout) -> Self {
        Self {
            layout,
            phase: GesturePhase::Idle,
        }
    }

    #[must_use]
    pub fn phase(&self) -> GesturePhase {
        self.phase
    }

    /// Feeds one pointer event. Returns the drop outcome when a drag ends
    /// on another row; rejected intermediate moves leave the clip where it
    /// last fitted.
    pub fn handle(
        &mut self,
        engine: &mut Engine,
        event: PointerEvent,
    ) -> Result<Option<DropOutcome>, EngineError> {
        match (self.phase, event) {
            (GesturePhase::Idle, PointerEvent::Down { clip_id, x, y }) => {
                let project = engine.project();
                let clip = project
                    .clip(clip_id)
                    .ok_or(EngineError::ClipNotFound(clip_id))?;
                let origin_row = project
                    .track_index(clip.track_id)
                    .ok_or(EngineError::TrackNotFound(clip.track_id))?;
                let state = DragState {
                    clip_id,
                    origin_x: x,
                    origin_y: y,
                    origin_start: clip.start_time,
                    origin_row,
                };
                engine.begin_batch("drag clip");
                self.phase = GesturePhase::Dragging(state);
                Ok(None)
            }
            (GesturePhase::Dragging(state), PointerEvent::Move { x, .. }) => {
                let start = self.start_for(&state, x);
                if let Err(error) =
                    engine.move_clip(state.clip_id, start, None, Some(&self.layout.snap))
                {
                    debug!(%error, "drag position rejected, holding last valid position");
                }
                Ok(None)
            }
            (GesturePhase::Dragging(state), PointerEvent::Up { x, y }) => {
                self.phase = GesturePhase::Committing;
                let start = self.start_for(&state, x);
                if let Err(error) =
                    engine.move_clip(state.clip_id, start, None, Some(&self.layout.snap))
                {
                    debug!(%error, "release position rejected, holding last valid position");
                }
                let outcome = self.commit_drop(engine, &state, y);
                engine.end_batch()?;
                self.phase = GesturePhase::Idle;
                Ok(outcome)
            }
            (GesturePhase::Dragging(_), PointerEvent::Cancel) => {
                engine.abort_batch()?;
                self.phase = GesturePhase::Idle;
                Ok(None)
            }
            (phase, event) => {
                debug!(?phase, ?event, "pointer event ignored");
                Ok(None)
            }
        }
    }

    fn start_for(&self, state: &DragState, x: f64) -> f64 {
        let zoom = self.layout.snap.zoom.max(f64::EPSILON);
        (state.origin_start + (x - state.origin_x) / zoom).max(0.0)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn commit_drop(&self, engine: &mut Engine, state: &DragState, y: f64) -> Option<DropOutcome> {
        let row_height = self.layout.row_height.max(1.0);
        let rows = engine.project().tracks.len();
        if y < 0.0 || rows == 0 {
            return None;
        }
        let row = (y / row_height).floor() as usize;
        let (row, zone) = if row >= rows {
            (rows - 1, DropZone::Below)
        } else {
            let offset = y - row as f64 * row_height;
            (row, drop_zone(offset, row_height, self.layout.edge_fraction))
        };
        if row == state.origin_row && zone == DropZone::Middle {
            return None;
        }
        let start_time = engine.project().clip(state.clip_id)?.start_time;
        engine
            .drop_clip(DropRequest {
                clip_id: state.clip_id,
                track_index: row,
                zone,
                start_time,
            })
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaKind, MediaSource};

    fn settings() -> SnapSettings {
        SnapSettings {
            enabled: true,
            threshold_px: 10.0,
            zoom: 100.0,
        }
    }

    #[test]
    fn snap_picks_nearest_candidate_inside_threshold() {
        let snapped = snap_time(2.04, &[0.0, 2.0, 2.09], &settings());
        assert_eq!(snapped, Some(2.0));
    }

    #[test]
    fn snap_ignores_candidates_beyond_threshold() {
        assert_eq!(snap_time(2.5, &[0.0, 2.0, 3.0], &settings()), None);
    }

    #[test]
    fn snap_threshold_scales_with_zoom() {
        let zoomed_out = SnapSettings {
            zoom: 10.0,
            ..settings()
        };
        assert_eq!(snap_time(2.5, &[2.0], &zoomed_out), Some(2.0));
    }

    #[test]
    fn drop_zone_splits_row_into_three_bands() {
        assert_eq!(drop_zone(2.0, 40.0, 0.25), DropZone::Above);
        assert_eq!(drop_zone(20.0, 40.0, 0.25), DropZone::Middle);
        assert_eq!(drop_zone(38.0, 40.0, 0.25), DropZone::Below);
    }

    #[test]
    fn trim_end_never_drops_below_floor() {
        let media = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 5.0);
        let clip = Clip::from_media(&media, Uuid::new_v4(), 0.0);
        let timing = trim_timing(
            &clip,
            &TrimRequest {
                edge: TrimEdge::End,
                delta: -10.0,
                ripple: false,
            },
            &TrimBounds::unbounded(),
        );
        assert!((timing.duration - MIN_CLIP_DURATION).abs() < 1e-9);
        assert!((timing.trim_end - (5.0 - MIN_CLIP_DURATION)).abs() < 1e-9);
    }

    #[test]
    fn trim_end_cannot_extend_past_source() {
        let media = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 5.0);
        let clip = Clip::from_media(&media, Uuid::new_v4(), 0.0);
        let timing = trim_timing(
            &clip,
            &TrimRequest {
                edge: TrimEdge::End,
                delta: 3.0,
                ripple: false,
            },
            &TrimBounds::unbounded(),
        );
        assert!((timing.duration - 5.0).abs() < 1e-9);
        assert!(timing.trim_end.abs() < 1e-9);
    }

    #[test]
    fn trim_start_moves_start_with_source_window() {
        let media = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 5.0);
        let clip = Clip::from_media(&media, Uuid::new_v4(), 2.0);
        let timing = trim_timing(
            &clip,
            &TrimRequest {
                edge: TrimEdge::Start,
                delta: 1.5,
                ripple: false,
            },
            &TrimBounds::unbounded(),
        );
        assert!((timing.start_time - 3.5).abs() < 1e-9);
        assert!((timing.trim_start - 1.5).abs() < 1e-9);
        assert!((timing.end_time() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn flexible_end_resize_is_limited_by_next_clip() {
        let media = MediaSource::new("title", "title", MediaKind::Component, 0.0);
        let clip = Clip::from_media(&media, Uuid::new_v4(), 0.0);
        let timing = trim_timing(
            &clip,
            &TrimRequest {
                edge: TrimEdge::End,
                delta: 10.0,
                ripple: false,
            },
            &TrimBounds {
                earliest_start: 0.0,
                latest_end: 7.0,
            },
        );
        assert!((timing.duration - 7.0).abs() < 1e-9);
        assert!((timing.original_duration - 7.0).abs() < 1e-9);
    }
}
