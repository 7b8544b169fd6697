use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    history::History,
    keyframes,
    model::{
        AnimatableProp, Clip, Easing, Keyframe, Mask, MediaSource, Project, PropValue, Track,
        Transform,
    },
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("track not found: {0}")]
    TrackNotFound(Uuid),
    #[error("clip not found: {0}")]
    ClipNotFound(Uuid),
    #[error("media source not found: {0}")]
    MediaNotFound(Uuid),
    #[error("keyframe not found: {0}")]
    KeyframeNotFound(Uuid),
    #[error("placement on track {track_id} at [{start}, {end}) overlaps clip {conflict}")]
    PlacementRejected {
        track_id: Uuid,
        start: f64,
        end: f64,
        conflict: Uuid,
    },
    #[error("invalid clip: {0}")]
    InvalidClip(String),
    #[error("invalid prop {name}: {reason}")]
    InvalidProp { name: String, reason: String },
    #[error("no track at row {0}")]
    TrackIndexOutOfRange(usize),
    #[error("invalid track move from {from} to {to}")]
    InvalidReorder { from: usize, to: usize },
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("no batch is open")]
    BatchNotOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceClipRequest {
    pub media_id: Uuid,
    pub track_id: Uuid,
    pub start_time: f64,
}

/// Partial clip update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClipPatch {
    pub track_id: Option<Uuid>,
    pub name: Option<String>,
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    pub original_duration: Option<f64>,
    pub transform: Option<Transform>,
    /// `Some(None)` clears the mask.
    pub mask: Option<Option<Mask>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackPatch {
    pub name: Option<String>,
    pub hidden: Option<bool>,
    pub muted: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyframePatch {
    pub time: Option<f64>,
    pub value: Option<f64>,
    pub easing: Option<Easing>,
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    project: Project,
    history: History,
}

impl Engine {
    #[must_use]
    pub fn new(project: Project) -> Self {
        Self {
            project,
            history: History::default(),
        }
    }

    #[must_use]
    pub fn with_history_limit(project: Project, limit: usize) -> Self {
        Self {
            project,
            history: History::with_limit(limit),
        }
    }

    #[must_use]
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Frozen copy for readers that must not observe later edits.
    #[must_use]
    pub fn snapshot(&self) -> Project {
        self.project.clone()
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Runs `mutation` against a scratch copy and commits only on success,
    /// so a rejected operation never leaves partial state behind.
    pub(crate) fn apply<T>(
        &mut self,
        label: &str,
        mutation: impl FnOnce(&mut Project) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut candidate = self.project.clone();
        let output = mutation(&mut candidate)?;
        candidate.touch();
        let before = std::mem::replace(&mut self.project, candidate);
        self.history.record(label, before, &self.project);
        Ok(output)
    }

    /// Infallible variant of [`Engine::apply`].
    fn commit(&mut self, label: &str, mutation: impl FnOnce(&mut Project)) {
        let mut candidate = self.project.clone();
        mutation(&mut candidate);
        candidate.touch();
        let before = std::mem::replace(&mut self.project, candidate);
        self.history.record(label, before, &self.project);
    }

    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub fn replace_project(&mut self, project: Project) {
        self.project = project;
        self.history = History::default();
        info!(project_id = %self.project.id, "project replaced");
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, playhead))]
    pub fn set_playhead(&mut self, playhead: f64) {
        self.project.playhead = playhead.max(0.0);
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, track_name = %name))]
    pub fn add_track(&mut self, name: &str) -> Track {
        let index = self.project.tracks.len();
        self.insert_track(index, name)
    }

    /// Inserts a track at `index` in the z-order (clamped to the end).
    #[instrument(skip(self), fields(project_id = %self.project.id, index, track_name = %name))]
    pub fn insert_track(&mut self, index: usize, name: &str) -> Track {
        let track = Track::new(name);
        let inserted = track.clone();
        self.commit("insert track", move |project| {
            let index = index.min(project.tracks.len());
            project.tracks.insert(index, track);
        });
        info!(track_id = %inserted.id, "track added");
        inserted
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, from, to))]
    pub fn reorder_track(&mut self, from: usize, to: usize) -> Result<(), EngineError> {
        let count = self.project.tracks.len();
        if from >= count || to >= count {
            return Err(EngineError::InvalidReorder { from, to });
        }
        if from == to {
            debug!("reorder noop");
            return Ok(());
        }

        self.apply("reorder track", |project| {
            let track = project.tracks.remove(from);
            project.tracks.insert(to, track);
            Ok(())
        })?;
        info!("track reordered");
        Ok(())
    }

    #[instrument(skip(self, patch), fields(project_id = %self.project.id, track_id = %track_id))]
    pub fn update_track(&mut self, track_id: Uuid, patch: TrackPatch) -> Result<Track, EngineError> {
        let updated = self.apply("update track", |project| {
            let track = project
                .tracks
                .iter_mut()
                .find(|track| track.id == track_id)
                .ok_or(EngineError::TrackNotFound(track_id))?;
            if let Some(name) = patch.name {
                track.name = name;
            }
            if let Some(hidden) = patch.hidden {
                track.hidden = hidden;
            }
            if let Some(muted) = patch.muted {
                track.muted = muted;
            }
            Ok(track.clone())
        })?;
        info!(hidden = updated.hidden, muted = updated.muted, "track updated");
        Ok(updated)
    }

    /// Removes a track and every clip placed on it.
    #[instrument(skip(self), fields(project_id = %self.project.id, track_id = %track_id))]
    pub fn remove_track(&mut self, track_id: Uuid) -> Result<usize, EngineError> {
        let removed_clips = self.apply("remove track", |project| {
            let index = project
                .track_index(track_id)
                .ok_or(EngineError::TrackNotFound(track_id))?;
            project.tracks.remove(index);
            let before = project.clips.len();
            project.clips.retain(|clip| clip.track_id != track_id);
            Ok(before - project.clips.len())
        })?;
        info!(removed_clips, "track removed");
        Ok(removed_clips)
    }

    #[instrument(skip(self, media), fields(project_id = %self.project.id, media_name = %media.name, kind = ?media.kind))]
    pub fn add_media_source(&mut self, media: MediaSource) -> MediaSource {
        let added = media.clone();
        self.commit("add media", move |project| project.media.push(media));
        info!(media_id = %added.id, "media source added");
        added
    }

    /// Removes a media source, the clips that play it, and every prop that
    /// referenced it.
    #[instrument(skip(self), fields(project_id = %self.project.id, media_id = %media_id))]
    pub fn remove_media_source(&mut self, media_id: Uuid) -> Result<(), EngineError> {
        self.apply("remove media", |project| {
            let before = project.media.len();
            project.media.retain(|media| media.id != media_id);
            if project.media.len() == before {
                return Err(EngineError::MediaNotFound(media_id));
            }
            project.clips.retain(|clip| clip.media_id != media_id);
            prune_media_refs(project);
            Ok(())
        })?;
        info!("media source removed");
        Ok(())
    }

    #[instrument(skip(self, request), fields(project_id = %self.project.id, track_id = %request.track_id, media_id = %request.media_id, start_time = request.start_time))]
    pub fn place_clip(&mut self, request: PlaceClipRequest) -> Result<Clip, EngineError> {
        let clip = self.apply("place clip", |project| {
            let media = project
                .media_source(request.media_id)
                .ok_or(EngineError::MediaNotFound(request.media_id))?;
            if project.track(request.track_id).is_none() {
                return Err(EngineError::TrackNotFound(request.track_id));
            }
            if !request.start_time.is_finite() || request.start_time < 0.0 {
                return Err(EngineError::InvalidClip(format!(
                    "start_time {} must be a non-negative number",
                    request.start_time
                )));
            }

            let clip = Clip::from_media(media, request.track_id, request.start_time);
            ensure_free(project, &clip)?;
            project.clips.push(clip.clone());
            Ok(clip)
        });

        match &clip {
            Ok(clip) => info!(clip_id = %clip.id, "clip placed"),
            Err(error) => warn!(%error, "clip placement rejected"),
        }
        clip
    }

    /// Places `media_id` right after the last clip of `track_id`.
    #[instrument(skip(self), fields(project_id = %self.project.id, track_id = %track_id, media_id = %media_id))]
    pub fn append_clip(&mut self, media_id: Uuid, track_id: Uuid) -> Result<Clip, EngineError> {
        let start_time = self.project.track_end(track_id);
        self.place_clip(PlaceClipRequest {
            media_id,
            track_id,
            start_time,
        })
    }

    #[instrument(skip(self, patch), fields(project_id = %self.project.id, clip_id = %clip_id))]
    pub fn update_clip(&mut self, clip_id: Uuid, patch: ClipPatch) -> Result<Clip, EngineError> {
        let updated = self.apply("update clip", |project| {
            apply_patch(project, clip_id, patch)
        })?;
        debug!(
            start_time = updated.start_time,
            duration = updated.duration,
            "clip updated"
        );
        Ok(updated)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, clip_id = %clip_id))]
    pub fn remove_clip(&mut self, clip_id: Uuid) -> Result<Clip, EngineError> {
        let removed = self.apply("remove clip", |project| {
            let index = project
                .clips
                .iter()
                .position(|clip| clip.id == clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            Ok(project.clips.remove(index))
        })?;
        info!("clip removed");
        Ok(removed)
    }

    /// Removes several clips at once; fails without change if any id is unknown.
    #[instrument(skip(self, clip_ids), fields(project_id = %self.project.id, count = clip_ids.len()))]
    pub fn remove_clips(&mut self, clip_ids: &[Uuid]) -> Result<usize, EngineError> {
        let removed = self.apply("remove clips", |project| {
            if let Some(missing) = clip_ids.iter().find(|id| project.clip(**id).is_none()) {
                return Err(EngineError::ClipNotFound(*missing));
            }
            let before = project.clips.len();
            project.clips.retain(|clip| !clip_ids.contains(&clip.id));
            Ok(before - project.clips.len())
        })?;
        info!(removed, "clips removed");
        Ok(removed)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, clip_id = %clip_id, prop = ?prop, time, value))]
    pub fn add_keyframe(
        &mut self,
        clip_id: Uuid,
        prop: AnimatableProp,
        time: f64,
        value: f64,
        easing: Easing,
    ) -> Result<Keyframe, EngineError> {
        if !time.is_finite() || !value.is_finite() {
            return Err(EngineError::InvalidClip(
                "keyframe time and value must be finite".to_string(),
            ));
        }
        let keyframe = self.apply("add keyframe", |project| {
            let clip = project
                .clip_mut(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            let keys = clip.keyframes.entry(prop).or_default();
            Ok(keyframes::upsert(keys, Keyframe::new(time, value, easing)))
        })?;
        info!(keyframe_id = %keyframe.id, "keyframe set");
        Ok(keyframe)
    }

    #[instrument(skip(self, patch), fields(project_id = %self.project.id, clip_id = %clip_id, prop = ?prop, keyframe_id = %keyframe_id))]
    pub fn update_keyframe(
        &mut self,
        clip_id: Uuid,
        prop: AnimatableProp,
        keyframe_id: Uuid,
        patch: KeyframePatch,
    ) -> Result<Keyframe, EngineError> {
        let updated = self.apply("update keyframe", |project| {
            let clip = project
                .clip_mut(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            let keys = clip
                .keyframes
                .get_mut(&prop)
                .ok_or(EngineError::KeyframeNotFound(keyframe_id))?;
            let keyframe = keys
                .iter_mut()
                .find(|keyframe| keyframe.id == keyframe_id)
                .ok_or(EngineError::KeyframeNotFound(keyframe_id))?;

            if let Some(time) = patch.time.filter(|time| time.is_finite()) {
                keyframe.time = time.max(0.0);
            }
            if let Some(value) = patch.value.filter(|value| value.is_finite()) {
                keyframe.value = value;
            }
            if let Some(easing) = patch.easing {
                keyframe.easing = easing;
            }
            let updated = keyframe.clone();
            keyframes::sort(keys);
            Ok(updated)
        })?;
        debug!("keyframe updated");
        Ok(updated)
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, clip_id = %clip_id, prop = ?prop, keyframe_id = %keyframe_id))]
    pub fn remove_keyframe(
        &mut self,
        clip_id: Uuid,
        prop: AnimatableProp,
        keyframe_id: Uuid,
    ) -> Result<Keyframe, EngineError> {
        let removed = self.apply("remove keyframe", |project| {
            let clip = project
                .clip_mut(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            let keys = clip
                .keyframes
                .get_mut(&prop)
                .ok_or(EngineError::KeyframeNotFound(keyframe_id))?;
            let removed =
                keyframes::remove(keys, keyframe_id).ok_or(EngineError::KeyframeNotFound(keyframe_id))?;
            if keys.is_empty() {
                clip.keyframes.remove(&prop);
            }
            Ok(removed)
        })?;
        info!("keyframe removed");
        Ok(removed)
    }

    /// Sets one configurable input on a component clip. Media references must
    /// point at an existing source other than the clip's own.
    #[instrument(skip(self, value), fields(project_id = %self.project.id, clip_id = %clip_id, prop = %name))]
    pub fn set_clip_prop(
        &mut self,
        clip_id: Uuid,
        name: &str,
        value: PropValue,
    ) -> Result<Clip, EngineError> {
        let updated = self.apply("set prop", |project| {
            let clip = project
                .clip(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            let media = project
                .media_source(clip.media_id)
                .ok_or(EngineError::MediaNotFound(clip.media_id))?;
            let definition = media
                .inputs
                .iter()
                .find(|input| input.name == name)
                .ok_or_else(|| EngineError::InvalidProp {
                    name: name.to_string(),
                    reason: "not declared by the component".to_string(),
                })?;
            if !value.matches_kind(&definition.kind) {
                return Err(EngineError::InvalidProp {
                    name: name.to_string(),
                    reason: format!("value does not match {:?}", definition.kind),
                });
            }
            if let Some(reference) = value.media_ref() {
                if reference == clip.media_id {
                    return Err(EngineError::InvalidProp {
                        name: name.to_string(),
                        reason: "a component cannot reference itself".to_string(),
                    });
                }
                if project.media_source(reference).is_none() {
                    return Err(EngineError::MediaNotFound(reference));
                }
            }

            let clip = project
                .clip_mut(clip_id)
                .ok_or(EngineError::ClipNotFound(clip_id))?;
            clip.props.insert(name.to_string(), value);
            Ok(clip.clone())
        })?;
        info!("clip prop set");
        Ok(updated)
    }

    /// Nulls media references whose target no longer exists.
    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn prune_stale_media_refs(&mut self) -> usize {
        let stale = count_stale_refs(&self.project);
        if stale == 0 {
            return 0;
        }
        self.commit("prune media refs", prune_media_refs);
        warn!(stale, "stale media references cleared");
        stale
    }

    #[instrument(skip(self), fields(project_id = %self.project.id, label = %label))]
    pub fn begin_batch(&mut self, label: &str) {
        self.history.begin_batch(label, &self.project);
    }

    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn end_batch(&mut self) -> Result<(), EngineError> {
        if self.history.end_batch(&self.project) {
            Ok(())
        } else {
            Err(EngineError::BatchNotOpen)
        }
    }

    /// Discards an open batch, restoring the project it started from.
    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn abort_batch(&mut self) -> Result<(), EngineError> {
        let before = self.history.abort_batch().ok_or(EngineError::BatchNotOpen)?;
        self.project = before;
        info!("batch aborted");
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn undo(&mut self) -> Result<(), EngineError> {
        if self.history.in_batch() {
            self.end_batch()?;
        }
        self.project = self.history.undo().ok_or(EngineError::NothingToUndo)?;
        info!("undo");
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %self.project.id))]
    pub fn redo(&mut self) -> Result<(), EngineError> {
        self.project = self.history.redo().ok_or(EngineError::NothingToRedo)?;
        info!("redo");
        Ok(())
    }
}

/// Rejects `clip` if it would overlap another clip on its track.
pub(crate) fn ensure_free(project: &Project, clip: &Clip) -> Result<(), EngineError> {
    match project.find_overlap(clip.track_id, clip.start_time, clip.end_time(), &[clip.id]) {
        Some(conflict) => Err(EngineError::PlacementRejected {
            track_id: clip.track_id,
            start: clip.start_time,
            end: clip.end_time(),
            conflict: conflict.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn apply_patch(
    project: &mut Project,
    clip_id: Uuid,
    patch: ClipPatch,
) -> Result<Clip, EngineError> {
    if let Some(track_id) = patch.track_id
        && project.track(track_id).is_none()
    {
        return Err(EngineError::TrackNotFound(track_id));
    }

    let clip = project
        .clip_mut(clip_id)
        .ok_or(EngineError::ClipNotFound(clip_id))?;
    let mut candidate = clip.clone();
    if let Some(track_id) = patch.track_id {
        candidate.track_id = track_id;
    }
    if let Some(name) = patch.name {
        candidate.name = name;
    }
    if let Some(start_time) = patch.start_time {
        candidate.start_time = start_time;
    }
    if let Some(duration) = patch.duration {
        candidate.duration = duration;
    }
    if let Some(trim_start) = patch.trim_start {
        candidate.trim_start = trim_start;
    }
    if let Some(trim_end) = patch.trim_end {
        candidate.trim_end = trim_end;
    }
    if let Some(original_duration) = patch.original_duration {
        candidate.original_duration = original_duration;
    }
    if let Some(transform) = patch.transform {
        candidate.transform = transform;
    }
    if let Some(mask) = patch.mask {
        candidate.mask = mask;
    }
    candidate.check_timing().map_err(EngineError::InvalidClip)?;
    ensure_free(project, &candidate)?;

    let clip = project
        .clip_mut(clip_id)
        .ok_or(EngineError::ClipNotFound(clip_id))?;
    *clip = candidate;
    Ok(clip.clone())
}

fn count_stale_refs(project: &Project) -> usize {
    project
        .clips
        .iter()
        .flat_map(|clip| clip.props.values())
        .filter_map(PropValue::media_ref)
        .filter(|reference| project.media_source(*reference).is_none())
        .count()
}

fn prune_media_refs(project: &mut Project) {
    let known: Vec<Uuid> = project.media.iter().map(|media| media.id).collect();
    for value in project.clips.iter_mut().flat_map(|clip| clip.props.values_mut()) {
        if let PropValue::Media(Some(reference)) = value
            && !known.contains(reference)
        {
            *value = PropValue::Media(None);
        }
    }
}
