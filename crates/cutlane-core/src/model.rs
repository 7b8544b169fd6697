use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Duration given to still and procedural media when they are first placed.
pub const DEFAULT_PLACEHOLDER_DURATION: f64 = 5.0;
/// Smallest duration any trim or resize may leave a clip with.
pub const MIN_CLIP_DURATION: f64 = 0.1;
/// Tolerance used when comparing timeline positions.
pub const TIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    /// Ordered lanes; later entries composite on top of earlier ones.
    pub tracks: Vec<Track>,
    pub clips: Vec<Clip>,
    pub media: Vec<MediaSource>,
    pub playhead: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            tracks: Vec::new(),
            clips: Vec::new(),
            media: Vec::new(),
            playhead: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn track(&self, track_id: Uuid) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == track_id)
    }

    #[must_use]
    pub fn track_index(&self, track_id: Uuid) -> Option<usize> {
        self.tracks.iter().position(|track| track.id == track_id)
    }

    #[must_use]
    pub fn clip(&self, clip_id: Uuid) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == clip_id)
    }

    pub fn clip_mut(&mut self, clip_id: Uuid) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|clip| clip.id == clip_id)
    }

    #[must_use]
    pub fn media_source(&self, media_id: Uuid) -> Option<&MediaSource> {
        self.media.iter().find(|media| media.id == media_id)
    }

    /// Clips on one track, ordered by start time.
    #[must_use]
    pub fn clips_on_track(&self, track_id: Uuid) -> Vec<&Clip> {
        let mut clips: Vec<&Clip> = self
            .clips
            .iter()
            .filter(|clip| clip.track_id == track_id)
            .collect();
        clips.sort_by(|left, right| left.start_time.total_cmp(&right.start_time));
        clips
    }

    #[must_use]
    pub fn track_end(&self, track_id: Uuid) -> f64 {
        self.clips
            .iter()
            .filter(|clip| clip.track_id == track_id)
            .map(Clip::end_time)
            .fold(0.0, f64::max)
    }

    /// Latest end time over every clip; the length of an export.
    #[must_use]
    pub fn total_duration(&self) -> f64 {
        self.clips.iter().map(Clip::end_time).fold(0.0, f64::max)
    }

    /// First clip on `track_id` whose interval intersects `[start, end)`,
    /// ignoring the clips listed in `exclude`.
    #[must_use]
    pub fn find_overlap(
        &self,
        track_id: Uuid,
        start: f64,
        end: f64,
        exclude: &[Uuid],
    ) -> Option<&Clip> {
        self.clips.iter().find(|clip| {
            clip.track_id == track_id && !exclude.contains(&clip.id) && clip.overlaps(start, end)
        })
    }

    /// Checks the placement invariant on every track.
    #[must_use]
    pub fn has_overlaps(&self) -> bool {
        self.tracks.iter().any(|track| {
            let clips = self.clips_on_track(track.id);
            clips
                .windows(2)
                .any(|pair| pair[0].end_time() > pair[1].start_time + TIME_EPSILON)
        })
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub muted: bool,
}

impl Track {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hidden: false,
            muted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Component,
}

impl MediaKind {
    /// Kinds whose duration is not bound to a decoded source length.
    #[must_use]
    pub const fn is_flexible_duration(self) -> bool {
        matches!(self, Self::Image | Self::Component)
    }

    #[must_use]
    pub const fn is_visual(self) -> bool {
        !matches!(self, Self::Audio)
    }

    #[must_use]
    pub const fn carries_audio(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaSource {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub kind: MediaKind,
    /// Intrinsic length in seconds, `0.0` for still and procedural kinds.
    pub duration: f64,
    /// Registry key of the renderer producing component content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PropDefinition>,
}

impl MediaSource {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>, kind: MediaKind, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            kind,
            duration: duration.max(0.0),
            content_id: None,
            inputs: Vec::new(),
        }
    }

    #[must_use]
    pub fn component(
        name: impl Into<String>,
        content_id: impl Into<String>,
        inputs: Vec<PropDefinition>,
    ) -> Self {
        let content_id = content_id.into();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: content_id.clone(),
            kind: MediaKind::Component,
            duration: 0.0,
            content_id: Some(content_id),
            inputs,
        }
    }

    /// Length a freshly placed clip of this media receives.
    #[must_use]
    pub fn placement_duration(&self) -> f64 {
        if self.duration > 0.0 {
            self.duration
        } else {
            DEFAULT_PLACEHOLDER_DURATION
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropDefinition {
    pub name: String,
    pub kind: PropKind,
    pub default: PropValue,
}

impl PropDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropKind, default: PropValue) -> Self {
        Self {
            name: name.into(),
            kind,
            default,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "options")]
pub enum PropKind {
    String,
    Number,
    Color,
    Boolean,
    Enum(Vec<String>),
    Media,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PropValue {
    Text(String),
    Number(f64),
    Color(String),
    Bool(bool),
    Enum(String),
    Media(Option<Uuid>),
}

impl PropValue {
    #[must_use]
    pub fn media_ref(&self) -> Option<Uuid> {
        match self {
            Self::Media(reference) => *reference,
            _ => None,
        }
    }

    #[must_use]
    pub fn matches_kind(&self, kind: &PropKind) -> bool {
        match (self, kind) {
            (Self::Text(_), PropKind::String)
            | (Self::Number(_), PropKind::Number)
            | (Self::Color(_), PropKind::Color)
            | (Self::Bool(_), PropKind::Boolean)
            | (Self::Media(_), PropKind::Media) => true,
            (Self::Enum(value), PropKind::Enum(options)) => options.contains(value),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    /// Horizontal offset of the clip centre from the frame centre, in output pixels.
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Clockwise rotation in degrees.
    pub rotation: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskShape {
    #[default]
    None,
    Rectangle,
    Ellipse,
}

/// Clipping shape expressed in the clip's own box: centre and size are
/// fractions of the box, feather and corner radius are box pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Mask {
    pub shape: MaskShape,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub feather: f64,
    pub corner_radius: f64,
    pub inverted: bool,
}

impl Default for Mask {
    fn default() -> Self {
        Self {
            shape: MaskShape::Rectangle,
            center_x: 0.5,
            center_y: 0.5,
            width: 1.0,
            height: 1.0,
            rotation: 0.0,
            feather: 0.0,
            corner_radius: 0.0,
            inverted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnimatableProp {
    X,
    Y,
    Scale,
    ScaleX,
    ScaleY,
    Rotation,
    MaskCenterX,
    MaskCenterY,
    MaskWidth,
    MaskHeight,
    MaskFeather,
}

impl AnimatableProp {
    pub const TRANSFORM: [Self; 6] = [
        Self::X,
        Self::Y,
        Self::Scale,
        Self::ScaleX,
        Self::ScaleY,
        Self::Rotation,
    ];

    pub const MASK: [Self; 5] = [
        Self::MaskCenterX,
        Self::MaskCenterY,
        Self::MaskWidth,
        Self::MaskHeight,
        Self::MaskFeather,
    ];

    #[must_use]
    pub const fn is_mask(self) -> bool {
        matches!(
            self,
            Self::MaskCenterX
                | Self::MaskCenterY
                | Self::MaskWidth
                | Self::MaskHeight
                | Self::MaskFeather
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub id: Uuid,
    /// Seconds from the clip start.
    pub time: f64,
    pub value: f64,
    /// Curve used towards the following keyframe.
    pub easing: Easing,
}

impl Keyframe {
    #[must_use]
    pub fn new(time: f64, value: f64, easing: Easing) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: time.max(0.0),
            value,
            easing,
        }
    }
}

pub type KeyframeMap = BTreeMap<AnimatableProp, Vec<Keyframe>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: Uuid,
    pub track_id: Uuid,
    pub media_id: Uuid,
    pub name: String,
    pub kind: MediaKind,
    pub start_time: f64,
    pub duration: f64,
    pub trim_start: f64,
    pub trim_end: f64,
    pub original_duration: f64,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Mask>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyframes: KeyframeMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, PropValue>,
}

impl Clip {
    /// A fresh, untrimmed clip of `media` at `start_time` on `track_id`.
    #[must_use]
    pub fn from_media(media: &MediaSource, track_id: Uuid, start_time: f64) -> Self {
        let duration = media.placement_duration();
        let props = media
            .inputs
            .iter()
            .map(|input| (input.name.clone(), input.default.clone()))
            .collect();
        Self {
            id: Uuid::new_v4(),
            track_id,
            media_id: media.id,
            name: media.name.clone(),
            kind: media.kind,
            start_time: start_time.max(0.0),
            duration,
            trim_start: 0.0,
            trim_end: 0.0,
            original_duration: duration,
            transform: Transform::default(),
            mask: None,
            keyframes: BTreeMap::new(),
            props,
        }
    }

    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    #[must_use]
    pub fn is_flexible(&self) -> bool {
        self.kind.is_flexible_duration()
    }

    /// Half-open visibility test: `start <= time < end`.
    #[must_use]
    pub fn is_active_at(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time()
    }

    #[must_use]
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        start < self.end_time() - TIME_EPSILON && self.start_time < end - TIME_EPSILON
    }

    /// Validates the timing fields; the error names the first broken rule.
    pub fn check_timing(&self) -> Result<(), String> {
        let finite = [
            self.start_time,
            self.duration,
            self.trim_start,
            self.trim_end,
            self.original_duration,
        ]
        .iter()
        .all(|value| value.is_finite());
        if !finite {
            return Err("timing values must be finite".to_string());
        }
        if self.start_time < 0.0 {
            return Err(format!("start_time {} is negative", self.start_time));
        }
        if self.duration <= 0.0 {
            return Err(format!("duration {} must be positive", self.duration));
        }
        if self.original_duration <= 0.0 {
            return Err(format!(
                "original_duration {} must be positive",
                self.original_duration
            ));
        }
        if self.trim_start < 0.0 || self.trim_end < 0.0 {
            return Err("trims must not be negative".to_string());
        }
        if self.trim_start + self.trim_end > self.original_duration + TIME_EPSILON {
            return Err(format!(
                "trims {} + {} exceed original duration {}",
                self.trim_start, self.trim_end, self.original_duration
            ));
        }
        if !self.is_flexible() {
            let expected = self.original_duration - self.trim_start - self.trim_end;
            if (self.duration - expected).abs() > TIME_EPSILON {
                return Err(format!(
                    "duration {} does not match trimmed length {expected}",
                    self.duration
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_duration_applies_to_stills() {
        let still = MediaSource::new("logo", "logo.png", MediaKind::Image, 0.0);
        let clip = Clip::from_media(&still, Uuid::new_v4(), 2.0);
        assert!((clip.duration - DEFAULT_PLACEHOLDER_DURATION).abs() < f64::EPSILON);
        assert!(clip.check_timing().is_ok());
    }

    #[test]
    fn timing_check_rejects_mismatched_video_duration() {
        let video = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 10.0);
        let mut clip = Clip::from_media(&video, Uuid::new_v4(), 0.0);
        clip.trim_start = 2.0;
        assert!(clip.check_timing().is_err());
        clip.duration = 8.0;
        assert!(clip.check_timing().is_ok());
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let video = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 5.0);
        let clip = Clip::from_media(&video, Uuid::new_v4(), 0.0);
        assert!(!clip.overlaps(5.0, 8.0));
        assert!(clip.overlaps(3.0, 8.0));
    }
}
