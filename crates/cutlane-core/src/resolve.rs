//! Clip transform and mask resolution shared by preview and export.
//!
//! Nothing here reads global state: the same clip and local time always
//! produce the same geometry, whichever renderer asks.

use serde::{Deserialize, Serialize};

use crate::{
    keyframes,
    model::{AnimatableProp, Clip, Mask, MaskShape, Transform},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResolvedTransform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
}

impl From<Transform> for ResolvedTransform {
    fn from(value: Transform) -> Self {
        Self {
            x: value.x,
            y: value.y,
            scale: value.scale,
            scale_x: value.scale_x,
            scale_y: value.scale_y,
            rotation: value.rotation,
        }
    }
}

impl ResolvedTransform {
    #[must_use]
    pub fn effective_scale(&self) -> (f64, f64) {
        (self.scale * self.scale_x, self.scale * self.scale_y)
    }
}

fn animated(clip: &Clip, prop: AnimatableProp, local_time: f64, fallback: f64) -> f64 {
    clip.keyframes
        .get(&prop)
        .map_or(fallback, |keys| keyframes::evaluate(keys, local_time, fallback))
}

#[must_use]
pub fn resolve_transform(clip: &Clip, local_time: f64) -> ResolvedTransform {
    let base = clip.transform;
    ResolvedTransform {
        x: animated(clip, AnimatableProp::X, local_time, base.x),
        y: animated(clip, AnimatableProp::Y, local_time, base.y),
        scale: animated(clip, AnimatableProp::Scale, local_time, base.scale),
        scale_x: animated(clip, AnimatableProp::ScaleX, local_time, base.scale_x),
        scale_y: animated(clip, AnimatableProp::ScaleY, local_time, base.scale_y),
        rotation: animated(clip, AnimatableProp::Rotation, local_time, base.rotation),
    }
}

#[must_use]
pub fn resolve_mask(clip: &Clip, local_time: f64) -> Option<Mask> {
    let base = clip.mask?;
    Some(Mask {
        center_x: animated(clip, AnimatableProp::MaskCenterX, local_time, base.center_x),
        center_y: animated(clip, AnimatableProp::MaskCenterY, local_time, base.center_y),
        width: animated(clip, AnimatableProp::MaskWidth, local_time, base.width),
        height: animated(clip, AnimatableProp::MaskHeight, local_time, base.height),
        feather: animated(clip, AnimatableProp::MaskFeather, local_time, base.feather).max(0.0),
        ..base
    })
}

/// Placement of a clip's content inside the output frame.
///
/// Content is fitted into the frame preserving aspect ratio, centred, then
/// offset, scaled and rotated about its own centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipGeometry {
    pub box_width: f64,
    pub box_height: f64,
    pub center: (f64, f64),
    pub scale: (f64, f64),
    sin: f64,
    cos: f64,
}

impl ClipGeometry {
    #[must_use]
    pub fn new(
        transform: &ResolvedTransform,
        content_size: (u32, u32),
        frame_size: (u32, u32),
    ) -> Self {
        let (content_width, content_height) =
            (f64::from(content_size.0.max(1)), f64::from(content_size.1.max(1)));
        let (frame_width, frame_height) = (f64::from(frame_size.0), f64::from(frame_size.1));
        let fit = (frame_width / content_width).min(frame_height / content_height);
        let radians = transform.rotation.to_radians();
        Self {
            box_width: content_width * fit,
            box_height: content_height * fit,
            center: (frame_width / 2.0 + transform.x, frame_height / 2.0 + transform.y),
            scale: transform.effective_scale(),
            sin: radians.sin(),
            cos: radians.cos(),
        }
    }

    /// Maps a point in box pixels (origin top-left of the box) to the frame.
    #[must_use]
    pub fn box_to_frame(&self, u: f64, v: f64) -> (f64, f64) {
        let dx = (u - self.box_width / 2.0) * self.scale.0;
        let dy = (v - self.box_height / 2.0) * self.scale.1;
        (
            self.center.0 + dx * self.cos - dy * self.sin,
            self.center.1 + dx * self.sin + dy * self.cos,
        )
    }

    /// Maps a frame point back into box pixels, `None` when it falls outside
    /// the box or the scale collapses it.
    #[must_use]
    pub fn frame_to_box(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if self.scale.0.abs() < f64::EPSILON || self.scale.1.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.center.0;
        let dy = y - self.center.1;
        let rx = dx * self.cos + dy * self.sin;
        let ry = -dx * self.sin + dy * self.cos;
        let u = rx / self.scale.0 + self.box_width / 2.0;
        let v = ry / self.scale.1 + self.box_height / 2.0;
        if u < 0.0 || v < 0.0 || u >= self.box_width || v >= self.box_height {
            return None;
        }
        Some((u, v))
    }

    /// Corners in frame pixels: top-left, top-right, bottom-right, bottom-left.
    #[must_use]
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            self.box_to_frame(0.0, 0.0),
            self.box_to_frame(self.box_width, 0.0),
            self.box_to_frame(self.box_width, self.box_height),
            self.box_to_frame(0.0, self.box_height),
        ]
    }

    /// Axis-aligned frame bounds `(min_x, min_y, max_x, max_y)`.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.corners().iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }

    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.frame_to_box(x, y).is_some()
    }
}

/// Mask coverage in `[0, 1]` for a point given in box pixels.
#[must_use]
pub fn mask_coverage(mask: &Mask, u: f64, v: f64, box_width: f64, box_height: f64) -> f64 {
    let inside = match mask.shape {
        MaskShape::None => return 1.0,
        MaskShape::Rectangle | MaskShape::Ellipse => {
            let half_width = (mask.width * box_width / 2.0).max(0.0);
            let half_height = (mask.height * box_height / 2.0).max(0.0);
            let radians = mask.rotation.to_radians();
            let dx = u - mask.center_x * box_width;
            let dy = v - mask.center_y * box_height;
            let px = dx * radians.cos() + dy * radians.sin();
            let py = -dx * radians.sin() + dy * radians.cos();
            let distance = if mask.shape == MaskShape::Rectangle {
                rounded_rect_distance(px, py, half_width, half_height, mask.corner_radius)
            } else {
                ellipse_distance(px, py, half_width, half_height)
            };
            if mask.feather > 0.0 {
                (0.5 - distance / mask.feather).clamp(0.0, 1.0)
            } else if distance <= 0.0 {
                1.0
            } else {
                0.0
            }
        }
    };

    if mask.inverted { 1.0 - inside } else { inside }
}

fn rounded_rect_distance(px: f64, py: f64, half_width: f64, half_height: f64, radius: f64) -> f64 {
    let radius = radius.clamp(0.0, half_width.min(half_height));
    let qx = px.abs() - half_width + radius;
    let qy = py.abs() - half_height + radius;
    let outside = qx.max(0.0).hypot(qy.max(0.0));
    outside + qx.max(qy).min(0.0) - radius
}

fn ellipse_distance(px: f64, py: f64, half_width: f64, half_height: f64) -> f64 {
    if half_width <= 0.0 || half_height <= 0.0 {
        return f64::MAX;
    }
    let normalized = (px / half_width).hypot(py / half_height);
    (normalized - 1.0) * half_width.min(half_height)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::model::{Easing, Keyframe, MediaKind, MediaSource};

    fn animated_clip() -> Clip {
        let media = MediaSource::new("shot", "shot.mp4", MediaKind::Video, 4.0);
        let mut clip = Clip::from_media(&media, Uuid::new_v4(), 0.0);
        clip.transform.y = 12.0;
        clip.keyframes.insert(
            AnimatableProp::X,
            vec![
                Keyframe::new(0.0, 0.0, Easing::Linear),
                Keyframe::new(2.0, 100.0, Easing::Linear),
            ],
        );
        clip.mask = Some(Mask {
            shape: MaskShape::Ellipse,
            ..Mask::default()
        });
        clip.keyframes.insert(
            AnimatableProp::MaskWidth,
            vec![
                Keyframe::new(0.0, 1.0, Easing::EaseOut),
                Keyframe::new(1.0, 0.5, Easing::Linear),
            ],
        );
        clip
    }

    #[test]
    fn keyframed_props_animate_and_static_props_pass_through() {
        let clip = animated_clip();
        let resolved = resolve_transform(&clip, 1.0);
        assert!((resolved.x - 50.0).abs() < 1e-12);
        assert!((resolved.y - 12.0).abs() < f64::EPSILON);
        assert!((resolved.scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mask_is_absent_without_a_base_mask() {
        let mut clip = animated_clip();
        clip.mask = None;
        assert!(resolve_mask(&clip, 0.5).is_none());
    }

    #[test]
    fn mask_sub_properties_animate() {
        let clip = animated_clip();
        let mask = resolve_mask(&clip, 2.0).expect("mask should resolve");
        assert_eq!(mask.shape, MaskShape::Ellipse);
        assert!((mask.width - 0.5).abs() < 1e-12);
        assert!((mask.height - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn geometry_round_trips_through_rotation() {
        let transform = ResolvedTransform {
            x: 10.0,
            y: -4.0,
            scale: 0.5,
            scale_x: 1.0,
            scale_y: 2.0,
            rotation: 30.0,
        };
        let geometry = ClipGeometry::new(&transform, (160, 90), (320, 180));
        let (x, y) = geometry.box_to_frame(40.0, 25.0);
        let (u, v) = geometry.frame_to_box(x, y).expect("point should map back");
        assert!((u - 40.0).abs() < 1e-9);
        assert!((v - 25.0).abs() < 1e-9);
    }

    #[test]
    fn identity_geometry_fills_the_frame() {
        let geometry = ClipGeometry::new(&Transform::default().into(), (640, 360), (320, 180));
        assert_eq!(geometry.bounds(), (0.0, 0.0, 320.0, 180.0));
        assert!(geometry.contains(1.0, 1.0));
        assert!(!geometry.contains(321.0, 1.0));
    }

    #[test]
    fn inverted_mask_flips_coverage() {
        let mask = Mask {
            width: 0.5,
            height: 0.5,
            ..Mask::default()
        };
        assert!((mask_coverage(&mask, 50.0, 50.0, 100.0, 100.0) - 1.0).abs() < f64::EPSILON);
        assert!(mask_coverage(&mask, 5.0, 5.0, 100.0, 100.0).abs() < f64::EPSILON);
        let inverted = Mask {
            inverted: true,
            ..mask
        };
        assert!(mask_coverage(&inverted, 5.0, 5.0, 100.0, 100.0) > 0.99);
    }

    #[test]
    fn feather_softens_the_edge() {
        let mask = Mask {
            shape: MaskShape::Ellipse,
            width: 0.5,
            height: 0.5,
            feather: 10.0,
            ..Mask::default()
        };
        let edge = mask_coverage(&mask, 75.0, 50.0, 100.0, 100.0);
        assert!((edge - 0.5).abs() < 1e-9);
    }
}
