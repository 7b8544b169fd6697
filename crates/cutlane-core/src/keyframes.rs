//! Per-property keyframe evaluation.
//!
//! Evaluation is a pure function of the keyframe slice, so the preview and the
//! exporter get identical values for identical inputs.

use uuid::Uuid;

use crate::model::{Easing, Keyframe};

impl Easing {
    /// Maps a linear progress `t` in `[0, 1]` onto this curve.
    #[must_use]
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t * t,
            Self::EaseOut => 1.0 - (1.0 - t).powi(3),
            Self::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }
}

#[must_use]
pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Value of an animated property at `local_time`.
///
/// Holds the first value before the first keyframe (and for a NaN time) and
/// the last value after the last one. `keyframes` must be ordered by time.
#[must_use]
pub fn evaluate(keyframes: &[Keyframe], local_time: f64, fallback: f64) -> f64 {
    let (Some(first), Some(last)) = (keyframes.first(), keyframes.last()) else {
        return fallback;
    };
    if local_time.is_nan() || local_time < first.time {
        return first.value;
    }
    if local_time >= last.time {
        return last.value;
    }

    // First keyframe strictly after `local_time`; its predecessor brackets it.
    let upper = keyframes.partition_point(|keyframe| keyframe.time <= local_time);
    let (Some(from), Some(to)) = (
        upper.checked_sub(1).and_then(|index| keyframes.get(index)),
        keyframes.get(upper),
    ) else {
        return last.value;
    };
    let span = to.time - from.time;
    if span <= 0.0 {
        return to.value;
    }

    let t = (local_time - from.time) / span;
    lerp(from.value, to.value, from.easing.apply(t))
}

/// Inserts `keyframe` keeping time order. A keyframe already sitting at the
/// same time is replaced and its id reused.
pub fn upsert(keyframes: &mut Vec<Keyframe>, mut keyframe: Keyframe) -> Keyframe {
    if let Some(existing) = keyframes
        .iter_mut()
        .find(|existing| (existing.time - keyframe.time).abs() < f64::EPSILON)
    {
        keyframe.id = existing.id;
        *existing = keyframe.clone();
        return keyframe;
    }

    let index = keyframes.partition_point(|existing| existing.time < keyframe.time);
    keyframes.insert(index, keyframe.clone());
    keyframe
}

pub fn remove(keyframes: &mut Vec<Keyframe>, keyframe_id: Uuid) -> Option<Keyframe> {
    let index = keyframes
        .iter()
        .position(|keyframe| keyframe.id == keyframe_id)?;
    Some(keyframes.remove(index))
}

pub fn sort(keyframes: &mut [Keyframe]) {
    keyframes.sort_by(|left, right| left.time.total_cmp(&right.time));
}
