use crate::model::TIME_EPSILON;

/// Number of frames needed to cover `duration_seconds` at `fps`.
#[must_use]
pub fn total_frames(duration_seconds: f64, fps: f64) -> u64 {
    if duration_seconds <= 0.0 || fps <= 0.0 {
        return 0;
    }

    (duration_seconds * fps - TIME_EPSILON).ceil().max(0.0) as u64
}

#[must_use]
pub fn frame_to_seconds(frame: u64, fps: f64) -> f64 {
    if fps <= 0.0 {
        return 0.0;
    }

    frame as f64 / fps
}

#[must_use]
pub fn seconds_to_frame(seconds: f64, fps: f64) -> u64 {
    if seconds <= 0.0 || fps <= 0.0 {
        return 0;
    }

    (seconds * fps + TIME_EPSILON).floor() as u64
}

#[must_use]
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).round() as u64
}

#[must_use]
pub fn samples_to_seconds(samples: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    samples as f64 / f64::from(sample_rate)
}

/// Frames between forced encoder keyframes, never less than one.
#[must_use]
pub fn keyframe_interval_frames(interval_seconds: f64, fps: f64) -> u64 {
    ((interval_seconds * fps).round() as u64).max(1)
}
