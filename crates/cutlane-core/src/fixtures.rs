use std::{collections::BTreeMap, f32::consts::TAU, sync::Arc};

use chrono::DateTime;
use uuid::Uuid;

use crate::{
    audio::DecodedAudio,
    media::{
        Raster, RendererRegistry,
        memory::{MemoryLibrary, TITLE_CARD_ID, TitleCardRenderer},
    },
    model::{
        AnimatableProp, Clip, Easing, Keyframe, Mask, MaskShape, MediaKind, MediaSource, Project,
        PropValue, Track, Transform,
    },
};

pub const DEMO_PROJECT_ID: Uuid = Uuid::from_u128(0x9ed0_a3fa_4064_458f_b95f_1fdd_0bc4_f0be);
pub const DEMO_VIDEO_ID: Uuid = Uuid::from_u128(0x5d1c_7f0e_2a41_4b8e_9c33_0a7e_51f2_0001);
pub const DEMO_LOGO_ID: Uuid = Uuid::from_u128(0x5d1c_7f0e_2a41_4b8e_9c33_0a7e_51f2_0002);
pub const DEMO_TONE_ID: Uuid = Uuid::from_u128(0x5d1c_7f0e_2a41_4b8e_9c33_0a7e_51f2_0003);
pub const DEMO_TITLE_ID: Uuid = Uuid::from_u128(0x5d1c_7f0e_2a41_4b8e_9c33_0a7e_51f2_0004);

const DEMO_VIDEO_FPS: f64 = 10.0;
const DEMO_VIDEO_SECONDS: f64 = 4.5;
const DEMO_FRAME_SIZE: (u32, u32) = (64, 36);
const DEMO_SAMPLE_RATE: u32 = 8_000;
const DEMO_CREATED_AT_SECONDS: i64 = 1_771_804_800;

fn fixture_id(value: u128) -> Uuid {
    Uuid::from_u128(value)
}

#[must_use]
pub fn demo_media() -> Vec<MediaSource> {
    let mut video = MediaSource::new(
        "Sunrise",
        "media/sunrise.mp4",
        MediaKind::Video,
        DEMO_VIDEO_SECONDS,
    );
    video.id = DEMO_VIDEO_ID;
    let mut logo = MediaSource::new("Logo", "media/logo.png", MediaKind::Image, 0.0);
    logo.id = DEMO_LOGO_ID;
    let mut tone = MediaSource::new("Tone", "media/tone.wav", MediaKind::Audio, 4.0);
    tone.id = DEMO_TONE_ID;
    let mut title = MediaSource::component(
        "Title card",
        TITLE_CARD_ID,
        TitleCardRenderer::inputs(),
    );
    title.id = DEMO_TITLE_ID;
    vec![video, logo, tone, title]
}

/// Four tracks: a trimmed and zoomed video, a masked logo overlay, a title
/// card using the logo as its background, and a music bed.
#[must_use]
pub fn demo_project() -> Project {
    let mut project = Project::new("Cutlane Demo");
    project.id = DEMO_PROJECT_ID;
    let fixed_timestamp = DateTime::from_timestamp(DEMO_CREATED_AT_SECONDS, 0).unwrap_or_default();
    project.created_at = fixed_timestamp;
    project.updated_at = fixed_timestamp;
    project.media = demo_media();

    let mut tracks = Vec::new();
    for (index, name) in ["Background", "Overlay", "Titles", "Music"].into_iter().enumerate() {
        let mut track = Track::new(name);
        track.id = fixture_id(0xa959_fd97_0e35_445d_a7e8_fe6d_81d4_9200 + index as u128);
        tracks.push(track);
    }
    let [background, overlay, titles, music] = [0, 1, 2, 3].map(|index| tracks[index].id);
    project.tracks = tracks;

    let media = |id: Uuid| {
        project
            .media
            .iter()
            .find(|media| media.id == id)
            .cloned()
            .unwrap_or_else(|| MediaSource::new("missing", "", MediaKind::Image, 0.0))
    };

    let mut sunrise = Clip::from_media(&media(DEMO_VIDEO_ID), background, 0.0);
    sunrise.id = fixture_id(0xfbf4_1a8f_c5b4_464b_a9f3_6e62_eebf_6e01);
    sunrise.trim_start = 0.5;
    sunrise.duration = DEMO_VIDEO_SECONDS - 0.5;
    sunrise.keyframes.insert(
        AnimatableProp::Scale,
        vec![
            keyframe(0xc0de_0001, 0.0, 1.0, Easing::EaseInOut),
            keyframe(0xc0de_0002, 4.0, 1.2, Easing::Linear),
        ],
    );

    let mut logo = Clip::from_media(&media(DEMO_LOGO_ID), overlay, 1.0);
    logo.id = fixture_id(0xfbf4_1a8f_c5b4_464b_a9f3_6e62_eebf_6e02);
    logo.duration = 2.0;
    logo.original_duration = 2.0;
    logo.transform = Transform {
        x: 18.0,
        y: -8.0,
        scale: 0.35,
        ..Transform::default()
    };
    logo.mask = Some(Mask {
        shape: MaskShape::Ellipse,
        feather: 3.0,
        ..Mask::default()
    });
    logo.keyframes.insert(
        AnimatableProp::Rotation,
        vec![
            keyframe(0xc0de_0003, 0.0, 0.0, Easing::Linear),
            keyframe(0xc0de_0004, 2.0, 90.0, Easing::Linear),
        ],
    );

    let mut title = Clip::from_media(&media(DEMO_TITLE_ID), titles, 0.0);
    title.id = fixture_id(0xfbf4_1a8f_c5b4_464b_a9f3_6e62_eebf_6e03);
    title.duration = 1.5;
    title.original_duration = 1.5;
    title.transform.scale = 0.5;
    title.transform.y = 9.0;
    title.props = BTreeMap::from([
        ("title".to_string(), PropValue::Text("Cutlane".to_string())),
        ("color".to_string(), PropValue::Color("#1b3a5cd0".to_string())),
        ("bar_color".to_string(), PropValue::Color("#ffd166".to_string())),
        ("background".to_string(), PropValue::Media(Some(DEMO_LOGO_ID))),
    ]);

    let mut tone = Clip::from_media(&media(DEMO_TONE_ID), music, 0.0);
    tone.id = fixture_id(0xfbf4_1a8f_c5b4_464b_a9f3_6e62_eebf_6e04);

    project.clips = vec![sunrise, logo, title, tone];
    project
}

fn keyframe(id: u128, time: f64, value: f64, easing: Easing) -> Keyframe {
    Keyframe {
        id: fixture_id(id),
        time,
        value,
        easing,
    }
}

/// Synthetic decoded media for every source in [`demo_project`].
#[must_use]
pub fn demo_library() -> MemoryLibrary {
    let mut library = MemoryLibrary::new();
    let frame_count = (DEMO_VIDEO_SECONDS * DEMO_VIDEO_FPS).round() as usize;
    let frames = (0..frame_count).map(sunrise_frame).collect();
    library.insert_frames(DEMO_VIDEO_ID, frames, DEMO_VIDEO_FPS);
    library.insert_still(DEMO_LOGO_ID, logo_still());
    library.insert_audio(DEMO_TONE_ID, sine_tone(440.0, 4.0, DEMO_SAMPLE_RATE));
    library
}

#[must_use]
pub fn demo_registry() -> RendererRegistry {
    let mut registry = RendererRegistry::new();
    registry.register(Arc::new(TitleCardRenderer));
    registry
}

fn sunrise_frame(index: usize) -> Raster {
    let (width, height) = DEMO_FRAME_SIZE;
    let mut raster = Raster::new(width, height);
    let glow = (index * 5 % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let red = (x * 255 / width.max(1)) as u8;
            let blue = (y * 255 / height.max(1)) as u8;
            raster.set_pixel(x, y, [red, glow, blue, 255]);
        }
    }
    raster
}

fn logo_still() -> Raster {
    let mut raster = Raster::new(16, 16);
    for y in 0..16 {
        for x in 0..16 {
            let checker = (x / 4 + y / 4) % 2 == 0;
            let rgba = if checker {
                [255, 255, 255, 255]
            } else {
                [230, 57, 70, 255]
            };
            raster.set_pixel(x, y, rgba);
        }
    }
    raster
}

/// Stereo sine at half amplitude, slightly quieter on the right channel.
#[must_use]
pub fn sine_tone(frequency: f32, seconds: f64, sample_rate: u32) -> DecodedAudio {
    let frames = (seconds * f64::from(sample_rate)).round() as usize;
    let mut samples = Vec::with_capacity(frames * 2);
    for frame in 0..frames {
        let phase = TAU * frequency * frame as f32 / sample_rate as f32;
        let value = phase.sin() * 0.5;
        samples.push(value);
        samples.push(value * 0.8);
    }
    DecodedAudio {
        sample_rate,
        channels: 2,
        samples,
    }
}
