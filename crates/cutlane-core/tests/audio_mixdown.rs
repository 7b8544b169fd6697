use cutlane_core::{
    ClipPatch, DecodedAudio, Engine, MediaKind, MediaSource, PlaceClipRequest, PropValue,
    TrackPatch,
    audio::{chunks, collect_placements},
    decode_audio_file,
    fixtures::sine_tone,
    media::memory::{MemoryLibrary, TITLE_CARD_ID, TitleCardRenderer},
    mix_project, write_wav,
};
use uuid::Uuid;

const RATE: u32 = 100;

/// Mono ramp where frame `i` holds `i / 1000`.
fn ramp(frames: usize) -> DecodedAudio {
    DecodedAudio {
        sample_rate: RATE,
        channels: 1,
        samples: (0..frames).map(|frame| frame as f32 / 1000.0).collect(),
    }
}

fn place(engine: &mut Engine, media_id: Uuid, track_id: Uuid, start_time: f64) -> Uuid {
    engine
        .place_clip(PlaceClipRequest {
            media_id,
            track_id,
            start_time,
        })
        .expect("placement")
        .id
}

#[test]
fn trimmed_audio_lands_at_its_timeline_offset() {
    let mut engine = Engine::default();
    let track = engine.add_track("A1");
    let media = engine.add_media_source(MediaSource::new("ramp", "ramp.wav", MediaKind::Audio, 4.0));
    let clip_id = place(&mut engine, media.id, track.id, 1.0);
    engine
        .update_clip(
            clip_id,
            ClipPatch {
                trim_start: Some(0.5),
                duration: Some(3.5),
                ..ClipPatch::default()
            },
        )
        .expect("trim");
    let mut library = MemoryLibrary::new();
    library.insert_audio(media.id, ramp(400));

    let mixdown = mix_project(engine.project(), &library, RATE, 1);
    let samples = &mixdown.audio.samples;
    assert_eq!(mixdown.placements, 1);
    assert_eq!(samples.len(), 450);
    assert!(samples[99].abs() < 1e-6);
    assert!((samples[100] - 0.05).abs() < 1e-6);
    assert!((samples[200] - 0.15).abs() < 1e-6);
    assert!((samples[449] - 0.399).abs() < 1e-6);
}

#[test]
fn muted_tracks_stay_out_of_the_mix() {
    let mut engine = Engine::default();
    let loud = engine.add_track("loud");
    let quiet = engine.add_track("quiet");
    let media = engine.add_media_source(MediaSource::new("ramp", "ramp.wav", MediaKind::Audio, 2.0));
    place(&mut engine, media.id, loud.id, 0.0);
    place(&mut engine, media.id, quiet.id, 0.0);
    let mut library = MemoryLibrary::new();
    library.insert_audio(media.id, ramp(200));

    let doubled = mix_project(engine.project(), &library, RATE, 1);
    assert!((doubled.audio.samples[50] - 0.1).abs() < 1e-6);

    engine
        .update_track(
            quiet.id,
            TrackPatch {
                muted: Some(true),
                ..TrackPatch::default()
            },
        )
        .expect("mute");
    let single = mix_project(engine.project(), &library, RATE, 1);
    assert_eq!(single.placements, 1);
    assert!((single.audio.samples[50] - 0.05).abs() < 1e-6);
}

#[test]
fn the_mix_is_clamped_and_resampled() {
    let mut engine = Engine::default();
    let media = engine.add_media_source(MediaSource::new("loud", "loud.wav", MediaKind::Audio, 1.0));
    for name in ["one", "two", "three"] {
        let track = engine.add_track(name);
        place(&mut engine, media.id, track.id, 0.0);
    }
    let mut library = MemoryLibrary::new();
    library.insert_audio(
        media.id,
        DecodedAudio {
            sample_rate: RATE * 2,
            channels: 2,
            samples: vec![0.5; 400],
        },
    );

    let mixdown = mix_project(engine.project(), &library, RATE, 2);
    assert_eq!(mixdown.audio.frame_count(), 100);
    assert!(
        mixdown
            .audio
            .samples
            .iter()
            .all(|sample| (sample - 1.0).abs() < f32::EPSILON)
    );
}

#[test]
fn component_media_references_contribute_audio() {
    let mut engine = Engine::default();
    let track = engine.add_track("Titles");
    let music = engine.add_media_source(MediaSource::new("music", "music.wav", MediaKind::Audio, 10.0));
    let card = engine.add_media_source(MediaSource::component(
        "card",
        TITLE_CARD_ID,
        TitleCardRenderer::inputs(),
    ));
    let clip_id = place(&mut engine, card.id, track.id, 2.0);
    assert!(collect_placements(engine.project()).is_empty());

    engine
        .set_clip_prop(clip_id, "background", PropValue::Media(Some(music.id)))
        .expect("reference music");
    let placements = collect_placements(engine.project());
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].clip_id, clip_id);
    assert_eq!(placements[0].media_id, music.id);
    assert!((placements[0].timeline_start - 2.0).abs() < f64::EPSILON);

    let mut library = MemoryLibrary::new();
    library.insert_audio(music.id, ramp(1_000));
    let mixdown = mix_project(engine.project(), &library, RATE, 1);
    assert!(mixdown.audio.samples[199].abs() < 1e-6);
    assert!((mixdown.audio.samples[210] - 0.01).abs() < 1e-6);
}

#[test]
fn chunks_carry_sample_accurate_timestamps() {
    let audio = sine_tone(440.0, 1.0, 8_000);
    let stamps: Vec<f64> = chunks(&audio, 1_024).map(|(time, _)| time).collect();
    assert_eq!(stamps.len(), 8);
    assert!((stamps[1] - 0.128).abs() < 1e-12);
    let total: usize = chunks(&audio, 1_024).map(|(_, samples)| samples.len()).sum();
    assert_eq!(total, audio.samples.len());
}

#[test]
fn wav_mixdown_reads_back_through_the_decoder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mix").join("tone.wav");
    let tone = sine_tone(220.0, 0.25, 8_000);

    write_wav(&tone, &path).expect("write wav");
    let decoded = decode_audio_file(&path).expect("decode wav");

    assert_eq!(decoded.sample_rate, 8_000);
    assert_eq!(decoded.channels, 2);
    assert_eq!(decoded.frame_count(), tone.frame_count());
    let step = 1.0 / f32::from(i16::MAX);
    for (decoded, original) in decoded.samples.iter().zip(&tone.samples) {
        assert!((decoded - original).abs() <= step * 1.5);
    }
}
