use proptest::prelude::*;
use cutlane_core::{
    DropRequest, DropZone, Engine, MediaKind, MediaSource, PlaceClipRequest, TrimEdge,
    TrimRequest,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Place { media: usize, track: usize, start: f64 },
    Move { clip: usize, start: f64, track: Option<usize> },
    Trim { clip: usize, end_edge: bool, delta: f64, ripple: bool },
    Drop { clip: usize, row: usize, zone: u8, start: f64 },
    Remove { clip: usize },
    Undo,
    Redo,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..4, 0usize..3, 0.0f64..30.0)
            .prop_map(|(media, track, start)| Op::Place { media, track, start }),
        2 => (0usize..16, 0.0f64..30.0, prop::option::of(0usize..3))
            .prop_map(|(clip, start, track)| Op::Move { clip, start, track }),
        2 => (0usize..16, any::<bool>(), -6.0f64..6.0, any::<bool>())
            .prop_map(|(clip, end_edge, delta, ripple)| Op::Trim { clip, end_edge, delta, ripple }),
        1 => (0usize..16, 0usize..4, 0u8..3, 0.0f64..30.0)
            .prop_map(|(clip, row, zone, start)| Op::Drop { clip, row, zone, start }),
        1 => (0usize..16).prop_map(|clip| Op::Remove { clip }),
        1 => Just(Op::Undo),
        1 => Just(Op::Redo),
    ]
}

fn seeded_engine() -> (Engine, Vec<Uuid>) {
    let mut engine = Engine::default();
    for name in ["V1", "V2", "V3"] {
        engine.add_track(name);
    }
    let media = [
        MediaSource::new("long", "long.mp4", MediaKind::Video, 7.5),
        MediaSource::new("short", "short.mp4", MediaKind::Video, 1.25),
        MediaSource::new("still", "still.png", MediaKind::Image, 0.0),
        MediaSource::new("music", "music.wav", MediaKind::Audio, 4.0),
    ]
    .into_iter()
    .map(|source| engine.add_media_source(source).id)
    .collect();
    (engine, media)
}

fn pick_clip(engine: &Engine, index: usize) -> Option<Uuid> {
    let clips = &engine.project().clips;
    (!clips.is_empty()).then(|| clips[index % clips.len()].id)
}

fn pick_track(engine: &Engine, index: usize) -> Uuid {
    let tracks = &engine.project().tracks;
    tracks[index % tracks.len()].id
}

fn apply(engine: &mut Engine, media: &[Uuid], op: &Op) {
    match *op {
        Op::Place { media: index, track, start } => {
            let track_id = pick_track(engine, track);
            let _ = engine.place_clip(PlaceClipRequest {
                media_id: media[index % media.len()],
                track_id,
                start_time: start,
            });
        }
        Op::Move { clip, start, track } => {
            if let Some(clip_id) = pick_clip(engine, clip) {
                let track_id = track.map(|index| pick_track(engine, index));
                let _ = engine.move_clip(clip_id, start, track_id, None);
            }
        }
        Op::Trim { clip, end_edge, delta, ripple } => {
            if let Some(clip_id) = pick_clip(engine, clip) {
                let edge = if end_edge { TrimEdge::End } else { TrimEdge::Start };
                let _ = engine.trim_clip(clip_id, TrimRequest { edge, delta, ripple });
            }
        }
        Op::Drop { clip, row, zone, start } => {
            if let Some(clip_id) = pick_clip(engine, clip) {
                let zone = match zone {
                    0 => DropZone::Above,
                    1 => DropZone::Middle,
                    _ => DropZone::Below,
                };
                let track_index = row % engine.project().tracks.len();
                let _ = engine.drop_clip(DropRequest {
                    clip_id,
                    track_index,
                    zone,
                    start_time: start,
                });
            }
        }
        Op::Remove { clip } => {
            if let Some(clip_id) = pick_clip(engine, clip) {
                let _ = engine.remove_clip(clip_id);
            }
        }
        Op::Undo => {
            let _ = engine.undo();
        }
        Op::Redo => {
            let _ = engine.redo();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_edit_sequences_keep_tracks_free_of_overlaps(ops in prop::collection::vec(op_strategy(), 1..48)) {
        let (mut engine, media) = seeded_engine();
        for op in &ops {
            apply(&mut engine, &media, op);

            let project = engine.project();
            prop_assert!(!project.has_overlaps(), "overlap after {:?}", op);
            for clip in &project.clips {
                prop_assert!(clip.check_timing().is_ok(), "bad timing after {:?}: {:?}", op, clip.check_timing());
                prop_assert!(project.track(clip.track_id).is_some());
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn undoing_everything_restores_the_seeded_project(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let (mut engine, media) = seeded_engine();
        let seeded = engine.snapshot();
        let seeded_depth = engine.history().undo_labels().len();
        for op in &ops {
            if !matches!(op, Op::Undo | Op::Redo) {
                apply(&mut engine, &media, op);
            }
        }

        while engine.history().undo_labels().len() > seeded_depth {
            prop_assert!(engine.undo().is_ok());
        }
        prop_assert_eq!(engine.project(), &seeded);
    }
}
