use cutlane_core::{
    ClipDrag, DropOutcome, DropRequest, DropZone, Engine, EngineError, MediaKind, MediaSource,
    PlaceClipRequest, PointerEvent, SnapSettings, TrimEdge, TrimRequest,
    config::EditingConfig,
    editing::{DragLayout, GesturePhase},
    model::MIN_CLIP_DURATION,
};
use uuid::Uuid;

const EPS: f64 = 1e-9;

struct Timeline {
    engine: Engine,
    tracks: Vec<Uuid>,
}

impl Timeline {
    fn new(track_count: usize) -> Self {
        let mut engine = Engine::default();
        let tracks = (0..track_count)
            .map(|index| engine.add_track(&format!("V{}", index + 1)).id)
            .collect();
        Self { engine, tracks }
    }

    fn place(&mut self, kind: MediaKind, duration: f64, track: usize, start_time: f64) -> Uuid {
        let media = self.engine.add_media_source(MediaSource::new(
            "media",
            "media.bin",
            kind,
            duration,
        ));
        self.engine
            .place_clip(PlaceClipRequest {
                media_id: media.id,
                track_id: self.tracks[track],
                start_time,
            })
            .expect("placement should succeed")
            .id
    }

    fn span(&self, clip_id: Uuid) -> (f64, f64) {
        let clip = self.engine.project().clip(clip_id).expect("clip exists");
        (clip.start_time, clip.end_time())
    }
}

fn assert_span(actual: (f64, f64), expected: (f64, f64)) {
    assert!(
        (actual.0 - expected.0).abs() < EPS && (actual.1 - expected.1).abs() < EPS,
        "expected {expected:?}, got {actual:?}"
    );
}

#[test]
fn ripple_trim_shifts_later_clips_by_the_end_delta() {
    let mut timeline = Timeline::new(1);
    let a = timeline.place(MediaKind::Video, 5.0, 0, 0.0);
    let b = timeline.place(MediaKind::Video, 3.0, 0, 5.0);

    timeline
        .engine
        .trim_clip(
            a,
            TrimRequest {
                edge: TrimEdge::End,
                delta: -2.0,
                ripple: true,
            },
        )
        .expect("ripple trim");

    assert_span(timeline.span(a), (0.0, 3.0));
    assert_span(timeline.span(b), (3.0, 6.0));
}

#[test]
fn ripple_preserves_gaps_between_later_clips() {
    let mut timeline = Timeline::new(1);
    let a = timeline.place(MediaKind::Image, 0.0, 0, 0.0);
    let b = timeline.place(MediaKind::Video, 2.0, 0, 6.0);
    let c = timeline.place(MediaKind::Video, 2.0, 0, 9.0);

    timeline
        .engine
        .trim_clip(
            a,
            TrimRequest {
                edge: TrimEdge::End,
                delta: 1.5,
                ripple: true,
            },
        )
        .expect("ripple extend");

    assert_span(timeline.span(a), (0.0, 6.5));
    assert_span(timeline.span(b), (7.5, 9.5));
    assert_span(timeline.span(c), (10.5, 12.5));
}

#[test]
fn trims_clamp_and_keep_the_trim_invariant() {
    let mut timeline = Timeline::new(1);
    let clip_id = timeline.place(MediaKind::Video, 5.0, 0, 2.0);

    for (edge, delta) in [
        (TrimEdge::Start, 1.0),
        (TrimEdge::End, -1.5),
        (TrimEdge::Start, -4.0),
        (TrimEdge::End, 20.0),
        (TrimEdge::Start, 20.0),
    ] {
        timeline
            .engine
            .trim_clip(
                clip_id,
                TrimRequest {
                    edge,
                    delta,
                    ripple: false,
                },
            )
            .expect("trims clamp instead of failing");
        let clip = timeline.engine.project().clip(clip_id).expect("clip");
        assert!(clip.trim_start + clip.trim_end <= clip.original_duration + EPS);
        assert!(
            (clip.duration - (clip.original_duration - clip.trim_start - clip.trim_end)).abs()
                < EPS
        );
        assert!(clip.duration >= MIN_CLIP_DURATION - EPS);
    }

    let clip = timeline.engine.project().clip(clip_id).expect("clip");
    assert!((clip.duration - MIN_CLIP_DURATION).abs() < EPS);
    assert!((clip.end_time() - 7.0).abs() < EPS);
}

#[test]
fn non_ripple_growth_stops_at_the_neighbour() {
    let mut timeline = Timeline::new(1);
    let still = timeline.place(MediaKind::Image, 0.0, 0, 0.0);
    let next = timeline.place(MediaKind::Video, 2.0, 0, 6.0);

    timeline
        .engine
        .trim_clip(
            still,
            TrimRequest {
                edge: TrimEdge::End,
                delta: 10.0,
                ripple: false,
            },
        )
        .expect("extend");
    assert_span(timeline.span(still), (0.0, 6.0));
    assert_span(timeline.span(next), (6.0, 8.0));

    let later = timeline.place(MediaKind::Video, 4.0, 0, 10.0);
    timeline
        .engine
        .trim_clip(
            later,
            TrimRequest {
                edge: TrimEdge::Start,
                delta: 1.0,
                ripple: false,
            },
        )
        .expect("trim start");
    timeline
        .engine
        .trim_clip(
            later,
            TrimRequest {
                edge: TrimEdge::Start,
                delta: -5.0,
                ripple: false,
            },
        )
        .expect("reveal start");
    assert_span(timeline.span(later), (10.0, 14.0));
}

#[test]
fn moves_snap_to_neighbour_edges() {
    let mut timeline = Timeline::new(1);
    let moving = timeline.place(MediaKind::Video, 5.0, 0, 0.0);
    timeline.place(MediaKind::Video, 3.0, 0, 10.0);
    let snap = SnapSettings {
        enabled: true,
        threshold_px: 8.0,
        zoom: 100.0,
    };

    let moved = timeline
        .engine
        .move_clip(moving, 5.05, None, Some(&snap))
        .expect("move near neighbour");
    assert!((moved.start_time - 5.0).abs() < EPS);

    let unsnapped = timeline
        .engine
        .move_clip(moving, 2.5, None, Some(&snap))
        .expect("free move");
    assert!((unsnapped.start_time - 2.5).abs() < EPS);

    let before = timeline.engine.snapshot();
    let collision = timeline.engine.move_clip(moving, 9.0, None, None);
    assert!(matches!(
        collision,
        Err(EngineError::PlacementRejected { .. })
    ));
    assert_eq!(timeline.engine.project(), &before);
}

#[test]
fn edge_drop_on_an_occupied_track_inserts_a_new_track() {
    let mut timeline = Timeline::new(2);
    let resident = timeline.place(MediaKind::Video, 5.0, 0, 0.0);
    let dragged = timeline.place(MediaKind::Video, 5.0, 1, 0.0);

    let middle = timeline.engine.drop_clip(DropRequest {
        clip_id: dragged,
        track_index: 0,
        zone: DropZone::Middle,
        start_time: 0.0,
    });
    assert!(matches!(
        middle,
        Err(EngineError::PlacementRejected { conflict, .. }) if conflict == resident
    ));

    let outcome = timeline
        .engine
        .drop_clip(DropRequest {
            clip_id: dragged,
            track_index: 0,
            zone: DropZone::Above,
            start_time: 0.0,
        })
        .expect("edge drop inserts a track");
    let DropOutcome::InsertedTrack { track_id, index } = outcome else {
        panic!("expected a new track, got {outcome:?}");
    };
    assert_eq!(index, 0);
    let project = timeline.engine.project();
    assert_eq!(project.tracks.len(), 3);
    assert_eq!(project.tracks[0].id, track_id);
    assert_eq!(project.clip(dragged).expect("clip").track_id, track_id);
    assert!(!project.has_overlaps());
}

#[test]
fn drop_on_a_track_with_room_reassigns() {
    let mut timeline = Timeline::new(2);
    timeline.place(MediaKind::Video, 5.0, 0, 0.0);
    let dragged = timeline.place(MediaKind::Video, 2.0, 1, 0.0);

    for zone in [DropZone::Middle, DropZone::Below] {
        let outcome = timeline
            .engine
            .drop_clip(DropRequest {
                clip_id: dragged,
                track_index: 0,
                zone,
                start_time: 6.0,
            })
            .expect("free space accepts the clip");
        assert_eq!(
            outcome,
            DropOutcome::Reassigned {
                track_id: timeline.tracks[0]
            }
        );
    }
    assert_eq!(timeline.engine.project().tracks.len(), 2);
}

fn drag_layout() -> DragLayout {
    let layout = EditingConfig {
        snap_enabled: false,
        default_zoom_px_per_second: 100.0,
        drop_edge_fraction: 0.25,
        track_row_height_px: 40.0,
        ..EditingConfig::default()
    }
    .drag_layout();
    assert!(!layout.snap.enabled);
    assert!((layout.row_height - 40.0).abs() < EPS);
    layout
}

#[test]
fn a_whole_drag_is_one_undo_step() {
    let mut timeline = Timeline::new(1);
    let clip_id = timeline.place(MediaKind::Video, 2.0, 0, 0.0);
    let depth = timeline.engine.history().undo_labels().len();
    let mut drag = ClipDrag::new(drag_layout());

    drag.handle(
        &mut timeline.engine,
        PointerEvent::Down {
            clip_id,
            x: 0.0,
            y: 20.0,
        },
    )
    .expect("down");
    assert!(matches!(drag.phase(), GesturePhase::Dragging(_)));
    for x in [100.0, 200.0, 300.0] {
        drag.handle(&mut timeline.engine, PointerEvent::Move { x, y: 20.0 })
            .expect("move");
    }
    let outcome = drag
        .handle(&mut timeline.engine, PointerEvent::Up { x: 300.0, y: 20.0 })
        .expect("up");
    assert!(outcome.is_none());
    assert_eq!(drag.phase(), GesturePhase::Idle);

    assert_span(timeline.span(clip_id), (3.0, 5.0));
    let labels = timeline.engine.history().undo_labels();
    assert_eq!(labels.len(), depth + 1);
    assert_eq!(labels.last(), Some(&"drag clip"));

    timeline.engine.undo().expect("undo drag");
    assert_span(timeline.span(clip_id), (0.0, 2.0));
    timeline.engine.redo().expect("redo drag");
    assert_span(timeline.span(clip_id), (3.0, 5.0));
}

#[test]
fn cancelled_drag_restores_the_start_state() {
    let mut timeline = Timeline::new(1);
    let clip_id = timeline.place(MediaKind::Video, 2.0, 0, 1.0);
    let before = timeline.engine.snapshot();
    let depth = timeline.engine.history().undo_labels().len();
    let mut drag = ClipDrag::new(drag_layout());

    drag.handle(
        &mut timeline.engine,
        PointerEvent::Down {
            clip_id,
            x: 50.0,
            y: 10.0,
        },
    )
    .expect("down");
    drag.handle(&mut timeline.engine, PointerEvent::Move { x: 450.0, y: 10.0 })
        .expect("move");
    assert_span(timeline.span(clip_id), (5.0, 7.0));
    drag.handle(&mut timeline.engine, PointerEvent::Cancel)
        .expect("cancel");

    assert_eq!(timeline.engine.project(), &before);
    assert_eq!(timeline.engine.history().undo_labels().len(), depth);
}

#[test]
fn dragging_onto_an_occupied_row_edge_inserts_a_track_in_one_step() {
    let mut timeline = Timeline::new(2);
    timeline.place(MediaKind::Video, 5.0, 0, 0.0);
    let dragged = timeline.place(MediaKind::Video, 5.0, 1, 0.0);
    let depth = timeline.engine.history().undo_labels().len();
    let mut drag = ClipDrag::new(drag_layout());

    drag.handle(
        &mut timeline.engine,
        PointerEvent::Down {
            clip_id: dragged,
            x: 0.0,
            y: 60.0,
        },
    )
    .expect("down");
    let outcome = drag
        .handle(&mut timeline.engine, PointerEvent::Up { x: 0.0, y: 2.0 })
        .expect("up");
    assert!(matches!(
        outcome,
        Some(DropOutcome::InsertedTrack { index: 0, .. })
    ));
    assert_eq!(timeline.engine.project().tracks.len(), 3);
    assert_eq!(timeline.engine.history().undo_labels().len(), depth + 1);

    timeline.engine.undo().expect("undo");
    let project = timeline.engine.project();
    assert_eq!(project.tracks.len(), 2);
    assert_eq!(
        project.clip(dragged).expect("clip").track_id,
        timeline.tracks[1]
    );
}
