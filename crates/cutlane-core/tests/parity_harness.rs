use cutlane_core::{
    AnimatableProp, Easing, Engine, ExportSettings, generate_parity_report,
    fixtures::{DEMO_PROJECT_ID, demo_library, demo_project, demo_registry},
    parity::{read_parity_report, write_parity_report},
};

fn settings() -> ExportSettings {
    ExportSettings {
        width: 48,
        height: 27,
        fps: 4.0,
        audio_sample_rate: 8_000,
        ..ExportSettings::default()
    }
}

#[test]
fn repeated_runs_produce_identical_fingerprints() {
    let project = demo_project();
    let first = generate_parity_report(&project, &demo_library(), &demo_registry(), &settings())
        .expect("first report");
    let second = generate_parity_report(&project, &demo_library(), &demo_registry(), &settings())
        .expect("second report");

    assert_eq!(first, second);
    assert_eq!(first.project_id, DEMO_PROJECT_ID.to_string());
    assert_eq!(first.frame_count, 16);
    assert_eq!(first.track_count, 4);
    assert_eq!(first.clip_count, 4);
    assert_eq!(first.render_failures, 0);
}

#[test]
fn a_keyframe_edit_changes_plan_and_pixels_but_not_audio() {
    let baseline =
        generate_parity_report(&demo_project(), &demo_library(), &demo_registry(), &settings())
            .expect("baseline");

    let mut engine = Engine::new(demo_project());
    let logo = engine.project().clips[1].id;
    engine
        .add_keyframe(logo, AnimatableProp::X, 1.0, -12.0, Easing::EaseOut)
        .expect("keyframe");
    let edited =
        generate_parity_report(engine.project(), &demo_library(), &demo_registry(), &settings())
            .expect("edited");

    assert_ne!(baseline.project_hash, edited.project_hash);
    assert_ne!(baseline.plan_hash, edited.plan_hash);
    assert_ne!(baseline.pixel_hash, edited.pixel_hash);
    assert_eq!(baseline.audio_hash, edited.audio_hash);
}

#[test]
fn reports_round_trip_through_disk() {
    let report =
        generate_parity_report(&demo_project(), &demo_library(), &demo_registry(), &settings())
            .expect("report");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("parity").join("report.json");

    write_parity_report(&path, &report).expect("write");
    let loaded = read_parity_report(&path).expect("read");
    assert_eq!(loaded, report);
}
