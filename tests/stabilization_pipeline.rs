use std::sync::Arc;

use unshake::ingest::{SceneMotion, SyntheticScene};
use unshake::quality::cropping_ratio;
use unshake::stabilize::HISTORY_CAPACITY;
use unshake::{
    stabilize_stream, CpuBackend, FileSource, FrameSource, HomographyConfig, HomographyStabilizer,
    ImageSequenceSink, MemorySink, Method, RigidConfig, RigidStabilizer, StabilizeConfig,
    Stabilizer, StubBackend, TrackingState, VisionBackend,
};

fn cpu() -> Arc<dyn VisionBackend> {
    Arc::new(CpuBackend::new())
}

#[test]
fn rigid_path_recovers_constant_pan() {
    let (dx, dy) = (2.0, 1.0);
    let steps = 10;
    let scene = SyntheticScene::new(128, 96, steps + 1, SceneMotion::Pan { dx, dy });
    let mut stabilizer = RigidStabilizer::new(RigidConfig::default(), cpu());
    let mut sink = MemorySink::new();

    let summary =
        stabilize_stream(&mut scene.source(), &mut sink, &mut stabilizer, None).unwrap();
    assert_eq!(summary.frames, steps + 1);
    assert_eq!(summary.degraded_frames, 0);

    let raw = stabilizer.raw_path();
    let n = steps as f64;
    assert!((raw.dx - n * dx).abs() < 1.0, "{raw:?}");
    assert!((raw.dy - n * dy).abs() < 1.0, "{raw:?}");
    assert!(raw.da.abs() < 0.02, "{raw:?}");

    let ratio = cropping_ratio(&mut sink.into_source(), 3, None).unwrap();
    assert!(ratio > 0.0 && ratio <= 1.0, "{ratio}");
}

#[test]
fn first_frame_passes_through_every_method() {
    let scene = SyntheticScene::shaky(64, 48, 1);
    let first = scene.render(0).unwrap();
    for method in Method::ALL {
        let mut stabilizer = method.build(&StabilizeConfig::default(), cpu());
        assert!(stabilizer.process(&first).same_pixels(&first), "{method}");
        if let Some(info) = stabilizer.info() {
            assert_eq!(info.history_length, 0);
            assert_eq!(info.avg_confidence, 0.0);
        }
    }
}

#[test]
fn dense_homography_on_shaky_clip_reports_bounded_confidence() {
    let config = HomographyConfig {
        grid_stride: 8,
        min_correspondences: 12,
        ..HomographyConfig::default()
    };
    let mut stabilizer = HomographyStabilizer::new(config, cpu());
    let scene = SyntheticScene::shaky(128, 96, 12);
    let mut source = scene.source();
    while let Some(frame) = source.next_frame().unwrap() {
        let output = stabilizer.process(&frame);
        assert_eq!(output.dimensions(), frame.dimensions());
        let info = stabilizer.get_info();
        if info.history_length > 0 {
            assert!((0.1..=1.0).contains(&info.avg_confidence), "{info:?}");
        }
    }
    assert!(stabilizer.history().len() > 0);
    assert!(stabilizer.smoothed_path().is_finite());

    stabilizer.reset();
    let info = stabilizer.get_info();
    assert_eq!(info.avg_confidence, 0.0);
    assert_eq!(info.transform_magnitude, 0.0);
    assert_eq!(stabilizer.state(), TrackingState::Uninitialized);
}

#[test]
fn long_stream_keeps_history_bounded() {
    let backend: Arc<dyn VisionBackend> = Arc::new(
        StubBackend::new()
            .with_step(unshake::RigidTransform::new(0.5, -0.25, 0.0))
            .with_grid_spacing(6),
    );
    let config = HomographyConfig {
        min_correspondences: 4,
        ..HomographyConfig::default()
    };
    let mut stabilizer = HomographyStabilizer::new(config, backend);
    let scene = SyntheticScene::new(64, 48, 45, SceneMotion::Static);
    let mut source = scene.source();
    while let Some(frame) = source.next_frame().unwrap() {
        stabilizer.process(&frame);
        assert!(stabilizer.history().len() <= HISTORY_CAPACITY);
    }
    assert_eq!(stabilizer.history().len(), HISTORY_CAPACITY);
}

#[test]
fn stabilized_sequence_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let mut source = FileSource::open("synthetic://shake?width=64&height=48&frames=5").unwrap();
    let mut sink = ImageSequenceSink::create(&out).unwrap();
    let mut stabilizer = Method::Rigid.build(
        &StabilizeConfig::default(),
        Arc::new(StubBackend::new()),
    );

    let summary = stabilize_stream(&mut source, &mut sink, stabilizer.as_mut(), None).unwrap();
    assert_eq!(summary.frames, 5);
    assert_eq!(sink.frames_written(), 5);

    let mut written = FileSource::open(out.to_str().unwrap()).unwrap();
    let mut count = 0;
    while let Some(frame) = written.next_frame().unwrap() {
        assert_eq!(frame.dimensions(), (64, 48));
        count += 1;
    }
    assert_eq!(count, 5);
    assert_eq!(written.stats().frames_read, 5);
}
