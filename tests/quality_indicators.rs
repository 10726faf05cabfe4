use std::sync::Arc;

use unshake::config::{MotionEstimateConfig, QualityConfig};
use unshake::ingest::{SceneMotion, SyntheticScene};
use unshake::quality::{
    cropping_ratio_from_video, distortion_value, distortion_value_from_videos,
    measure_latency, stability_improvement, stability_score, stability_score_from_video,
    LatencyOptions,
};
use unshake::{
    stabilize_stream, CpuBackend, FrameSource, ImageSequenceSink, MemorySink, Method,
    QualityReport, StabilizeConfig, Stabilizer, StubBackend, VisionBackend, WarmupPolicy,
};

#[test]
fn static_stream_has_zero_stability_score() {
    let score = stability_score_from_video(
        "synthetic://static?width=96&height=72&frames=6",
        &CpuBackend::new(),
        &MotionEstimateConfig::default(),
        None,
    )
    .unwrap();
    assert!(score.abs() < 1e-6, "{score}");
}

#[test]
fn single_frame_stream_has_undefined_stability() {
    let score = stability_score_from_video(
        "synthetic://static?width=32&height=32&frames=1",
        &CpuBackend::new(),
        &MotionEstimateConfig::default(),
        None,
    )
    .unwrap();
    assert!(score.is_nan());
}

#[test]
fn pan_stability_matches_step_length() {
    let scene = SyntheticScene::new(128, 96, 6, SceneMotion::Pan { dx: 3.0, dy: 0.0 });
    let score = stability_score(
        &mut scene.source(),
        &CpuBackend::new(),
        &MotionEstimateConfig::default(),
        None,
    )
    .unwrap();
    assert!((score - 3.0).abs() < 0.2, "{score}");
}

#[test]
fn improvement_is_bounded_or_undefined() {
    for (before, after) in [(5.0, 1.0), (1.0, 5.0), (2.0, 2.0), (0.5, 0.0)] {
        let value = stability_improvement(before, after);
        assert!((0.0..=1.0).contains(&value), "{before} {after} {value}");
    }
    assert!(stability_improvement(0.0, 0.0).is_nan());
    assert!(stability_improvement(f64::NAN, 1.0).is_nan());
}

#[test]
fn cropping_and_distortion_from_paths() {
    let uri = "synthetic://shake?width=64&height=48&frames=4";
    let cropping = cropping_ratio_from_video(uri, 3, None).unwrap();
    assert_eq!(cropping, 1.0);

    let distortion = distortion_value_from_videos(uri, uri, &CpuBackend::new(), 3, None).unwrap();
    assert!(distortion.abs() < 1e-6, "{distortion}");
}

#[test]
fn stabilized_output_loses_some_area_but_not_all() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(StubBackend::new().with_step(unshake::RigidTransform::new(
        4.0, 2.0, 0.0,
    )));
    let mut stabilizer = Method::Rigid.build(&StabilizeConfig::default(), backend);
    let scene = SyntheticScene::new(64, 48, 8, SceneMotion::Static);
    let mut sink = ImageSequenceSink::create(dir.path()).unwrap();
    stabilize_stream(&mut scene.source(), &mut sink, stabilizer.as_mut(), None).unwrap();

    let ratio = cropping_ratio_from_video(dir.path().to_str().unwrap(), 3, None).unwrap();
    assert!(ratio > 0.0 && ratio < 1.0, "{ratio}");
}

#[test]
fn distortion_ignores_border_fill() {
    let backend = Arc::new(StubBackend::new().with_step(unshake::RigidTransform::new(
        3.0, 0.0, 0.0,
    )));
    let mut stabilizer = Method::Rigid.build(&StabilizeConfig::default(), backend);
    let scene = SyntheticScene::new(64, 48, 4, SceneMotion::Static);
    let mut sink = MemorySink::new();
    stabilize_stream(&mut scene.source(), &mut sink, stabilizer.as_mut(), None).unwrap();

    let d = distortion_value(
        &mut scene.source(),
        &mut sink.into_source(),
        &CpuBackend::new(),
        3,
        None,
    )
    .unwrap();
    assert!(d.is_finite() && (0.0..=1.0).contains(&d), "{d}");
}

#[test]
fn latency_policies_are_explicit() {
    let scene = SyntheticScene::new(32, 24, 8, SceneMotion::Static);
    let mut stabilizer =
        Method::Rigid.build(&StabilizeConfig::default(), Arc::new(StubBackend::new()));

    for policy in [WarmupPolicy::Disjoint, WarmupPolicy::Rewind] {
        let options = LatencyOptions {
            warmup_frames: 5,
            policy,
            max_frames: None,
        };
        let latency = measure_latency(&mut scene.source(), stabilizer.as_mut(), &options).unwrap();
        assert!(latency.is_finite() && latency >= 0.0, "{policy}: {latency}");
    }

    let options = LatencyOptions {
        warmup_frames: 8,
        policy: WarmupPolicy::Disjoint,
        max_frames: None,
    };
    let latency = measure_latency(&mut scene.source(), stabilizer.as_mut(), &options).unwrap();
    assert!(latency.is_nan());
}

#[test]
fn full_report_on_shaky_clip() {
    let backend: Arc<dyn VisionBackend> = Arc::new(StubBackend::new());
    let mut config = StabilizeConfig::default();
    config.homography.min_correspondences = 4;
    let scene = SyntheticScene::shaky(64, 48, 10);
    let mut stabilizer: Box<dyn Stabilizer> = Method::HomographyDense.build(&config, backend.clone());

    let mut sink = MemorySink::new();
    let mut raw = scene.source();
    stabilize_stream(&mut raw, &mut sink, stabilizer.as_mut(), None).unwrap();
    let mut stabilized = sink.into_source();
    raw.rewind().unwrap();

    let quality = QualityConfig {
        max_frames: Some(8),
        ..QualityConfig::default()
    };
    let report = QualityReport::evaluate(
        &mut raw,
        &mut stabilized,
        stabilizer.as_mut(),
        backend.as_ref(),
        &quality,
    )
    .unwrap();
    assert_eq!(report.method, "homography-dense");
    assert!(report.latency_ms.is_finite());
    assert!(report.cropping_ratio > 0.0 && report.cropping_ratio <= 1.0);
    assert!((0.0..=1.0).contains(&report.distortion), "{}", report.distortion);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert!(json["stability_before"].is_number());
}
