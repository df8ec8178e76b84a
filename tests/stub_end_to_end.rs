use detect_events::{
    open_detector, CandidatePolicy, DetectorOptions, EventPublisher, FrameSource, NormalizedResult,
    PipelineLoop, SourceConfig, SourceSpec, StopReason,
};

fn run_clip(frames: u32) -> Vec<String> {
    let source = FrameSource::open(&SourceConfig {
        spec: SourceSpec::resolve(None, Some(format!("stub://yard?frames={}", frames))).unwrap(),
        width: 32,
        height: 24,
        mirror: true,
    })
    .expect("open stub clip");
    let detector = open_detector(&DetectorOptions {
        model_path: "stub://detector".to_string(),
        ..DetectorOptions::default()
    })
    .expect("open stub detector");

    let mut out = Vec::new();
    let summary = PipelineLoop::new(
        source,
        detector,
        EventPublisher::disabled(),
        "yard",
        &mut out,
    )
    .with_policy(CandidatePolicy::new(2, 0.3))
    .run()
    .expect("run stub pipeline");
    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.cycles, frames as u64);

    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn every_frame_yields_a_consistent_event() {
    let lines = run_clip(12);
    assert_eq!(lines.len(), 12);

    for line in &lines {
        let result: NormalizedResult = serde_json::from_str(line).expect("event is JSON");
        assert_eq!(result.camera_name, "yard");
        assert!(result.detections.len() <= 2);
        assert_eq!(
            result.counts.values().map(|c| *c as usize).sum::<usize>(),
            result.detections.len()
        );
        for det in &result.detections {
            assert!(result.counts.contains_key(&det.class_name));
            assert!((0.3..=1.0).contains(&det.confidence));
        }
    }
}

#[test]
fn identical_input_gives_identical_output() {
    assert_eq!(run_clip(5), run_clip(5));
}
