use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use detect_events::ingest::SyntheticFileBackend;
use detect_events::{
    BusTransport, Candidate, CandidatePolicy, CaptureBackend, Detector, EventPublisher, Frame,
    FrameSource, Overlay, PipelineError, PipelineLoop, PreviewSink, SourceError, SourceSpec,
    StopReason, StopSignal,
};

/// Detector that replays scripted candidate lists and records the first pixel
/// of every frame it sees.
struct ScriptedDetector {
    script: VecDeque<Result<Vec<Candidate>>>,
    first_pixels: Arc<Mutex<Vec<[u8; 3]>>>,
}

impl ScriptedDetector {
    fn new(script: Vec<Result<Vec<Candidate>>>) -> (Self, Arc<Mutex<Vec<[u8; 3]>>>) {
        let first_pixels = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                script: script.into(),
                first_pixels: first_pixels.clone(),
            },
            first_pixels,
        )
    }

    fn empty() -> Self {
        Self::new(Vec::new()).0
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Candidate>> {
        self.first_pixels
            .lock()
            .unwrap()
            .push([pixels[0], pixels[1], pixels[2]]);
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Clone, Default)]
struct RecordingTransport {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BusTransport for RecordingTransport {
    fn describe(&self) -> String {
        "recording".to_string()
    }

    fn send(&mut self, _topic: &str, payload: &[u8]) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

struct DeadBus;

impl BusTransport for DeadBus {
    fn describe(&self) -> String {
        "dead".to_string()
    }

    fn send(&mut self, _topic: &str, _payload: &[u8]) -> Result<()> {
        Err(anyhow!("broker unreachable"))
    }

    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        Err(anyhow!("broker unreachable"))
    }
}

struct UnpluggedCamera;

impl CaptureBackend for UnpluggedCamera {
    fn describe(&self) -> String {
        "unplugged".to_string()
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        Ok(None)
    }
}

/// Preview that asks to stop the first time it renders.
struct StopOnRender {
    stop: StopSignal,
    rendered: Arc<Mutex<Vec<Overlay>>>,
}

impl PreviewSink for StopOnRender {
    fn render(&mut self, overlay: &Overlay) -> Result<()> {
        self.rendered.lock().unwrap().push(overlay.clone());
        self.stop.request();
        Ok(())
    }
}

fn clip(frames: u64, mirror: bool) -> FrameSource {
    FrameSource::with_backend(
        SourceSpec::File {
            path: format!("stub://clip?frames={}", frames),
        },
        Box::new(SyntheticFileBackend::new("clip", 8, 4, frames)),
        mirror,
    )
    .expect("open synthetic clip")
}

fn lines(out: &[u8]) -> Vec<String> {
    String::from_utf8(out.to_vec())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn prints_and_publishes_identical_events_until_end_of_stream() {
    let (detector, _) = ScriptedDetector::new(vec![
        Ok(vec![Candidate::single("person", 0.91)]),
        Ok(vec![]),
        Ok(vec![
            Candidate::single("dog", 0.5),
            Candidate::single("dog", 0.75),
        ]),
    ]);
    let transport = RecordingTransport::default();
    let publisher = EventPublisher::with_transport(
        Box::new(transport.clone()),
        "detections",
        Duration::from_millis(10),
    );

    let mut out = Vec::new();
    let summary = PipelineLoop::new(clip(3, false), Box::new(detector), publisher, "porch", &mut out)
        .run()
        .expect("run to end of stream");

    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.reason, StopReason::EndOfStream);
    assert_eq!(summary.publish.delivered, 3);

    let printed = lines(&out);
    assert_eq!(
        printed,
        vec![
            r#"{"camera_name":"porch","objects_found":[{"class_name":"person","probability":0.91}],"objects_count":{"person":1}}"#,
            r#"{"camera_name":"porch","objects_found":[],"objects_count":{}}"#,
            r#"{"camera_name":"porch","objects_found":[{"class_name":"dog","probability":0.75},{"class_name":"dog","probability":0.5}],"objects_count":{"dog":2}}"#,
        ]
    );

    let published: Vec<String> = transport
        .payloads
        .lock()
        .unwrap()
        .iter()
        .map(|p| String::from_utf8(p.clone()).unwrap())
        .collect();
    assert_eq!(published, printed);
}

#[test]
fn candidate_policy_caps_and_floors_each_frame() {
    let (detector, _) = ScriptedDetector::new(vec![Ok(vec![
        Candidate::single("person", 0.9),
        Candidate::single("cat", 0.2),
        Candidate::single("dog", 0.5),
        Candidate::single("person", 0.4),
        Candidate::single("car", 0.35),
    ])]);

    let mut out = Vec::new();
    PipelineLoop::new(
        clip(1, false),
        Box::new(detector),
        EventPublisher::disabled(),
        "porch",
        &mut out,
    )
    .with_policy(CandidatePolicy::new(3, 0.3))
    .run()
    .unwrap();

    assert_eq!(
        lines(&out),
        vec![
            r#"{"camera_name":"porch","objects_found":[{"class_name":"person","probability":0.9},{"class_name":"dog","probability":0.5},{"class_name":"person","probability":0.4}],"objects_count":{"dog":1,"person":2}}"#
        ]
    );
}

#[test]
fn detector_sees_rgb_frames_after_mirroring() {
    let (detector, first_pixels) = ScriptedDetector::new(Vec::new());
    let mut out = Vec::new();
    PipelineLoop::new(
        clip(1, true),
        Box::new(detector),
        EventPublisher::disabled(),
        "porch",
        &mut out,
    )
    .run()
    .unwrap();

    // First synthetic frame: byte i is (i + 7) % 256 in BGR order. Mirroring
    // moves pixel 7 of row 0 (bytes 21..24) to the front; RGB reverses it.
    assert_eq!(*first_pixels.lock().unwrap(), vec![[30, 29, 28]]);
}

#[test]
fn camera_without_frames_fails_before_any_output() {
    let source = FrameSource::with_backend(
        SourceSpec::Camera { index: 0 },
        Box::new(UnpluggedCamera),
        true,
    )
    .unwrap();

    let mut out = Vec::new();
    let err = PipelineLoop::new(
        source,
        Box::new(ScriptedDetector::empty()),
        EventPublisher::disabled(),
        "porch",
        &mut out,
    )
    .run()
    .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Source(SourceError::CameraRead { index: 0, .. })
    ));
    assert!(out.is_empty());
}

#[test]
fn stop_request_ends_after_the_rendered_cycle() {
    let stop = StopSignal::new();
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let preview = StopOnRender {
        stop: stop.clone(),
        rendered: rendered.clone(),
    };

    let mut out = Vec::new();
    let summary = PipelineLoop::new(
        clip(50, false),
        Box::new(ScriptedDetector::empty()),
        EventPublisher::disabled(),
        "porch",
        &mut out,
    )
    .with_preview(Box::new(preview))
    .with_stop_signal(stop)
    .run()
    .unwrap();

    assert_eq!(summary.reason, StopReason::StopRequested);
    assert_eq!(summary.cycles, 1);
    assert_eq!(lines(&out).len(), 1);
    assert_eq!(rendered.lock().unwrap().len(), 1);
}

#[test]
fn bus_failures_never_stop_the_loop() {
    let publisher =
        EventPublisher::with_transport(Box::new(DeadBus), "detections", Duration::from_millis(1));

    let mut out = Vec::new();
    let summary = PipelineLoop::new(
        clip(4, false),
        Box::new(ScriptedDetector::empty()),
        publisher,
        "porch",
        &mut out,
    )
    .run()
    .unwrap();

    assert_eq!(summary.cycles, 4);
    assert_eq!(lines(&out).len(), 4);
    assert_eq!(summary.publish.failed, 4);
    assert_eq!(summary.publish.retried, 4);
}

#[test]
fn inference_error_is_fatal() {
    let (detector, _) = ScriptedDetector::new(vec![Err(anyhow!("model crashed"))]);
    let mut out = Vec::new();
    let err = PipelineLoop::new(
        clip(3, false),
        Box::new(detector),
        EventPublisher::disabled(),
        "porch",
        &mut out,
    )
    .run()
    .unwrap_err();

    assert!(matches!(err, PipelineError::Inference(_)));
    assert!(out.is_empty());
}
