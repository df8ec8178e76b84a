//! The per-frame control loop.
//!
//! Each cycle runs, in order: acquire (mirrored by the source), convert to
//! the detector's channel order, infer, apply the candidate policy,
//! normalize, update the frame-rate tracker, build the event, print it,
//! publish it, render the overlay, and finally check for a stop request.

use std::io::Write;
use std::time::{Duration, Instant};

use crate::detect::{CandidatePolicy, Detector};
use crate::error::PipelineError;
use crate::fps::FrameRateTracker;
use crate::frame::Frame;
use crate::ingest::{Capture, FrameSource};
use crate::normalize::{normalize, Event};
use crate::preview::{Overlay, PreviewSink};
use crate::publish::{EventPublisher, PublishStats};
use crate::stop::StopSignal;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    StopRequested,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub reason: StopReason,
    pub publish: PublishStats,
}

pub struct PipelineLoop<W: Write> {
    source: FrameSource,
    detector: Box<dyn Detector>,
    policy: CandidatePolicy,
    publisher: EventPublisher,
    preview: Option<Box<dyn PreviewSink>>,
    stop: StopSignal,
    camera_name: String,
    out: W,
    tracker: FrameRateTracker,
}

impl<W: Write> PipelineLoop<W> {
    /// Events are written to `out`, one JSON line per frame.
    pub fn new(
        source: FrameSource,
        detector: Box<dyn Detector>,
        publisher: EventPublisher,
        camera_name: impl Into<String>,
        out: W,
    ) -> Self {
        Self {
            source,
            detector,
            policy: CandidatePolicy::default(),
            publisher,
            preview: None,
            stop: StopSignal::new(),
            camera_name: camera_name.into(),
            out,
            tracker: FrameRateTracker::new(),
        }
    }

    pub fn with_policy(mut self, policy: CandidatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Run until end of stream, a stop request, or a fatal fault.
    ///
    /// Consumes the loop; the source, detector and publisher are released on
    /// every exit path.
    pub fn run(mut self) -> Result<RunSummary, PipelineError> {
        log::info!(
            "pipeline running: camera '{}', detector '{}', telemetry {}",
            self.camera_name,
            self.detector.name(),
            if self.publisher.is_enabled() { "on" } else { "off" }
        );

        let mut cycles = 0u64;
        let mut last_health_log = Instant::now();

        let reason = loop {
            let frame = match self.source.next()? {
                Capture::Frame(frame) => frame,
                Capture::EndOfStream => break StopReason::EndOfStream,
            };

            self.cycle(frame)?;
            cycles += 1;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }

            if self.stop.is_requested() {
                break StopReason::StopRequested;
            }
        };

        let summary = RunSummary {
            cycles,
            reason,
            publish: self.publisher.stats(),
        };
        log::info!(
            "pipeline stopped ({:?}) after {} cycles; published {} of {} events",
            summary.reason,
            summary.cycles,
            summary.publish.delivered,
            summary.publish.attempted
        );
        Ok(summary)
    }

    fn cycle(&mut self, frame: Frame) -> Result<(), PipelineError> {
        let input = frame.converted(self.detector.input_order());
        drop(frame);

        let candidates = input
            .run_detector(self.detector.as_mut())
            .map_err(PipelineError::Inference)?;
        let candidates = self.policy.apply(candidates);
        let result = normalize(&candidates, &self.camera_name);
        let fps = self.tracker.tick();

        let event = Event::from_result(&result).map_err(PipelineError::Event)?;
        writeln!(self.out, "{}", event)?;
        self.out.flush()?;

        let outcome = self.publisher.publish(&event);
        log::debug!(
            "cycle {}: {} objects, fps {:.1}, publish {:?}",
            self.tracker.cycles(),
            result.total(),
            fps,
            outcome
        );

        if let Some(preview) = self.preview.as_mut() {
            preview
                .render(&Overlay::new(fps, &result))
                .map_err(PipelineError::Preview)?;
        }
        Ok(())
    }

    fn log_health(&self) {
        let source = self.source.stats();
        let publish = self.publisher.stats();
        log::info!(
            "source={} frames={} fps={:.1} published={} failed={} retried={}",
            source.description,
            source.frames_delivered,
            self.tracker.fps(),
            publish.delivered,
            publish.failed,
            publish.retried
        );
    }
}
