//! Best-effort event delivery to the message bus.
//!
//! `EventPublisher::publish` never fails the pipeline: transport faults come
//! back as `PublishOutcome::Failed`, are logged at `warn` and counted. A
//! rejected send is retried at most once, after flushing the transport, and
//! nothing is queued across calls.

use anyhow::Result;
use std::time::Duration;

use crate::config::TelemetrySettings;
use crate::normalize::Event;

pub mod mqtt;

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttTransport};

/// Message bus client seam.
pub trait BusTransport: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Hand one payload to the client. Must not block on the network.
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the broker to acknowledge the last send.
    fn flush(&mut self, timeout: Duration) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// Telemetry is off; treated as success.
    Disabled,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::Disabled)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub attempted: u64,
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
}

enum PublisherState {
    Disabled,
    Ready {
        transport: Box<dyn BusTransport>,
        topic: String,
        flush_timeout: Duration,
    },
}

pub struct EventPublisher {
    state: PublisherState,
    stats: PublishStats,
}

impl EventPublisher {
    /// Publisher that accepts every event and sends nothing.
    pub fn disabled() -> Self {
        Self {
            state: PublisherState::Disabled,
            stats: PublishStats::default(),
        }
    }

    pub fn with_transport(
        transport: Box<dyn BusTransport>,
        topic: impl Into<String>,
        flush_timeout: Duration,
    ) -> Self {
        let topic = topic.into();
        log::info!(
            "EventPublisher: ready ({}, topic '{}')",
            transport.describe(),
            topic
        );
        Self {
            state: PublisherState::Ready {
                transport,
                topic,
                flush_timeout,
            },
            stats: PublishStats::default(),
        }
    }

    /// Build an MQTT-backed publisher from validated telemetry settings.
    pub fn connect(settings: &TelemetrySettings) -> Result<Self> {
        let transport = MqttTransport::connect(settings)?;
        Ok(Self::with_transport(
            Box::new(transport),
            settings.topic.clone(),
            settings.flush_timeout,
        ))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, PublisherState::Ready { .. })
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    pub fn publish(&mut self, event: &Event) -> PublishOutcome {
        let PublisherState::Ready {
            transport,
            topic,
            flush_timeout,
        } = &mut self.state
        else {
            return PublishOutcome::Disabled;
        };

        self.stats.attempted += 1;
        let outcome = deliver(
            transport.as_mut(),
            topic,
            event.as_bytes(),
            *flush_timeout,
            &mut self.stats,
        );
        match &outcome {
            PublishOutcome::Failed(reason) => {
                self.stats.failed += 1;
                log::warn!("EventPublisher: delivery to '{}' failed: {}", topic, reason);
            }
            _ => self.stats.delivered += 1,
        }
        outcome
    }
}

fn deliver(
    transport: &mut dyn BusTransport,
    topic: &str,
    payload: &[u8],
    flush_timeout: Duration,
    stats: &mut PublishStats,
) -> PublishOutcome {
    if let Err(err) = transport.send(topic, payload) {
        log::debug!("EventPublisher: send rejected, flushing before retry: {:#}", err);
        if let Err(err) = transport.flush(flush_timeout) {
            log::debug!("EventPublisher: flush before retry failed: {:#}", err);
        }
        stats.retried += 1;
        if let Err(err) = transport.send(topic, payload) {
            return PublishOutcome::Failed(format!("{:#}", err));
        }
    }

    match transport.flush(flush_timeout) {
        Ok(()) => PublishOutcome::Delivered,
        Err(err) => PublishOutcome::Failed(format!("{:#}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{normalize, Event};
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        send_failures: usize,
        flush_fails: bool,
        sends: usize,
        flushes: usize,
        payloads: Vec<Vec<u8>>,
    }

    struct ScriptedTransport(Arc<Mutex<Script>>);

    impl BusTransport for ScriptedTransport {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn send(&mut self, _topic: &str, payload: &[u8]) -> Result<()> {
            let mut script = self.0.lock().unwrap();
            script.sends += 1;
            if script.send_failures > 0 {
                script.send_failures -= 1;
                return Err(anyhow!("queue full"));
            }
            script.payloads.push(payload.to_vec());
            Ok(())
        }

        fn flush(&mut self, _timeout: Duration) -> Result<()> {
            let mut script = self.0.lock().unwrap();
            script.flushes += 1;
            if script.flush_fails {
                return Err(anyhow!("ack timeout"));
            }
            Ok(())
        }
    }

    fn event() -> Event {
        Event::from_result(&normalize(&[], "cam")).unwrap()
    }

    fn publisher(script: Script) -> (EventPublisher, Arc<Mutex<Script>>) {
        let shared = Arc::new(Mutex::new(script));
        let publisher = EventPublisher::with_transport(
            Box::new(ScriptedTransport(shared.clone())),
            "detections",
            Duration::from_millis(10),
        );
        (publisher, shared)
    }

    #[test]
    fn disabled_publisher_reports_success() {
        let mut publisher = EventPublisher::disabled();
        for _ in 0..3 {
            let outcome = publisher.publish(&event());
            assert_eq!(outcome, PublishOutcome::Disabled);
            assert!(outcome.is_success());
        }
        assert!(!publisher.is_enabled());
        assert_eq!(publisher.stats(), PublishStats::default());
    }

    #[test]
    fn delivered_payload_matches_event_bytes() {
        let (mut publisher, script) = publisher(Script::default());
        let event = event();
        assert_eq!(publisher.publish(&event), PublishOutcome::Delivered);
        let script = script.lock().unwrap();
        assert_eq!(script.payloads, vec![event.as_bytes().to_vec()]);
        assert_eq!(script.flushes, 1);
    }

    #[test]
    fn rejected_send_is_retried_once() {
        let (mut publisher, script) = publisher(Script {
            send_failures: 1,
            ..Script::default()
        });
        assert_eq!(publisher.publish(&event()), PublishOutcome::Delivered);
        assert_eq!(script.lock().unwrap().sends, 2);
        assert_eq!(publisher.stats().retried, 1);
    }

    #[test]
    fn second_rejection_fails_without_further_retries() {
        let (mut publisher, script) = publisher(Script {
            send_failures: 5,
            ..Script::default()
        });
        let outcome = publisher.publish(&event());
        assert!(matches!(outcome, PublishOutcome::Failed(_)));
        assert_eq!(script.lock().unwrap().sends, 2);
        assert_eq!(publisher.stats().failed, 1);

        // the next event starts fresh; nothing from the failed one is replayed
        let _ = publisher.publish(&event());
        assert_eq!(script.lock().unwrap().sends, 4);
        assert!(script.lock().unwrap().payloads.is_empty());
    }

    #[test]
    fn ack_timeout_is_a_failure() {
        let (mut publisher, _script) = publisher(Script {
            flush_fails: true,
            ..Script::default()
        });
        let outcome = publisher.publish(&event());
        assert!(!outcome.is_success());
        assert_eq!(
            publisher.stats(),
            PublishStats {
                attempted: 1,
                delivered: 0,
                retried: 0,
                failed: 1,
            }
        );
    }
}
