//! MQTT bus transport (rumqttc v5, QoS 1).
//!
//! A background thread drives the connection, learns the packet id of each
//! outgoing publish and matches PUBACKs against it. `flush` waits for the
//! acknowledgement of the last send and checks its reason code.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Event, MqttOptions};
use rumqttc::{Outgoing, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::BusTransport;
use crate::config::TelemetrySettings;

const REQUEST_CAPACITY: usize = 1;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Parsed broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl std::fmt::Display for MqttEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Parse a broker address.
///
/// Supports formats:
/// - `host:port` (plain TCP, or TLS when `tls_override` is set)
/// - `mqtt://host:port` / `tcp://host:port` (plain TCP)
/// - `mqtts://host:port` / `ssl://host:port` (TLS)
/// - `[ipv6]:port`
///
/// A comma-separated list selects its first entry.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr
        .split(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
        .ok_or_else(|| anyhow!("empty broker address"))?;

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported broker scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing broker host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid broker address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing broker port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid broker port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing broker port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid broker port in {}", addr))?;
    Ok((host.to_string(), port))
}

#[derive(Debug, PartialEq, Eq)]
enum AckWait {
    Acked,
    Rejected(String),
    TimedOut,
}

#[derive(Default)]
struct DeliveryState {
    connected: bool,
    /// Our publish is queued but the event loop has not assigned its pkid yet.
    awaiting_pkid: bool,
    inflight: Option<u16>,
    outcome: Option<std::result::Result<(), String>>,
}

/// Tracks the single outstanding publish of one session.
///
/// Only a PUBACK carrying the outstanding pkid resolves it; acks for any
/// other packet are ignored.
#[derive(Default)]
struct DeliveryTracker {
    state: Mutex<DeliveryState>,
    cond: Condvar,
}

impl DeliveryTracker {
    fn lock(&self) -> MutexGuard<'_, DeliveryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn has_unresolved(&self) -> bool {
        let state = self.lock();
        state.awaiting_pkid || (state.inflight.is_some() && state.outcome.is_none())
    }

    /// Start tracking a new publish.
    fn begin(&self) {
        let mut state = self.lock();
        state.awaiting_pkid = true;
        state.inflight = None;
        state.outcome = None;
    }

    fn on_outgoing_publish(&self, pkid: u16) {
        let mut state = self.lock();
        if state.awaiting_pkid {
            state.awaiting_pkid = false;
            state.inflight = Some(pkid);
        }
    }

    fn on_puback(&self, pkid: u16, reason: PubAckReason) {
        let mut state = self.lock();
        if state.inflight != Some(pkid) || state.outcome.is_some() {
            log::debug!("MqttTransport: ignoring PUBACK for pkid {}", pkid);
            return;
        }
        state.outcome = Some(match reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => Ok(()),
            other => Err(format!("{:?}", other)),
        });
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> AckWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            match &state.outcome {
                Some(Ok(())) => return AckWait::Acked,
                Some(Err(reason)) => return AckWait::Rejected(reason.clone()),
                None => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return AckWait::TimedOut;
            }
            state = match self.cond.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// One client, its connection thread and its delivery state.
struct Session {
    client: Client,
    tracker: Arc<DeliveryTracker>,
    shutdown: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl Session {
    fn start(options: MqttOptions) -> Self {
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let tracker = Arc::new(DeliveryTracker::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_tracker = tracker.clone();
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        thread_tracker.on_puback(ack.pkid, ack.reason);
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        thread_tracker.on_outgoing_publish(pkid);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        thread_tracker.set_connected(true);
                        log::info!("MqttTransport: broker session established");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        thread_tracker.set_connected(false);
                        if thread_shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MqttTransport: connection error: {}", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
                if thread_shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
        });

        Self {
            client,
            tracker,
            shutdown,
            connection_handle: Some(handle),
        }
    }

    /// Stop the connection thread without waiting for it.
    ///
    /// The thread exits on its next event; whatever the old client still
    /// holds is dropped with it.
    fn abandon(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.connection_handle.take();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.connection_handle.take() {
            if let Err(e) = self.client.disconnect() {
                log::debug!("MqttTransport: disconnect failed: {}", e);
            }
            let _ = handle.join();
        }
    }
}

/// MQTT transport holding at most one event at a time.
///
/// `send` is refused while the broker is disconnected or while the previous
/// event is unresolved, and the request queue holds a single publish. When a
/// flush times out the whole session is discarded and rebuilt, so an event
/// whose cycle failed is never delivered later from a client queue or from
/// QoS 1 retransmission. The remaining window: an event the broker accepted
/// but whose PUBACK was lost is reported failed although it was delivered.
pub struct MqttTransport {
    options: MqttOptions,
    endpoint: MqttEndpoint,
    session: Option<Session>,
    pending: bool,
    resets: u64,
}

impl MqttTransport {
    pub fn connect(settings: &TelemetrySettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.bootstrap_servers, false)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        log::info!(
            "MqttTransport: connecting to {} (auth: {})",
            endpoint,
            settings.username.is_some()
        );
        let session = Session::start(options.clone());
        Ok(Self {
            options,
            endpoint,
            session: Some(session),
            pending: false,
            resets: 0,
        })
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| anyhow!("mqtt session is closed"))
    }

    fn reset_session(&mut self) {
        if let Some(old) = self.session.take() {
            old.abandon();
        }
        self.session = Some(Session::start(self.options.clone()));
        self.pending = false;
        self.resets += 1;
        log::info!(
            "MqttTransport: dropped unacknowledged event, reconnecting to {}",
            self.endpoint
        );
    }
}

impl BusTransport for MqttTransport {
    fn describe(&self) -> String {
        format!("mqtt {}", self.endpoint)
    }

    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let session = self.session()?;
        if !session.tracker.is_connected() {
            return Err(anyhow!("broker {} is not connected", self.endpoint));
        }
        if session.tracker.has_unresolved() {
            return Err(anyhow!("previous event is still unacknowledged"));
        }
        session.tracker.begin();
        if let Err(e) = session
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
        {
            self.reset_session();
            return Err(anyhow!("mqtt publish rejected: {}", e));
        }
        self.pending = true;
        Ok(())
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        if !self.pending {
            return Ok(());
        }
        self.pending = false;
        let waited = self.session()?.tracker.wait(timeout);
        match waited {
            AckWait::Acked => Ok(()),
            AckWait::Rejected(reason) => Err(anyhow!("broker rejected publish: {}", reason)),
            AckWait::TimedOut => {
                self.reset_session();
                Err(anyhow!(
                    "no broker acknowledgement within {}ms",
                    timeout.as_millis()
                ))
            }
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.session.take();
        log::info!("MqttTransport: disconnected from {}", self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883", false).unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_tls_schemes() {
        let ep = parse_mqtt_endpoint("mqtts://broker.example.com:8883", false).unwrap();
        assert_eq!(ep.host, "broker.example.com");
        assert!(ep.use_tls);
        assert!(parse_mqtt_endpoint("ssl://b:8883", false).unwrap().use_tls);
        assert!(!parse_mqtt_endpoint("tcp://b:1883", false).unwrap().use_tls);
    }

    #[test]
    fn parse_endpoint_uses_first_bootstrap_server() {
        let ep = parse_mqtt_endpoint(" broker-a:1883 , broker-b:1883", false).unwrap();
        assert_eq!(ep.host, "broker-a");
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883", false).unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
        assert_eq!(ep.to_string(), "mqtt://[::1]:1883");
    }

    #[test]
    fn parse_endpoint_rejects_bad_input() {
        assert!(parse_mqtt_endpoint("kafka://b:9092", false).is_err());
        assert!(parse_mqtt_endpoint("broker", false).is_err());
        assert!(parse_mqtt_endpoint("broker:port", false).is_err());
        assert!(parse_mqtt_endpoint(" , ", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn late_ack_for_an_earlier_event_does_not_resolve_the_current_one() {
        let tracker = DeliveryTracker::default();

        tracker.begin();
        tracker.on_outgoing_publish(1);
        assert_eq!(tracker.wait(Duration::from_millis(10)), AckWait::TimedOut);

        tracker.begin();
        tracker.on_outgoing_publish(2);
        tracker.on_puback(1, PubAckReason::Success);
        assert_eq!(tracker.wait(Duration::from_millis(10)), AckWait::TimedOut);
        assert!(tracker.has_unresolved());

        tracker.on_puback(2, PubAckReason::Success);
        assert_eq!(tracker.wait(Duration::from_millis(10)), AckWait::Acked);
        assert!(!tracker.has_unresolved());
    }

    #[test]
    fn rejecting_reason_codes_fail_the_publish() {
        let tracker = DeliveryTracker::default();
        tracker.begin();
        tracker.on_outgoing_publish(7);
        tracker.on_puback(7, PubAckReason::NotAuthorized);
        assert!(matches!(
            tracker.wait(Duration::from_millis(10)),
            AckWait::Rejected(reason) if reason.contains("NotAuthorized")
        ));

        tracker.begin();
        tracker.on_outgoing_publish(8);
        tracker.on_puback(8, PubAckReason::NoMatchingSubscribers);
        assert_eq!(tracker.wait(Duration::from_millis(10)), AckWait::Acked);
    }

    #[test]
    fn ack_from_another_thread_wakes_the_waiter() {
        let tracker = Arc::new(DeliveryTracker::default());
        tracker.begin();
        tracker.on_outgoing_publish(3);

        let acker = tracker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            acker.on_puback(3, PubAckReason::Success);
        });
        assert_eq!(tracker.wait(Duration::from_secs(5)), AckWait::Acked);
        handle.join().unwrap();
    }

    fn unreachable_broker() -> MqttTransport {
        MqttTransport::connect(&TelemetrySettings {
            bootstrap_servers: "127.0.0.1:1".to_string(),
            topic: "detections".to_string(),
            client_id: "detect_events_test".to_string(),
            flush_timeout: Duration::from_millis(10),
            username: None,
            password: None,
        })
        .unwrap()
    }

    #[test]
    fn nothing_is_queued_while_the_broker_is_down() {
        let mut transport = unreachable_broker();
        for _ in 0..12 {
            assert!(transport.send("detections", b"{}").is_err());
            assert!(transport.flush(Duration::from_millis(10)).is_ok());
        }
        assert!(!transport.pending);
        assert!(!transport.session().unwrap().tracker.has_unresolved());
        assert_eq!(transport.resets, 0);
    }

    #[test]
    fn ack_timeout_discards_the_session() {
        let mut transport = unreachable_broker();
        let old = transport.session().unwrap().tracker.clone();
        old.begin();
        transport.pending = true;

        let err = transport.flush(Duration::from_millis(10)).unwrap_err();
        assert!(err.to_string().contains("no broker acknowledgement"));
        assert_eq!(transport.resets, 1);
        assert!(!transport.pending);

        let fresh = transport.session().unwrap().tracker.clone();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!fresh.has_unresolved());
    }
}
