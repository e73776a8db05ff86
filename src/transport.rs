//! Transport
//!
//! Owns the single connection to the ELM327 adapter: opening the link,
//! running the init handshake, serializing command/response exchanges and
//! running the background monitor that collects unsolicited frames.

use crate::codec::{self, Request, ResponseKind};
use crate::config::{ConnectionSettings, TransportKind};
use crate::constants::{elm, limits, timing};
use crate::definitions::InitStep;
use crate::error::TransportError;
use crate::link::{self, AdapterLink, ConnectionState, SerialLink, TcpLink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Sentinel returned by [`Transport::send_command`] without a connection
pub const NOT_CONNECTED: &str = "NOT CONNECTED";

/// Lock a mutex, recovering the data if a panicking thread poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One completed command/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub command: String,
    pub raw: Vec<u8>,
    pub response: String,
    pub elapsed_ms: u64,
    pub kind: ResponseKind,
}

impl Exchange {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Connection statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportStatistics {
    pub connection_type: Option<TransportKind>,
    pub target: Option<String>,
    pub state: ConnectionState,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub adapter: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.bytes_sent.store(0, Ordering::SeqCst);
        self.bytes_received.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
    }

    fn error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct Channel {
    link: Box<dyn AdapterLink>,
    header: Option<String>,
    receive_filter: Option<String>,
}

struct Session {
    kind: Option<TransportKind>,
    target: Option<String>,
    state: ConnectionState,
    adapter: Option<String>,
    last_error: Option<String>,
}

struct Monitor {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Connection to one ELM327 adapter
pub struct Transport {
    channel: Arc<Mutex<Option<Channel>>>,
    session: Mutex<Session>,
    counters: Arc<Counters>,
    monitor: Mutex<Option<Monitor>>,
    unsolicited: Mutex<Option<mpsc::Receiver<String>>>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Mutex::new(None)),
            session: Mutex::new(Session {
                kind: None,
                target: None,
                state: ConnectionState::Disconnected,
                adapter: None,
                last_error: None,
            }),
            counters: Arc::new(Counters::default()),
            monitor: Mutex::new(None),
            unsolicited: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Open the link described by `settings` and run `init` on it
    pub fn connect(&self, settings: &ConnectionSettings, init: &[InitStep]) -> Result<(), TransportError> {
        if self.is_connected() {
            self.disconnect();
        }
        self.begin(settings.kind, &settings.target);

        let opened: Result<Box<dyn AdapterLink>, TransportError> = match settings.kind {
            TransportKind::Serial => SerialLink::open(&settings.target, settings.baud_rate, settings.read_timeout())
                .map(|l| Box::new(l) as Box<dyn AdapterLink>),
            TransportKind::Bluetooth => link::list_ports()
                .and_then(|ports| link::resolve_bluetooth_port(&settings.target, &ports))
                .and_then(|port| SerialLink::open(&port, settings.baud_rate, settings.read_timeout()))
                .map(|l| Box::new(l) as Box<dyn AdapterLink>),
            TransportKind::Tcp => {
                TcpLink::connect(&settings.target, Duration::from_millis(timing::TCP_CONNECT_TIMEOUT_MS))
                    .map(|l| Box::new(l) as Box<dyn AdapterLink>)
            }
        };

        match opened {
            Ok(link) => self.attach(link, settings, init),
            Err(e) => {
                log::error!("Failed to open {} target {}: {}", settings.kind, settings.target, e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Boolean form of [`Transport::connect`]
    pub fn connect_ok(&self, settings: &ConnectionSettings, init: &[InitStep]) -> bool {
        self.connect(settings, init).is_ok()
    }

    /// Connect over a caller-provided link, such as the simulator
    pub fn connect_link(
        &self,
        link: Box<dyn AdapterLink>,
        settings: &ConnectionSettings,
        init: &[InitStep],
    ) -> Result<(), TransportError> {
        if self.is_connected() {
            self.disconnect();
        }
        self.begin(settings.kind, &settings.target);
        self.attach(link, settings, init)
    }

    fn begin(&self, kind: TransportKind, target: &str) {
        let mut session = lock(&self.session);
        session.kind = Some(kind);
        session.target = Some(target.to_string());
        session.state = ConnectionState::Connecting;
        session.adapter = None;
        session.last_error = None;
    }

    fn fail(&self, error: &TransportError) {
        let mut session = lock(&self.session);
        session.state = ConnectionState::Disconnected;
        session.last_error = Some(error.to_string());
    }

    fn attach(
        &self,
        link: Box<dyn AdapterLink>,
        settings: &ConnectionSettings,
        init: &[InitStep],
    ) -> Result<(), TransportError> {
        let description = link.describe();
        self.counters.reset();
        *lock(&self.channel) = Some(Channel {
            link,
            header: None,
            receive_filter: None,
        });

        let adapter = match self.handshake(init) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::error!("Handshake with {} failed: {}", description, e);
                lock(&self.channel).take();
                self.counters.reset();
                self.fail(&e);
                return Err(e);
            }
        };

        self.start_monitor(settings.monitor_poll());

        let mut session = lock(&self.session);
        session.state = ConnectionState::Connected;
        session.adapter = adapter.clone();
        log::info!(
            "Connected to {} ({})",
            description,
            adapter.as_deref().unwrap_or("unidentified adapter")
        );
        Ok(())
    }

    /// Run the init steps in order; the reset banner identifies the adapter
    fn handshake(&self, init: &[InitStep]) -> Result<Option<String>, TransportError> {
        let mut guard = lock(&self.channel);
        let channel = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let mut adapter = None;

        for step in init {
            let exchange = Self::transact(channel, &self.counters, &step.command, step.wait())
                .inspect_err(|_| self.counters.error())?;
            log::debug!("{} -> {}", step.command, exchange.response);

            let upper = exchange.response.to_ascii_uppercase();
            if exchange.kind == ResponseKind::AdapterError || upper.contains("UNABLE TO CONNECT") {
                self.counters.error();
                return Err(TransportError::Handshake {
                    command: step.command.clone(),
                    response: exchange.response,
                });
            }
            if step.command == elm::RESET && !exchange.response.is_empty() {
                adapter = Some(exchange.response);
                channel.header = None;
                channel.receive_filter = None;
            }
        }

        Ok(adapter)
    }

    /// Stop the monitor, close the handle and reset counters. Idempotent.
    pub fn disconnect(&self) {
        if let Some(monitor) = lock(&self.monitor).take() {
            monitor.running.store(false, Ordering::SeqCst);
            if monitor.handle.join().is_err() {
                log::warn!("Monitor thread panicked");
            }
        }

        if let Some(channel) = lock(&self.channel).take() {
            log::info!("Disconnected from {}", channel.link.describe());
        }
        lock(&self.unsolicited).take();
        self.counters.reset();

        let mut session = lock(&self.session);
        session.state = ConnectionState::Disconnected;
        session.adapter = None;
    }

    /// True only in the `Connected` state; a handle in `Error` is still open
    pub fn is_connected(&self) -> bool {
        lock(&self.session).state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.session).state.clone()
    }

    /// Adapter identification recorded during the handshake
    pub fn adapter_id(&self) -> Option<String> {
        lock(&self.session).adapter.clone()
    }

    pub fn get_statistics(&self) -> TransportStatistics {
        let session = lock(&self.session);
        TransportStatistics {
            connection_type: session.kind,
            target: session.target.clone(),
            state: session.state.clone(),
            bytes_sent: self.counters.bytes_sent.load(Ordering::SeqCst),
            bytes_received: self.counters.bytes_received.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
            adapter: session.adapter.clone(),
            last_error: session.last_error.clone(),
        }
    }

    /// Receiver for frames the adapter sent outside any command. Available
    /// once per connection.
    pub fn take_unsolicited_frames(&self) -> Option<mpsc::Receiver<String>> {
        lock(&self.unsolicited).take()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Send a raw command and return the cleaned reply.
    ///
    /// Returns `"NOT CONNECTED"` without any I/O when there is no handle,
    /// and a string starting with `"ERROR"` when the exchange failed.
    pub fn send_command(&self, command: &str, wait: Duration) -> String {
        match self.exchange(command, wait) {
            Ok(exchange) => exchange.response,
            Err(TransportError::NotConnected) => NOT_CONNECTED.to_string(),
            Err(e) => format!("ERROR: {}", e),
        }
    }

    /// Send a raw command and return the typed exchange
    pub fn exchange(&self, command: &str, wait: Duration) -> Result<Exchange, TransportError> {
        let mut guard = lock(&self.channel);
        let channel = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let result = Self::transact(channel, &self.counters, command, wait);
        drop(guard);
        if let Err(e) = &result {
            log::warn!("'{}' failed: {}", command, e);
            self.counters.error();
        }
        self.track(&result);
        result
    }

    /// Send a request, switching the adapter header first when the request
    /// targets a different ECU than the previous one
    pub fn send_request(&self, request: &Request, wait: Duration) -> Result<Exchange, TransportError> {
        let mut guard = lock(&self.channel);
        let channel = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let result = Self::address(channel, &self.counters, request)
            .and_then(|_| Self::transact(channel, &self.counters, &request.command, wait));
        drop(guard);
        if let Err(e) = &result {
            log::warn!("Request '{}' failed: {}", request.command, e);
            self.counters.error();
        }
        self.track(&result);
        result
    }

    /// An I/O failure on a live handle moves the session to `Error`; the
    /// next exchange that reaches the adapter moves it back
    fn track(&self, result: &Result<Exchange, TransportError>) {
        let mut session = lock(&self.session);
        match (result, &session.state) {
            (Err(TransportError::Io(reason)), ConnectionState::Connected | ConnectionState::Error(_)) => {
                session.state = ConnectionState::Error(reason.clone());
                session.last_error = Some(reason.clone());
            }
            (Ok(_), ConnectionState::Error(_)) => {
                log::info!("Adapter answering again");
                session.state = ConnectionState::Connected;
            }
            _ => {}
        }
    }

    fn address(channel: &mut Channel, counters: &Counters, request: &Request) -> Result<(), TransportError> {
        if let Some(header) = &request.header {
            if channel.header.as_ref() != Some(header) {
                let command = format!("{} {}", elm::SET_HEADER, header);
                Self::setup(channel, counters, &command)?;
                channel.header = Some(header.clone());
            }
        }
        if let Some(filter) = &request.receive_filter {
            if channel.receive_filter.as_ref() != Some(filter) {
                let command = format!("{} {}", elm::SET_RECEIVE_ADDRESS, filter);
                Self::setup(channel, counters, &command)?;
                channel.receive_filter = Some(filter.clone());
            }
        }
        Ok(())
    }

    fn setup(channel: &mut Channel, counters: &Counters, command: &str) -> Result<(), TransportError> {
        let exchange = Self::transact(channel, counters, command, timing::SETUP_TIMEOUT)?;
        if exchange.kind == ResponseKind::AdapterError {
            return Err(TransportError::Rejected {
                command: command.to_string(),
                response: exchange.response,
            });
        }
        Ok(())
    }

    /// Write `command`, read until the prompt or `wait` elapses
    fn transact(
        channel: &mut Channel,
        counters: &Counters,
        command: &str,
        wait: Duration,
    ) -> Result<Exchange, TransportError> {
        channel.link.clear_input()?;

        let line = format!("{}{}", command, elm::TERMINATOR);
        channel.link.write_all(line.as_bytes())?;
        counters.bytes_sent.fetch_add(line.len() as u64, Ordering::SeqCst);

        let start = Instant::now();
        let mut raw: Vec<u8> = Vec::new();
        loop {
            let chunk = channel.link.read_available()?;
            if !chunk.is_empty() {
                counters.bytes_received.fetch_add(chunk.len() as u64, Ordering::SeqCst);
                raw.extend_from_slice(&chunk);
                if raw.contains(&elm::PROMPT) {
                    break;
                }
                if raw.len() > limits::MAX_RESPONSE_BYTES {
                    return Err(TransportError::Io(format!(
                        "Response to '{}' exceeded {} bytes",
                        command,
                        limits::MAX_RESPONSE_BYTES
                    )));
                }
            }
            if start.elapsed() >= wait {
                return Err(TransportError::Timeout(wait.as_millis() as u64));
            }
            thread::sleep(timing::READ_POLL);
        }

        let text = String::from_utf8_lossy(&raw);
        let response = codec::clean_response(&text, command);
        let kind = codec::classify_response(&response);
        Ok(Exchange {
            command: command.to_string(),
            raw,
            response,
            elapsed_ms: start.elapsed().as_millis() as u64,
            kind,
        })
    }

    // ------------------------------------------------------------------
    // Monitor
    // ------------------------------------------------------------------

    fn start_monitor(&self, poll: Duration) {
        let (tx, rx) = mpsc::channel(limits::UNSOLICITED_QUEUE);
        *lock(&self.unsolicited) = Some(rx);

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let channel = self.channel.clone();
        let counters = self.counters.clone();

        let handle = thread::spawn(move || {
            log::debug!("Monitor started");
            let mut pending = String::new();
            while thread_running.load(Ordering::SeqCst) {
                Self::poll_once(&channel, &counters, &mut pending, &tx);
                thread::sleep(poll);
            }
            log::debug!("Monitor stopped");
        });

        *lock(&self.monitor) = Some(Monitor { running, handle });
    }

    fn poll_once(
        channel: &Mutex<Option<Channel>>,
        counters: &Counters,
        pending: &mut String,
        tx: &mpsc::Sender<String>,
    ) {
        let mut guard = match channel.try_lock() {
            Ok(guard) => guard,
            // A command owns the handle
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let Some(channel) = guard.as_mut() else {
            return;
        };

        match channel.link.read_available() {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                counters.bytes_received.fetch_add(bytes.len() as u64, Ordering::SeqCst);
                pending.push_str(&String::from_utf8_lossy(&bytes));
            }
            Err(e) => {
                counters.error();
                log::warn!("Monitor read failed: {}", e);
                return;
            }
        }
        drop(guard);

        while let Some(pos) = pending.find(['\r', '\n']) {
            let line: String = pending.drain(..=pos).collect();
            let frame = codec::clean_response(&line, "");
            if frame.is_empty() {
                continue;
            }
            if let Err(e) = tx.try_send(frame) {
                log::debug!("Dropping unsolicited frame: {}", e);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedAdapter;

    fn init() -> Vec<InitStep> {
        vec![
            InitStep {
                command: "ATZ".to_string(),
                wait_ms: 500,
            },
            InitStep {
                command: "ATE0".to_string(),
                wait_ms: 500,
            },
            InitStep {
                command: "ATSP5".to_string(),
                wait_ms: 500,
            },
        ]
    }

    fn connected(sim: &SimulatedAdapter) -> Transport {
        let transport = Transport::new();
        transport
            .connect_link(Box::new(sim.clone()), &ConnectionSettings::default(), &init())
            .unwrap();
        transport
    }

    #[test]
    fn test_not_connected_sentinel() {
        let transport = Transport::new();
        assert_eq!(transport.send_command("010C", Duration::from_millis(100)), "NOT CONNECTED");
        let stats = transport.get_statistics();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_handshake_records_adapter() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        assert!(transport.is_connected());
        assert_eq!(transport.adapter_id().as_deref(), Some("ELM327 v1.5"));
        assert_eq!(sim.received(), vec!["ATZ", "ATE0", "ATSP5"]);
    }

    #[test]
    fn test_connect_ok_reports_failure() {
        let transport = Transport::new();
        let settings = ConnectionSettings::serial("/dev/niva-diag-missing");
        assert!(!transport.connect_ok(&settings, &init()));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(transport.get_statistics().last_error.is_some());
    }

    #[test]
    fn test_handshake_fails_closed() {
        let sim = SimulatedAdapter::new();
        sim.respond("ATSP5", "?");
        let transport = Transport::new();
        let result = transport.connect_link(Box::new(sim.clone()), &ConnectionSettings::default(), &init());
        assert!(matches!(result, Err(TransportError::Handshake { .. })));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.send_command("0100", Duration::from_millis(100)), "NOT CONNECTED");
        assert!(transport.get_statistics().last_error.is_some());
    }

    #[test]
    fn test_send_command_cleans_reply() {
        let sim = SimulatedAdapter::new();
        sim.respond("010C", "41 0C 1A F8");
        let transport = connected(&sim);
        assert_eq!(transport.send_command("010C", Duration::from_millis(500)), "41 0C 1A F8");
        let stats = transport.get_statistics();
        assert!(stats.bytes_sent > 0);
        assert!(stats.bytes_received > 0);
    }

    #[test]
    fn test_timeout_counts_error() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        sim.set_silent(true);
        let reply = transport.send_command("010C", Duration::from_millis(50));
        assert!(reply.contains("ERROR"));
        assert_eq!(transport.get_statistics().errors, 1);
    }

    #[test]
    fn test_io_failure_counts_error() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        sim.set_fail_writes(true);
        assert!(transport.send_command("0100", Duration::from_millis(100)).contains("ERROR"));
        assert!(transport.get_statistics().errors >= 1);
    }

    #[test]
    fn test_io_failure_marks_error_state_until_next_reply() {
        let sim = SimulatedAdapter::new();
        sim.respond("0100", "41 00 BE 3E B8 11");
        let transport = connected(&sim);

        sim.fail_next_write("0100");
        assert!(matches!(
            transport.exchange("0100", Duration::from_millis(200)),
            Err(TransportError::Io(_))
        ));
        assert!(matches!(transport.state(), ConnectionState::Error(_)));
        assert!(!transport.is_connected());
        assert_eq!(
            transport.get_statistics().last_error.as_deref(),
            Some("simulated write glitch")
        );

        assert_eq!(transport.send_command("0100", Duration::from_millis(500)), "41 00 BE 3E B8 11");
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_resets_counters() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        transport.send_command("0100", Duration::from_millis(500));
        transport.disconnect();
        let stats = transport.get_statistics();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.state, ConnectionState::Disconnected);
        // Idempotent
        transport.disconnect();
    }

    #[test]
    fn test_send_request_sets_header_once() {
        let sim = SimulatedAdapter::new();
        sim.respond_for("8110F1", "0105", "41 05 7B");
        let transport = connected(&sim);
        let request = Request {
            header: Some("8110F1".to_string()),
            receive_filter: None,
            command: "0105".to_string(),
        };

        let first = transport.send_request(&request, Duration::from_millis(500)).unwrap();
        let second = transport.send_request(&request, Duration::from_millis(500)).unwrap();
        assert_eq!(first.response, "41 05 7B");
        assert_eq!(second.kind, ResponseKind::Data);

        let headers = sim.received().iter().filter(|c| c.starts_with("ATSH")).count();
        assert_eq!(headers, 1);
    }

    #[test]
    fn test_unsolicited_frames_reach_queue() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        let mut rx = transport.take_unsolicited_frames().unwrap();
        assert!(transport.take_unsolicited_frames().is_none());

        sim.push_unsolicited("7E8 03 41 0D 28");
        let deadline = Instant::now() + Duration::from_secs(2);
        let frame = loop {
            if let Ok(frame) = rx.try_recv() {
                break frame;
            }
            assert!(Instant::now() < deadline, "no unsolicited frame");
            thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(frame, "7E8 03 41 0D 28");
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let sim = SimulatedAdapter::new();
        let transport = connected(&sim);
        transport.send_command("0100", Duration::from_millis(500));
        transport
            .connect_link(Box::new(sim.clone()), &ConnectionSettings::default(), &init())
            .unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.get_statistics().errors, 0);
    }
}
