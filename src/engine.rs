//! Diagnostics Engine
//!
//! Drives a full diagnostic run on a background thread: ECU connectivity
//! check, DTC read and live data, strictly in that order. Progress goes to
//! registered callbacks; callers hold a [`RunHandle`] to cancel, block on or
//! await the run.

use crate::codec::{self, Request, ResponseKind};
use crate::config::ConnectionSettings;
use crate::constants::{kwp, limits, obd, timing, uds};
use crate::definitions::{DtcReadMethod, EcuDefinition, Procedure, ProtocolDefinitionSet};
use crate::dtc::{self, Dtc, DtcStatus, FreezeFrame};
use crate::error::{EngineError, TransportError};
use crate::events::{CallbackRegistry, DiagnosticEvent, EventKind, Phase, UnknownEvent};
use crate::pid::Pid;
use crate::report::{DiagnosticReport, DiagnosticStatus, LiveValue, ModuleResult, ModuleStatus};
use crate::transport::{lock, Exchange, Transport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of the engine's current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Everything a run needs besides the transport
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    pub definitions: Arc<ProtocolDefinitionSet>,
    /// Upper bound for one ECU request
    pub command_timeout: Duration,
}

impl DiagnosticContext {
    pub fn new(definitions: Arc<ProtocolDefinitionSet>) -> Self {
        Self {
            definitions,
            command_timeout: timing::COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

struct EngineState {
    status: RunStatus,
    report: Option<Arc<Mutex<DiagnosticReport>>>,
}

/// Diagnostics engine bound to one transport and one definition set
pub struct DiagnosticsEngine {
    transport: Arc<Transport>,
    context: DiagnosticContext,
    state: Arc<Mutex<EngineState>>,
    callbacks: Arc<CallbackRegistry>,
}

impl DiagnosticsEngine {
    pub fn new(transport: Arc<Transport>, context: DiagnosticContext) -> Self {
        Self {
            transport,
            context,
            state: Arc::new(Mutex::new(EngineState {
                status: RunStatus::Idle,
                report: None,
            })),
            callbacks: Arc::new(CallbackRegistry::new()),
        }
    }

    pub fn definitions(&self) -> &ProtocolDefinitionSet {
        &self.context.definitions
    }

    pub fn status(&self) -> RunStatus {
        lock(&self.state).status
    }

    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    /// Snapshot of the current or most recent run's report
    pub fn last_report(&self) -> Option<DiagnosticReport> {
        let report = lock(&self.state).report.clone()?;
        let snapshot = lock(&report).clone();
        Some(snapshot)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn register_callback<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.callbacks.register(kind, Arc::new(callback));
    }

    /// Register by event name: `"status"`, `"error"` or `"complete"`
    pub fn register_callback_named<F>(&self, event: &str, callback: F) -> Result<(), UnknownEvent>
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        let kind: EventKind = event.parse()?;
        self.register_callback(kind, callback);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Full diagnostic
    // ------------------------------------------------------------------

    /// Start a full diagnostic on a worker thread.
    ///
    /// Fails without spawning anything when the transport is not connected
    /// or another run is still in progress.
    pub fn perform_full_diagnostic(&self, vehicle_model: &str) -> Result<RunHandle, EngineError> {
        if !self.transport.is_connected() {
            log::warn!("Diagnostic requested without a connected adapter");
            return Err(EngineError::NotConnected);
        }

        let report = Arc::new(Mutex::new(DiagnosticReport::new(vehicle_model)));
        {
            let mut state = lock(&self.state);
            if state.status == RunStatus::Running {
                log::warn!("Diagnostic already running, request rejected");
                return Err(EngineError::AlreadyRunning);
            }
            state.status = RunStatus::Running;
            state.report = Some(report.clone());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (status_tx, status_rx) = watch::channel(RunStatus::Running);
        let worker = Worker {
            transport: self.transport.clone(),
            definitions: self.context.definitions.clone(),
            command_timeout: self.context.command_timeout,
            cancel: cancel.clone(),
            report: report.clone(),
            state: self.state.clone(),
            callbacks: self.callbacks.clone(),
            status_tx,
            io_failures: AtomicU32::new(0),
        };

        log::info!("Starting full diagnostic for {}", vehicle_model);
        let spawned = thread::Builder::new()
            .name("niva-diagnostic".to_string())
            .spawn(move || worker.execute());

        match spawned {
            Ok(thread) => Ok(RunHandle {
                report,
                cancel,
                status: status_rx,
                thread: Some(thread),
            }),
            Err(e) => {
                let message = format!("failed to start worker: {}", e);
                log::error!("{}", message);
                {
                    let mut report = lock(&report);
                    report.diagnostic_status = DiagnosticStatus::Failed;
                    report.error = Some(message.clone());
                }
                lock(&self.state).status = RunStatus::Failed;
                Err(EngineError::WorkerPanic(message))
            }
        }
    }

    // ------------------------------------------------------------------
    // Service operations
    // ------------------------------------------------------------------

    /// Clear stored codes in every ECU. True only if every ECU confirmed.
    pub fn clear_dtcs(&self) -> bool {
        if !self.ready("clear DTCs") {
            return false;
        }

        let mut all_cleared = true;
        for ecu in &self.context.definitions.ecus {
            let (service, data) = ecu.dtc_method.clear_request();
            let request = match ecu.dtc_method {
                DtcReadMethod::Obd2 => codec::build_command(service, None, Some(&ecu.address)),
                _ => codec::build_service_request(service, &data, Some(&ecu.address)),
            };

            match self.transport.send_request(&request, self.context.command_timeout) {
                Ok(exchange) if codec::is_positive_response(&exchange.response, service) => {
                    log::info!("Cleared DTCs in {}", ecu.name);
                }
                Ok(exchange) => {
                    log::warn!("{} did not clear DTCs: {}", ecu.name, describe_reply(&exchange));
                    all_cleared = false;
                }
                Err(e) => {
                    log::error!("Clear DTCs request to {} failed: {}", ecu.name, e);
                    all_cleared = false;
                }
            }
        }
        all_cleared
    }

    /// Run an adaptation from the catalog. False for unknown ids and on
    /// the first step the ECU does not confirm.
    pub fn perform_adaptation(&self, procedure_id: &str) -> bool {
        match self.context.definitions.adaptation(procedure_id) {
            Some(procedure) => self.run_procedure(procedure),
            None => {
                log::warn!("Unknown adaptation '{}'", procedure_id);
                false
            }
        }
    }

    /// Run a reset from the catalog
    pub fn perform_reset(&self, procedure_id: &str) -> bool {
        match self.context.definitions.reset(procedure_id) {
            Some(procedure) => self.run_procedure(procedure),
            None => {
                log::warn!("Unknown reset '{}'", procedure_id);
                false
            }
        }
    }

    fn ready(&self, operation: &str) -> bool {
        if !self.transport.is_connected() {
            log::warn!("Cannot {}: adapter not connected", operation);
            return false;
        }
        if self.is_running() {
            log::warn!("Cannot {} while a diagnostic is running", operation);
            return false;
        }
        true
    }

    fn run_procedure(&self, procedure: &Procedure) -> bool {
        if !self.ready(&procedure.name) {
            return false;
        }
        let Some(ecu) = self.context.definitions.ecu(&procedure.ecu_id) else {
            log::error!("{} targets unknown ECU '{}'", procedure.name, procedure.ecu_id);
            return false;
        };

        log::info!("Starting {} on {} ({})", procedure.name, ecu.name, ecu.address);
        for (index, step) in procedure.steps.iter().enumerate() {
            let request = codec::build_service_request(step.service, &step.data, Some(&ecu.address));
            match self.transport.send_request(&request, self.context.command_timeout) {
                Ok(exchange) if codec::is_positive_response(&exchange.response, step.service) => {
                    log::debug!("{} step {} accepted: {}", procedure.name, index + 1, exchange.response);
                }
                Ok(exchange) => {
                    log::warn!(
                        "{} step {} ({}) rejected: {}",
                        procedure.name,
                        index + 1,
                        request.command,
                        describe_reply(&exchange)
                    );
                    return false;
                }
                Err(e) => {
                    log::error!("{} step {} failed: {}", procedure.name, index + 1, e);
                    return false;
                }
            }
        }

        log::info!("{} completed", procedure.name);
        true
    }
}

/// Connect `transport`, retrying `settings.retry_count` times after the
/// first failure
pub fn connect_with_retry(
    transport: &Transport,
    settings: &ConnectionSettings,
    definitions: &ProtocolDefinitionSet,
) -> Result<(), EngineError> {
    let attempts = settings.retry_count.saturating_add(1);
    let mut last = TransportError::NotConnected;

    for attempt in 1..=attempts {
        match transport.connect(settings, &definitions.init_sequence) {
            Ok(()) => {
                if attempt > 1 {
                    log::info!("Connected on attempt {}/{}", attempt, attempts);
                }
                return Ok(());
            }
            Err(e) => {
                log::warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                last = e;
            }
        }
        if attempt < attempts {
            thread::sleep(timing::RETRY_DELAY);
        }
    }

    Err(EngineError::ConnectFailed { attempts, last })
}

/// Handle on one running diagnostic
pub struct RunHandle {
    report: Arc<Mutex<DiagnosticReport>>,
    cancel: Arc<AtomicBool>,
    status: watch::Receiver<RunStatus>,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Snapshot of the report as filled in so far
    pub fn report(&self) -> DiagnosticReport {
        lock(&self.report).clone()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Ask the worker to stop at the next ECU or PID boundary
    pub fn cancel(&self) {
        log::info!("Cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Receiver that changes once the run finishes
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Block until the worker, including its callbacks, has finished
    pub fn join(mut self) -> DiagnosticReport {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Diagnostic worker thread panicked");
            }
        }
        self.report()
    }

    /// Await the end of the run without blocking an async runtime
    pub async fn wait(&mut self) -> DiagnosticReport {
        while !self.status.borrow().is_finished() {
            // Sender dropped: the worker is gone
            if self.status.changed().await.is_err() {
                break;
            }
        }
        self.report()
    }
}

// ============================================================================
// WORKER
// ============================================================================

type Outcome<T> = Result<Result<T, String>, EngineError>;

struct Worker {
    transport: Arc<Transport>,
    definitions: Arc<ProtocolDefinitionSet>,
    command_timeout: Duration,
    cancel: Arc<AtomicBool>,
    report: Arc<Mutex<DiagnosticReport>>,
    state: Arc<Mutex<EngineState>>,
    callbacks: Arc<CallbackRegistry>,
    status_tx: watch::Sender<RunStatus>,
    /// I/O failures since the last exchange that reached the adapter
    io_failures: AtomicU32,
}

impl Worker {
    fn execute(self) {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
            Ok(result) => result,
            Err(payload) => Err(EngineError::WorkerPanic(panic_message(payload.as_ref()))),
        };
        self.finish(result);
    }

    fn run(&self) -> Result<(), EngineError> {
        let definitions = self.definitions.clone();

        self.notify_status(
            Phase::EcuCheck,
            format!("Checking {} ECUs", definitions.ecus.len()),
        );
        for ecu in &definitions.ecus {
            self.checkpoint()?;
            let module = self.check_ecu(ecu)?;
            log::info!("{} ({}): {:?}", ecu.name, ecu.address, module.status);
            lock(&self.report).modules.insert(ecu.id.clone(), module);
        }

        self.notify_status(Phase::DtcRead, "Reading diagnostic trouble codes".to_string());
        for ecu in &definitions.ecus {
            self.checkpoint()?;
            if self.module_status(&ecu.id) != Some(ModuleStatus::Connected) {
                log::debug!("Skipping DTC read for {}", ecu.name);
                continue;
            }
            let outcome = self.read_dtcs(ecu)?;
            let mut report = lock(&self.report);
            if let Some(module) = report.modules.get_mut(&ecu.id) {
                match outcome {
                    Ok(dtcs) => {
                        log::info!("{}: {} DTC(s)", ecu.name, dtcs.len());
                        module.dtcs = dtcs;
                    }
                    Err(message) => {
                        log::warn!("{}: DTC read failed: {}", ecu.name, message);
                        module.error = Some(message);
                    }
                }
            }
        }

        self.notify_status(
            Phase::LiveData,
            format!("Reading {} live parameters", definitions.pids.len()),
        );
        let engine = definitions.engine();
        for pid in &definitions.pids {
            self.checkpoint()?;
            let value = match engine {
                Some(ecu) => self.read_pid(ecu, *pid)?,
                None => LiveValue::failed(pid.unit(), "No engine ECU configured"),
            };
            lock(&self.report).live_data.insert(pid.key().to_string(), value);
        }

        Ok(())
    }

    fn finish(&self, result: Result<(), EngineError>) {
        let (status, event) = {
            let mut report = lock(&self.report);
            match result {
                Ok(()) => {
                    report.diagnostic_status = DiagnosticStatus::Completed;
                    log::info!("Diagnostic completed: {} DTC(s)", report.dtc_count());
                    (
                        RunStatus::Completed,
                        DiagnosticEvent::Complete {
                            report: report.clone(),
                        },
                    )
                }
                Err(e) => {
                    let message = e.to_string();
                    report.diagnostic_status = DiagnosticStatus::Failed;
                    report.error = Some(message.clone());
                    log::error!("Diagnostic failed: {}", message);
                    (
                        RunStatus::Failed,
                        DiagnosticEvent::Error {
                            message,
                            report: report.clone(),
                        },
                    )
                }
            }
        };

        lock(&self.state).status = status;
        self.callbacks.notify(&event);
        self.status_tx.send_replace(status);
    }

    fn notify_status(&self, phase: Phase, message: String) {
        log::info!("{}", message);
        self.callbacks.notify(&DiagnosticEvent::Status { phase, message });
    }

    fn checkpoint(&self) -> Result<(), EngineError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    fn module_status(&self, id: &str) -> Option<ModuleStatus> {
        lock(&self.report).modules.get(id).map(|m| m.status)
    }

    /// Send one request. A dropped handle ends the run, and so does a run of
    /// consecutive I/O failures; anything less belongs to the item being read.
    fn send(&self, request: &Request) -> Result<Result<Exchange, TransportError>, EngineError> {
        match self.transport.send_request(request, self.command_timeout) {
            Err(TransportError::NotConnected) => {
                Err(EngineError::ConnectionLost("adapter disconnected".to_string()))
            }
            Err(TransportError::Io(reason)) => {
                let failures = self.io_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= limits::MAX_CONSECUTIVE_IO_FAILURES {
                    return Err(EngineError::ConnectionLost(reason));
                }
                log::warn!("I/O failure {} on '{}': {}", failures, request.command, reason);
                Ok(Err(TransportError::Io(reason)))
            }
            other => {
                self.io_failures.store(0, Ordering::SeqCst);
                Ok(other)
            }
        }
    }

    // ------------------------------------------------------------------
    // Phase 1: connectivity
    // ------------------------------------------------------------------

    fn check_ecu(&self, ecu: &EcuDefinition) -> Result<ModuleResult, EngineError> {
        let request = Request {
            header: Some(ecu.address.header()),
            receive_filter: ecu.address.receive_filter(),
            command: ecu.presence_check.clone(),
        };
        let sid = service_of(&ecu.presence_check);

        let (status, error) = match self.send(&request)? {
            Ok(exchange) => match exchange.kind {
                ResponseKind::Data
                    if sid.is_some_and(|sid| codec::is_positive_response(&exchange.response, sid)) =>
                {
                    (ModuleStatus::Connected, None)
                }
                // A refusal still proves the ECU is on the bus
                ResponseKind::Negative(_) => (ModuleStatus::Connected, None),
                ResponseKind::NoData => (ModuleStatus::NotResponding, None),
                _ => (ModuleStatus::Error, Some(describe_reply(&exchange))),
            },
            Err(e) => (ModuleStatus::Error, Some(e.to_string())),
        };

        Ok(ModuleResult {
            status,
            name: ecu.name.clone(),
            address: ecu.address.to_string(),
            dtcs: Vec::new(),
            error,
        })
    }

    // ------------------------------------------------------------------
    // Phase 2: trouble codes
    // ------------------------------------------------------------------

    fn read_dtcs(&self, ecu: &EcuDefinition) -> Outcome<Vec<Dtc>> {
        let seen = Utc::now();
        let found = match ecu.dtc_method {
            DtcReadMethod::Obd2 => return self.read_obd_dtcs(ecu),
            DtcReadMethod::Kwp2000ByStatus => {
                let request = codec::build_service_request(
                    kwp::READ_DTC_BY_STATUS,
                    &[0x00, 0xFF, 0x00],
                    Some(&ecu.address),
                );
                self.read_service_dtcs(&request, codec::parse_kwp_dtcs)?
            }
            DtcReadMethod::UdsByStatusMask => {
                let request = codec::build_service_request(
                    uds::READ_DTC_INFO,
                    &[uds::dtc::REPORT_BY_STATUS_MASK, uds::dtc::STATUS_MASK_ALL],
                    Some(&ecu.address),
                );
                self.read_service_dtcs(&request, codec::parse_uds_dtcs)?
            }
        };

        Ok(found.map(|codes| {
            let mut dtcs = Vec::new();
            for (code, status) in codes {
                dtc::record(&mut dtcs, &code, status, seen);
            }
            dtcs
        }))
    }

    fn read_obd_dtcs(&self, ecu: &EcuDefinition) -> Outcome<Vec<Dtc>> {
        let seen = Utc::now();
        let mut modes = vec![
            (obd::STORED_DTCS, DtcStatus::Active),
            (obd::PENDING_DTCS, DtcStatus::Pending),
        ];
        if self.definitions.protocol.is_can() {
            modes.push((obd::PERMANENT_DTCS, DtcStatus::Permanent));
        }

        let mut dtcs = Vec::new();
        let mut failures = Vec::new();
        for (mode, status) in &modes {
            let request = codec::build_command(*mode, None, Some(&ecu.address));
            match self.send(&request)? {
                Ok(exchange) if exchange.kind == ResponseKind::Data => {
                    for code in codec::parse_obd_dtcs(&exchange.response, *mode) {
                        dtc::record(&mut dtcs, &code, *status, seen);
                    }
                }
                Ok(exchange) if exchange.kind == ResponseKind::NoData => {}
                Ok(exchange) => failures.push(format!("mode {:02X}: {}", mode, describe_reply(&exchange))),
                Err(e) => failures.push(format!("mode {:02X}: {}", mode, e)),
            }
        }

        if failures.len() == modes.len() {
            return Ok(Err(failures.join("; ")));
        }
        for failure in &failures {
            log::warn!("{}: {}", ecu.name, failure);
        }

        self.attach_freeze_frame(ecu, &mut dtcs)?;
        Ok(Ok(dtcs))
    }

    fn read_service_dtcs(
        &self,
        request: &Request,
        parse: fn(&str) -> Vec<(String, DtcStatus)>,
    ) -> Outcome<Vec<(String, DtcStatus)>> {
        let outcome = match self.send(request)? {
            Ok(exchange) => match exchange.kind {
                ResponseKind::Data => Ok(parse(&exchange.response)),
                ResponseKind::NoData => Ok(Vec::new()),
                _ => Err(describe_reply(&exchange)),
            },
            Err(e) => Err(e.to_string()),
        };
        Ok(outcome)
    }

    /// Read the mode 02 freeze frame and attach it to the stored code that
    /// triggered it
    fn attach_freeze_frame(&self, ecu: &EcuDefinition, dtcs: &mut [Dtc]) -> Result<(), EngineError> {
        if !dtcs.iter().any(|d| d.status == DtcStatus::Active) {
            return Ok(());
        }

        let request = codec::build_command(obd::FREEZE_FRAME, Some(obd::PID_FREEZE_DTC), Some(&ecu.address));
        let trigger = match self.send(&request)? {
            Ok(exchange) if exchange.kind == ResponseKind::Data => codec::parse_freeze_frame_dtc(&exchange.response),
            _ => None,
        };
        let Some(trigger) = trigger else {
            return Ok(());
        };
        let Some(target) = dtcs.iter_mut().find(|d| d.code == trigger) else {
            log::debug!("Freeze frame belongs to {}, which is not stored", trigger);
            return Ok(());
        };

        let mut values = BTreeMap::new();
        for pid in &self.definitions.pids {
            self.checkpoint()?;
            let request = codec::build_command(obd::FREEZE_FRAME, Some(pid.code()), Some(&ecu.address));
            if let Ok(exchange) = self.send(&request)? {
                let code = format!("{:02X}{:02X}", obd::FREEZE_FRAME, pid.code());
                if let Some(value) = codec::parse_response(&exchange.response, &code) {
                    values.insert(pid.key().to_string(), value);
                }
            }
        }

        log::info!("Freeze frame for {}: {} value(s)", trigger, values.len());
        target.freeze_frame = Some(FreezeFrame { dtc: trigger, values });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 3: live data
    // ------------------------------------------------------------------

    fn read_pid(&self, ecu: &EcuDefinition, pid: Pid) -> Result<LiveValue, EngineError> {
        let request = codec::build_command(obd::CURRENT_DATA, Some(pid.code()), Some(&ecu.address));
        let value = match self.send(&request)? {
            Ok(exchange) => match exchange.kind {
                ResponseKind::Data => match codec::parse_response(&exchange.response, &pid.request_code()) {
                    Some(value) => {
                        let out_of_range = self
                            .definitions
                            .normal_range(pid)
                            .is_some_and(|range| !range.contains(value));
                        if out_of_range {
                            log::warn!("{} = {} {} is outside the normal range", pid.name(), value, pid.unit());
                        }
                        LiveValue::reading(value, pid.unit(), out_of_range)
                    }
                    None => LiveValue::failed(pid.unit(), format!("Unparseable response: {}", exchange.response)),
                },
                ResponseKind::NoData => LiveValue::failed(pid.unit(), "No data"),
                _ => LiveValue::failed(pid.unit(), describe_reply(&exchange)),
            },
            Err(e) => LiveValue::failed(pid.unit(), e.to_string()),
        };
        Ok(value)
    }
}

/// Service id of a hex request such as `"3E01"`
fn service_of(command: &str) -> Option<u8> {
    command.get(..2).and_then(|sid| u8::from_str_radix(sid, 16).ok())
}

fn describe_reply(exchange: &Exchange) -> String {
    match exchange.kind {
        ResponseKind::Negative(code) => {
            format!("Rejected: {} (0x{:02X})", kwp::nrc::description(code), code)
        }
        ResponseKind::NoData => "No data".to_string(),
        ResponseKind::AdapterError => format!("Adapter error: {}", exchange.response),
        _ => format!("Unexpected response: {}", exchange.response),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{EcuType, Equipment};

    fn engine() -> DiagnosticsEngine {
        let definitions = Arc::new(ProtocolDefinitionSet::build(EcuType::BoschM797, &Equipment::full()));
        DiagnosticsEngine::new(Arc::new(Transport::new()), DiagnosticContext::new(definitions))
    }

    #[test]
    fn test_run_status_finished() {
        assert!(!RunStatus::Idle.is_finished());
        assert!(!RunStatus::Running.is_finished());
        assert!(RunStatus::Completed.is_finished());
        assert!(RunStatus::Failed.is_finished());
        assert_eq!(serde_json::to_string(&RunStatus::Running).unwrap(), "\"RUNNING\"");
    }

    #[test]
    fn test_not_connected_rejected_without_run() {
        let engine = engine();
        assert!(matches!(
            engine.perform_full_diagnostic("Chevrolet Niva"),
            Err(EngineError::NotConnected)
        ));
        assert_eq!(engine.status(), RunStatus::Idle);
        assert!(engine.last_report().is_none());
    }

    #[test]
    fn test_service_operations_need_connection() {
        let engine = engine();
        assert!(!engine.clear_dtcs());
        assert!(!engine.perform_adaptation("idle_air_control_reset"));
        assert!(!engine.perform_reset("ecu_reset"));
    }

    #[test]
    fn test_unknown_procedure() {
        let engine = engine();
        assert!(!engine.perform_adaptation("no_such_procedure"));
        assert!(!engine.perform_reset("no_such_procedure"));
    }

    #[test]
    fn test_named_callback_registration() {
        let engine = engine();
        assert!(engine.register_callback_named("complete", |_| {}).is_ok());
        assert!(engine.register_callback_named("finished", |_| {}).is_err());
    }

    #[test]
    fn test_service_of() {
        assert_eq!(service_of("3E01"), Some(0x3E));
        assert_eq!(service_of("0100"), Some(0x01));
        assert_eq!(service_of(""), None);
        assert_eq!(service_of("ZZ"), None);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }

    #[test]
    fn test_connect_with_retry_exhausts_attempts() {
        let transport = Transport::new();
        let definitions = ProtocolDefinitionSet::build(EcuType::BoschM797, &Equipment::full());
        let mut settings = ConnectionSettings::serial("/dev/niva-diag-missing");
        settings.retry_count = 1;

        match connect_with_retry(&transport, &settings, &definitions) {
            Err(EngineError::ConnectFailed { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!transport.is_connected());
    }
}
