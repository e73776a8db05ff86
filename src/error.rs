//! Error types for the diagnostic core

use thiserror::Error;

/// Errors raised while talking to the ELM327 adapter
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// No live handle
    #[error("Adapter not connected")]
    NotConnected,

    /// Target port, Bluetooth device or host could not be found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Target string could not be interpreted for the chosen transport
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Opening the port or socket failed
    #[error("Failed to open {target}: {reason}")]
    OpenFailed { target: String, reason: String },

    /// Read or write on an open handle failed
    #[error("I/O error: {0}")]
    Io(String),

    /// No prompt arrived before the wait time elapsed
    #[error("Timeout waiting for adapter response after {0}ms")]
    Timeout(u64),

    /// A handshake step was rejected by the adapter
    #[error("Adapter initialization failed at '{command}': {response}")]
    Handshake { command: String, response: String },

    /// The adapter refused an addressing command during a session
    #[error("Adapter rejected '{command}': {response}")]
    Rejected { command: String, response: String },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => TransportError::DeviceNotFound(err.description),
            _ => TransportError::Io(err.description),
        }
    }
}

/// Errors returned by the diagnostics engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Transport is not connected; nothing was started
    #[error("Adapter not connected")]
    NotConnected,

    /// A run is already in progress on this engine instance
    #[error("A diagnostic run is already in progress")]
    AlreadyRunning,

    /// The adapter went away in the middle of a run
    #[error("Connection to adapter lost: {0}")]
    ConnectionLost(String),

    /// The caller cancelled the run
    #[error("cancelled")]
    Cancelled,

    /// The worker panicked
    #[error("Diagnostic worker failed: {0}")]
    WorkerPanic(String),

    /// Reconnection attempts were exhausted
    #[error("Connection failed after {attempts} attempts: {last}")]
    ConnectFailed { attempts: u32, last: TransportError },
}

/// Errors raised when resolving a vehicle profile to protocol parameters
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SelectionError {
    /// Model and ECU type never shipped together
    #[error("ECU type {ecu} is not valid for {model}")]
    IncompatibleEcu { model: String, ecu: String },

    /// Year outside the production span of the model
    #[error("Model year {year} is outside the {model} production range {first}-{last}")]
    YearOutOfRange {
        model: String,
        year: u16,
        first: u16,
        last: u16,
    },
}
