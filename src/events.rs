//! Diagnostic events and the observer registry

use crate::report::DiagnosticReport;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Event names observers can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(EventKind::Status),
            "error" => Ok(EventKind::Error),
            "complete" => Ok(EventKind::Complete),
            _ => Err(UnknownEvent(s.to_string())),
        }
    }
}

/// Phases of a full diagnostic run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    EcuCheck,
    DtcRead,
    LiveData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum DiagnosticEvent {
    Status { phase: Phase, message: String },
    Error { message: String, report: DiagnosticReport },
    Complete { report: DiagnosticReport },
}

impl DiagnosticEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DiagnosticEvent::Status { .. } => EventKind::Status,
            DiagnosticEvent::Error { .. } => EventKind::Error,
            DiagnosticEvent::Complete { .. } => EventKind::Complete,
        }
    }
}

pub type Callback = Arc<dyn Fn(&DiagnosticEvent) + Send + Sync>;

/// Observers per event kind, fired in registration order
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, callback: Callback) {
        crate::transport::lock(&self.callbacks)
            .entry(kind)
            .or_default()
            .push(callback);
    }

    pub fn count(&self, kind: EventKind) -> usize {
        crate::transport::lock(&self.callbacks)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every observer of the event's kind. The registry lock is not
    /// held while observers run, so they may register further callbacks.
    pub fn notify(&self, event: &DiagnosticEvent) {
        let observers: Vec<Callback> = crate::transport::lock(&self.callbacks)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for observer in observers {
            observer(event);
        }
    }
}
