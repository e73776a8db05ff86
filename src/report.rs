//! Diagnostic report returned by a full diagnostic run

use crate::dtc::Dtc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall state of a run as written in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticStatus {
    InProgress,
    Completed,
    Failed,
}

/// Result of the connectivity check of one ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    Connected,
    NotResponding,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub status: ModuleStatus,
    pub name: String,
    pub address: String,
    pub dtcs: Vec<Dtc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One live-data reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub out_of_range: bool,
}

impl LiveValue {
    pub fn reading(value: f64, unit: &str, out_of_range: bool) -> Self {
        Self {
            value: Some(value),
            unit: unit.to_string(),
            error: None,
            out_of_range,
        }
    }

    pub fn failed(unit: &str, error: impl Into<String>) -> Self {
        Self {
            value: None,
            unit: unit.to_string(),
            error: Some(error.into()),
            out_of_range: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub vehicle_model: String,
    pub diagnostic_status: DiagnosticStatus,
    pub modules: BTreeMap<String, ModuleResult>,
    pub live_data: BTreeMap<String, LiveValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiagnosticReport {
    pub fn new(vehicle_model: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            vehicle_model: vehicle_model.to_string(),
            diagnostic_status: DiagnosticStatus::InProgress,
            modules: BTreeMap::new(),
            live_data: BTreeMap::new(),
            error: None,
        }
    }

    /// Total number of codes across all modules
    pub fn dtc_count(&self) -> usize {
        self.modules.values().map(|m| m.dtcs.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
