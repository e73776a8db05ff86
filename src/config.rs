//! Connection settings consumed by the transport and the reconnect policy

use crate::constants::{baud, timing};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Physical transport to the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    Bluetooth,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Serial => "serial",
            TransportKind::Bluetooth => "bluetooth",
            TransportKind::Tcp => "tcp",
        };
        f.write_str(s)
    }
}

/// Settings for one adapter connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub kind: TransportKind,
    /// Port name, Bluetooth MAC or device path, or `host:port`
    pub target: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub retry_count: u32,
    pub monitor_poll_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
            target: String::new(),
            baud_rate: baud::ELM_DEFAULT,
            read_timeout_ms: timing::READ_TIMEOUT_MS,
            command_timeout_ms: timing::COMMAND_TIMEOUT_MS,
            retry_count: 3,
            monitor_poll_ms: timing::MONITOR_POLL_MS,
        }
    }
}

impl ConnectionSettings {
    pub fn serial(port: &str) -> Self {
        Self {
            target: port.to_string(),
            ..Self::default()
        }
    }

    pub fn tcp(host_port: &str) -> Self {
        Self {
            kind: TransportKind::Tcp,
            target: host_port.to_string(),
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.kind, TransportKind::Serial);
        assert_eq!(settings.baud_rate, 38_400);
        assert_eq!(settings.retry_count, 3);
        assert_eq!(settings.command_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"kind": "bluetooth", "target": "00:1D:A5:68:98:8B"}"#;
        let settings: ConnectionSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.kind, TransportKind::Bluetooth);
        assert_eq!(settings.target, "00:1D:A5:68:98:8B");
        assert_eq!(settings.baud_rate, 38_400);
        assert_eq!(settings.monitor_poll_ms, 50);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&TransportKind::Tcp).unwrap();
        assert_eq!(json, "\"tcp\"");
        assert_eq!(TransportKind::Bluetooth.to_string(), "bluetooth");
    }
}
