//! Input validation for connection settings and user-entered values
//!
//! Everything the GUI or the CLI hands to the core passes through here
//! first, so malformed input never reaches the adapter.

use crate::config::{ConnectionSettings, TransportKind};
use crate::constants::{baud, limits};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Validation error with detailed message
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

// ============================================================================
// CONNECTION SETTINGS
// ============================================================================

/// Validates baud rate is within acceptable range
pub fn validate_baud_rate(rate: u32) -> ValidationResult<u32> {
    if (baud::MIN_BAUD..=baud::MAX_BAUD).contains(&rate) {
        Ok(rate)
    } else {
        Err(ValidationError::new(
            "baud_rate",
            format!(
                "Invalid baud rate {}. Must be between {} and {}",
                rate,
                baud::MIN_BAUD,
                baud::MAX_BAUD
            ),
        ))
    }
}

/// Validates a Bluetooth MAC address (`:` or `-` separated, or bare hex)
/// and returns it in canonical `AA:BB:CC:DD:EE:FF` form
pub fn validate_mac_address(mac: &str) -> ValidationResult<String> {
    let mac = mac.trim();
    let digits: String = mac.chars().filter(|c| *c != ':' && *c != '-').collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::new(
            "target",
            format!("Invalid MAC address '{}'", mac),
        ));
    }

    let upper = digits.to_ascii_uppercase();
    let octets: Vec<&str> = (0..12).step_by(2).map(|i| &upper[i..i + 2]).collect();
    Ok(octets.join(":"))
}

/// Validates a `host:port` target for WiFi adapters
pub fn validate_host_port(target: &str) -> ValidationResult<(String, u16)> {
    let target = target.trim();
    let (host, port) = target.rsplit_once(':').ok_or_else(|| {
        ValidationError::new("target", format!("Expected host:port, got '{}'", target))
    })?;

    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("target", format!("Invalid host '{}'", host)));
    }

    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok((host.to_string(), p)),
        _ => Err(ValidationError::new("target", format!("Invalid port '{}'", port))),
    }
}

/// Validates the target string for the chosen transport kind
pub fn validate_target(kind: TransportKind, target: &str) -> ValidationResult<String> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("target", "Target cannot be empty"));
    }

    match kind {
        TransportKind::Serial => Ok(trimmed.to_string()),
        TransportKind::Bluetooth => {
            // Explicit RFCOMM device paths pass through untouched
            if trimmed.starts_with('/') || trimmed.to_ascii_uppercase().starts_with("COM") {
                Ok(trimmed.to_string())
            } else {
                validate_mac_address(trimmed)
            }
        }
        TransportKind::Tcp => validate_host_port(trimmed).map(|(h, p)| format!("{}:{}", h, p)),
    }
}

fn validate_range_ms(field: &str, value: u64, min: u64, max: u64) -> ValidationResult<u64> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::new(
            field,
            format!("{} ms out of range ({}-{})", value, min, max),
        ))
    }
}

/// Validates a whole settings record and returns it with the target
/// normalized
pub fn validate_settings(settings: &ConnectionSettings) -> ValidationResult<ConnectionSettings> {
    let mut checked = settings.clone();
    checked.target = validate_target(settings.kind, &settings.target)?;
    if settings.kind != TransportKind::Tcp {
        validate_baud_rate(settings.baud_rate)?;
    }
    validate_range_ms(
        "read_timeout_ms",
        settings.read_timeout_ms,
        limits::MIN_TIMEOUT_MS,
        limits::MAX_TIMEOUT_MS,
    )?;
    validate_range_ms(
        "command_timeout_ms",
        settings.command_timeout_ms,
        limits::MIN_TIMEOUT_MS,
        limits::MAX_TIMEOUT_MS,
    )?;
    validate_range_ms(
        "monitor_poll_ms",
        settings.monitor_poll_ms,
        limits::MIN_POLL_MS,
        limits::MAX_POLL_MS,
    )?;
    if settings.retry_count > limits::MAX_RETRIES {
        return Err(ValidationError::new(
            "retry_count",
            format!(
                "Too many retries: {} (max: {})",
                settings.retry_count,
                limits::MAX_RETRIES
            ),
        ));
    }
    Ok(checked)
}

// ============================================================================
// VEHICLE INPUT VALIDATION
// ============================================================================

/// Validates a 17 character VIN (ISO 3779: no I, O or Q) and returns it
/// upper-cased
pub fn validate_vin(vin: &str) -> ValidationResult<String> {
    let vin = vin.trim().to_ascii_uppercase();

    if vin.len() != 17 {
        return Err(ValidationError::new(
            "vin",
            format!("VIN must be 17 characters, got {}", vin.len()),
        ));
    }

    if let Some(bad) = vin
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() || matches!(c, 'I' | 'O' | 'Q'))
    {
        return Err(ValidationError::new(
            "vin",
            format!("Invalid VIN character '{}'", bad),
        ));
    }

    Ok(vin)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_baud_rate_valid() {
        assert!(validate_baud_rate(38400).is_ok());
        assert!(validate_baud_rate(115200).is_ok());
    }

    #[test]
    fn test_validate_baud_rate_invalid() {
        assert!(validate_baud_rate(0).is_err());
        assert!(validate_baud_rate(10_000_000).is_err());
    }

    #[test]
    fn test_validate_mac_address() {
        assert_eq!(
            validate_mac_address("00-1d-a5-68-98-8b").unwrap(),
            "00:1D:A5:68:98:8B"
        );
        assert_eq!(validate_mac_address("001DA568988B").unwrap(), "00:1D:A5:68:98:8B");
        assert!(validate_mac_address("00:1D:A5:68:98").is_err());
        assert!(validate_mac_address("ZZ:1D:A5:68:98:8B").is_err());
    }

    #[test]
    fn test_validate_host_port() {
        assert_eq!(
            validate_host_port("192.168.0.10:35000").unwrap(),
            ("192.168.0.10".to_string(), 35000)
        );
        assert!(validate_host_port("192.168.0.10").is_err());
        assert!(validate_host_port("192.168.0.10:0").is_err());
        assert!(validate_host_port(":35000").is_err());
    }

    #[test]
    fn test_validate_target_per_kind() {
        assert_eq!(validate_target(TransportKind::Serial, " COM3 ").unwrap(), "COM3");
        assert_eq!(
            validate_target(TransportKind::Bluetooth, "/dev/rfcomm0").unwrap(),
            "/dev/rfcomm0"
        );
        assert!(validate_target(TransportKind::Bluetooth, "elm327").is_err());
        assert!(validate_target(TransportKind::Tcp, "").is_err());
    }

    #[test]
    fn test_validate_settings() {
        let settings = ConnectionSettings::tcp("192.168.0.10:35000");
        assert!(validate_settings(&settings).is_ok());

        let mut bad = ConnectionSettings::serial("/dev/ttyUSB0");
        bad.retry_count = 50;
        assert_eq!(validate_settings(&bad).unwrap_err().field, "retry_count");

        let mut bad = ConnectionSettings::serial("/dev/ttyUSB0");
        bad.command_timeout_ms = 5;
        assert_eq!(validate_settings(&bad).unwrap_err().field, "command_timeout_ms");
    }

    #[test]
    fn test_validate_vin() {
        assert_eq!(
            validate_vin("x9l21230060123456").unwrap(),
            "X9L21230060123456"
        );
        assert!(validate_vin("X9L2123006012345").is_err());
        assert!(validate_vin("X9L2123O060123456").is_err());
    }

    #[test]
    fn test_error_display() {
        let err = ValidationError::new("vin", "too short");
        assert_eq!(err.to_string(), "vin: too short");
    }
}
