//! OBD-II PID Definitions and Decoding
//!
//! Mode 01 parameters read during the live-data phase. The set is closed:
//! every variant carries its code, payload length, unit, normal range and
//! decode formula, so a new parameter cannot be added without a formula.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard OBD-II PIDs used on Niva engine ECUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pid {
    EngineLoad,
    CoolantTemp,
    ShortFuelTrim,
    LongFuelTrim,
    FuelPressure,
    IntakePressure,
    EngineRpm,
    VehicleSpeed,
    TimingAdvance,
    IntakeTemp,
    MafRate,
    ThrottlePosition,
    O2Voltage,
    FuelLevel,
    ControlModuleVoltage,
    AmbientTemp,
    OilTemp,
}

impl Pid {
    /// Every PID, in the order the live-data phase reads them
    pub const ALL: [Pid; 17] = [
        Pid::EngineRpm,
        Pid::VehicleSpeed,
        Pid::CoolantTemp,
        Pid::IntakeTemp,
        Pid::EngineLoad,
        Pid::ThrottlePosition,
        Pid::TimingAdvance,
        Pid::MafRate,
        Pid::IntakePressure,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::O2Voltage,
        Pid::FuelPressure,
        Pid::FuelLevel,
        Pid::ControlModuleVoltage,
        Pid::AmbientTemp,
        Pid::OilTemp,
    ];

    /// PID byte within mode 01
    pub fn code(&self) -> u8 {
        match self {
            Pid::EngineLoad => 0x04,
            Pid::CoolantTemp => 0x05,
            Pid::ShortFuelTrim => 0x06,
            Pid::LongFuelTrim => 0x07,
            Pid::FuelPressure => 0x0A,
            Pid::IntakePressure => 0x0B,
            Pid::EngineRpm => 0x0C,
            Pid::VehicleSpeed => 0x0D,
            Pid::TimingAdvance => 0x0E,
            Pid::IntakeTemp => 0x0F,
            Pid::MafRate => 0x10,
            Pid::ThrottlePosition => 0x11,
            Pid::O2Voltage => 0x14,
            Pid::FuelLevel => 0x2F,
            Pid::ControlModuleVoltage => 0x42,
            Pid::AmbientTemp => 0x46,
            Pid::OilTemp => 0x5C,
        }
    }

    /// Full request code as written on the wire, e.g. `010C`
    pub fn request_code(&self) -> String {
        format!("01{:02X}", self.code())
    }

    /// Look up a PID from its PID byte
    pub fn from_code(code: u8) -> Option<Pid> {
        Pid::ALL.iter().copied().find(|pid| pid.code() == code)
    }

    /// Key used in live-data maps and reports
    pub fn key(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "engine_load",
            Pid::CoolantTemp => "coolant_temp",
            Pid::ShortFuelTrim => "short_fuel_trim",
            Pid::LongFuelTrim => "long_fuel_trim",
            Pid::FuelPressure => "fuel_pressure",
            Pid::IntakePressure => "intake_pressure",
            Pid::EngineRpm => "engine_rpm",
            Pid::VehicleSpeed => "vehicle_speed",
            Pid::TimingAdvance => "timing_advance",
            Pid::IntakeTemp => "intake_temp",
            Pid::MafRate => "maf_rate",
            Pid::ThrottlePosition => "throttle_position",
            Pid::O2Voltage => "o2_voltage",
            Pid::FuelLevel => "fuel_level",
            Pid::ControlModuleVoltage => "control_module_voltage",
            Pid::AmbientTemp => "ambient_temp",
            Pid::OilTemp => "oil_temp",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "Calculated Engine Load",
            Pid::CoolantTemp => "Engine Coolant Temperature",
            Pid::ShortFuelTrim => "Short Term Fuel Trim",
            Pid::LongFuelTrim => "Long Term Fuel Trim",
            Pid::FuelPressure => "Fuel Pressure",
            Pid::IntakePressure => "Intake Manifold Pressure",
            Pid::EngineRpm => "Engine RPM",
            Pid::VehicleSpeed => "Vehicle Speed",
            Pid::TimingAdvance => "Timing Advance",
            Pid::IntakeTemp => "Intake Air Temperature",
            Pid::MafRate => "MAF Air Flow Rate",
            Pid::ThrottlePosition => "Throttle Position",
            Pid::O2Voltage => "O2 Sensor Voltage (B1S1)",
            Pid::FuelLevel => "Fuel Tank Level",
            Pid::ControlModuleVoltage => "Control Module Voltage",
            Pid::AmbientTemp => "Ambient Air Temperature",
            Pid::OilTemp => "Engine Oil Temperature",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Pid::EngineLoad
            | Pid::ShortFuelTrim
            | Pid::LongFuelTrim
            | Pid::ThrottlePosition
            | Pid::FuelLevel => "%",
            Pid::CoolantTemp | Pid::IntakeTemp | Pid::AmbientTemp | Pid::OilTemp => "°C",
            Pid::FuelPressure | Pid::IntakePressure => "kPa",
            Pid::EngineRpm => "rpm",
            Pid::VehicleSpeed => "km/h",
            Pid::TimingAdvance => "°",
            Pid::MafRate => "g/s",
            Pid::O2Voltage | Pid::ControlModuleVoltage => "V",
        }
    }

    /// Number of data bytes after the `41 xx` header
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::EngineRpm | Pid::MafRate | Pid::ControlModuleVoltage | Pid::O2Voltage => 2,
            _ => 1,
        }
    }

    /// Decode the data bytes following the `41 xx` header.
    ///
    /// Returns `None` when fewer bytes than [`Pid::response_bytes`] are present.
    pub fn decode(&self, data: &[u8]) -> Option<f64> {
        if data.len() < self.response_bytes() {
            return None;
        }
        let a = data[0] as f64;
        let raw16 = || (data[0] as f64 * 256.0) + data[1] as f64;

        let value = match self {
            Pid::EngineRpm => raw16() / 4.0,
            Pid::CoolantTemp | Pid::IntakeTemp | Pid::AmbientTemp | Pid::OilTemp => a - 40.0,
            Pid::VehicleSpeed | Pid::IntakePressure => a,
            Pid::ThrottlePosition | Pid::EngineLoad | Pid::FuelLevel => a * 100.0 / 255.0,
            Pid::TimingAdvance => (a - 128.0) / 2.0,
            Pid::ControlModuleVoltage => raw16() / 1000.0,
            Pid::MafRate => raw16() / 100.0,
            Pid::FuelPressure => a * 3.0,
            Pid::ShortFuelTrim | Pid::LongFuelTrim => (a - 128.0) * 100.0 / 128.0,
            // Second byte is the trim of this sensor, not part of the voltage
            Pid::O2Voltage => a / 200.0,
        };
        Some(value)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.request_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_decode() {
        // 0x1AF8 = 6904, 6904 / 4 = 1726
        assert_eq!(Pid::EngineRpm.decode(&[0x1A, 0xF8]), Some(1726.0));
    }

    #[test]
    fn test_coolant_temp_decode() {
        assert_eq!(Pid::CoolantTemp.decode(&[0x7B]), Some(83.0));
    }

    #[test]
    fn test_throttle_decode() {
        let value = Pid::ThrottlePosition.decode(&[0x33]).unwrap();
        assert!((value - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_timing_advance_decode() {
        assert_eq!(Pid::TimingAdvance.decode(&[0x80]), Some(0.0));
        assert_eq!(Pid::TimingAdvance.decode(&[0x94]), Some(10.0));
    }

    #[test]
    fn test_voltage_decode() {
        // 0x0D48 = 3400 mV
        let value = Pid::ControlModuleVoltage.decode(&[0x0D, 0x48]).unwrap();
        assert!((value - 3.4).abs() < 1e-9);
        let value = Pid::ControlModuleVoltage.decode(&[0x36, 0xB0]).unwrap();
        assert!((value - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_maf_and_fuel_pressure_decode() {
        assert_eq!(Pid::MafRate.decode(&[0x01, 0xF4]), Some(5.0));
        assert_eq!(Pid::FuelPressure.decode(&[0x64]), Some(300.0));
    }

    #[test]
    fn test_short_payload_rejected() {
        assert_eq!(Pid::EngineRpm.decode(&[0x1A]), None);
        assert_eq!(Pid::CoolantTemp.decode(&[]), None);
    }

    #[test]
    fn test_request_code() {
        assert_eq!(Pid::EngineRpm.request_code(), "010C");
        assert_eq!(Pid::from_code(0x0C), Some(Pid::EngineRpm));
        assert_eq!(Pid::from_code(0x99), None);
    }

    #[test]
    fn test_codes_unique() {
        for (i, a) in Pid::ALL.iter().enumerate() {
            for b in &Pid::ALL[i + 1..] {
                assert_ne!(a.code(), b.code());
                assert_ne!(a.key(), b.key());
            }
        }
    }
}
