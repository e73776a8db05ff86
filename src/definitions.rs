//! Protocol Definitions
//!
//! Static tables keyed by ECU type: bus protocol, adapter init sequence, ECU
//! addresses, engine PIDs, adaptation and reset procedures, calibration
//! constants and normal operating ranges. A [`ProtocolDefinitionSet`] is
//! built once per session and shared read-only behind an `Arc`.

use crate::constants::{addresses, elm, kwp, timing, uds};
use crate::pid::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// BUS PROTOCOL AND ECU TYPE
// ============================================================================

/// Communication protocol between adapter and vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusProtocol {
    /// ISO 9141-2, 10.4 kbaud, 5 baud init
    Iso9141,
    /// ISO 14230-4 KWP2000, fast init
    Kwp2000Fast,
    /// ISO 15765-4 CAN, 11-bit ids, 500 kbaud
    Can11Bit500k,
}

impl BusProtocol {
    /// Protocol number for `ATSP`
    pub fn elm_code(&self) -> u8 {
        match self {
            BusProtocol::Iso9141 => 3,
            BusProtocol::Kwp2000Fast => 5,
            BusProtocol::Can11Bit500k => 6,
        }
    }

    pub fn is_can(&self) -> bool {
        matches!(self, BusProtocol::Can11Bit500k)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BusProtocol::Iso9141 => "ISO 9141-2",
            BusProtocol::Kwp2000Fast => "ISO 14230-4 (KWP2000 fast init)",
            BusProtocol::Can11Bit500k => "ISO 15765-4 (CAN 11/500)",
        }
    }
}

/// Engine control unit families fitted to the Niva
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcuType {
    /// Bosch MP7.0H, 2002-2005
    BoschMp70,
    /// January 7.2, 2002-2008
    January72,
    /// Bosch M7.9.7, 2006-2020
    BoschM797,
    /// Bosch ME17.9.7, Niva Travel, CAN
    BoschMe1797,
}

impl EcuType {
    pub const ALL: [EcuType; 4] = [
        EcuType::BoschMp70,
        EcuType::January72,
        EcuType::BoschM797,
        EcuType::BoschMe1797,
    ];

    pub fn protocol(&self) -> BusProtocol {
        match self {
            EcuType::BoschMp70 => BusProtocol::Iso9141,
            EcuType::January72 | EcuType::BoschM797 => BusProtocol::Kwp2000Fast,
            EcuType::BoschMe1797 => BusProtocol::Can11Bit500k,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EcuType::BoschMp70 => "Bosch MP7.0",
            EcuType::January72 => "January 7.2",
            EcuType::BoschM797 => "Bosch M7.9.7",
            EcuType::BoschMe1797 => "Bosch ME17.9.7",
        }
    }
}

impl fmt::Display for EcuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// EQUIPMENT
// ============================================================================

/// Optional equipment that decides which ECUs and procedures exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    Abs,
    Airbag,
    Immobilizer,
}

/// Equipment present on a particular vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Equipment {
    pub abs: bool,
    pub airbag: bool,
    pub immobilizer: bool,
}

impl Equipment {
    /// Every optional system fitted
    pub fn full() -> Self {
        Self {
            abs: true,
            airbag: true,
            immobilizer: true,
        }
    }

    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Abs => self.abs,
            Feature::Airbag => self.airbag,
            Feature::Immobilizer => self.immobilizer,
        }
    }

    fn allows(&self, required: Option<Feature>) -> bool {
        required.map(|f| self.has(f)).unwrap_or(true)
    }
}

// ============================================================================
// ECU ADDRESSING
// ============================================================================

/// Logical address of one ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcuAddress {
    /// K-line header bytes: format, target, source
    KLine { format: u8, target: u8, source: u8 },
    /// CAN request and response identifiers
    Can { request: u16, response: u16 },
}

impl EcuAddress {
    /// Physical KWP2000 address from the tester
    pub const fn kwp(target: u8) -> Self {
        EcuAddress::KLine {
            format: addresses::KWP_PHYSICAL_FORMAT,
            target,
            source: addresses::TESTER,
        }
    }

    /// ISO 9141-2 functional OBD header
    pub fn iso9141_functional() -> Self {
        let [format, target, source] = addresses::ISO9141_FUNCTIONAL;
        EcuAddress::KLine {
            format,
            target,
            source,
        }
    }

    /// Value for `ATSH`
    pub fn header(&self) -> String {
        match self {
            EcuAddress::KLine {
                format,
                target,
                source,
            } => format!("{:02X}{:02X}{:02X}", format, target, source),
            EcuAddress::Can { request, .. } => format!("{:03X}", request),
        }
    }

    /// Value for `ATCRA`, CAN only
    pub fn receive_filter(&self) -> Option<String> {
        match self {
            EcuAddress::KLine { .. } => None,
            EcuAddress::Can { response, .. } => Some(format!("{:03X}", response)),
        }
    }
}

impl fmt::Display for EcuAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcuAddress::KLine { target, .. } => write!(f, "0x{:02X}", target),
            EcuAddress::Can { request, response } => write!(f, "{:03X}/{:03X}", request, response),
        }
    }
}

/// How DTCs are read from an ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtcReadMethod {
    /// OBD-II modes 03 and 07, plus 0A on CAN
    Obd2,
    /// KWP2000 readDiagnosticTroubleCodesByStatus (0x18)
    Kwp2000ByStatus,
    /// UDS readDTCInformation reportDTCByStatusMask (0x19 0x02)
    UdsByStatusMask,
}

impl DtcReadMethod {
    /// Service and payload that clear codes read this way
    pub fn clear_request(&self) -> (u8, Vec<u8>) {
        match self {
            DtcReadMethod::Obd2 => (crate::constants::obd::CLEAR_DTCS, Vec::new()),
            DtcReadMethod::Kwp2000ByStatus => (kwp::CLEAR_DIAGNOSTIC_INFO, vec![0xFF, 0x00]),
            DtcReadMethod::UdsByStatusMask => (uds::CLEAR_DIAGNOSTIC_INFO, vec![0xFF, 0xFF, 0xFF]),
        }
    }
}

/// One ECU on the vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcuDefinition {
    pub id: String,
    pub name: String,
    pub address: EcuAddress,
    /// Request whose positive answer proves the ECU is alive
    pub presence_check: String,
    pub dtc_method: DtcReadMethod,
    pub requires: Option<Feature>,
}

// ============================================================================
// INIT SEQUENCE
// ============================================================================

/// One adapter setup command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitStep {
    pub command: String,
    pub wait_ms: u64,
}

impl InitStep {
    fn new(command: impl Into<String>, wait: Duration) -> Self {
        Self {
            command: command.into(),
            wait_ms: wait.as_millis() as u64,
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

fn init_sequence(protocol: BusProtocol) -> Vec<InitStep> {
    let headers = if protocol.is_can() {
        elm::HEADERS_ON
    } else {
        elm::HEADERS_OFF
    };
    // ATST counts in 4 ms units
    let response_timeout = if protocol.is_can() { 0x32 } else { 0x64 };

    vec![
        InitStep::new(elm::RESET, timing::RESET_TIMEOUT),
        InitStep::new(elm::ECHO_OFF, timing::SETUP_TIMEOUT),
        InitStep::new(elm::LINEFEEDS_OFF, timing::SETUP_TIMEOUT),
        InitStep::new(elm::SPACES_ON, timing::SETUP_TIMEOUT),
        InitStep::new(headers, timing::SETUP_TIMEOUT),
        InitStep::new(elm::ADAPTIVE_TIMING, timing::SETUP_TIMEOUT),
        InitStep::new(
            format!("{}{:02X}", elm::SET_TIMEOUT, response_timeout),
            timing::SETUP_TIMEOUT,
        ),
        InitStep::new(
            format!("{}{}", elm::SET_PROTOCOL, protocol.elm_code()),
            timing::SETUP_TIMEOUT,
        ),
    ]
}

// ============================================================================
// PROCEDURES
// ============================================================================

/// One service request of a procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub service: u8,
    pub data: Vec<u8>,
}

impl ProcedureStep {
    pub fn new(service: u8, data: &[u8]) -> Self {
        Self {
            service,
            data: data.to_vec(),
        }
    }
}

/// Adaptation or reset procedure run against one ECU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    pub name: String,
    pub ecu_id: String,
    pub steps: Vec<ProcedureStep>,
    pub requires: Option<Feature>,
}

fn procedure(id: &str, name: &str, ecu_id: &str, steps: Vec<ProcedureStep>, requires: Option<Feature>) -> Procedure {
    Procedure {
        id: id.to_string(),
        name: name.to_string(),
        ecu_id: ecu_id.to_string(),
        steps,
        requires,
    }
}

fn session_step(protocol: BusProtocol) -> ProcedureStep {
    if protocol.is_can() {
        // UDS extended session
        ProcedureStep::new(kwp::START_DIAGNOSTIC_SESSION, &[0x03])
    } else {
        ProcedureStep::new(kwp::START_DIAGNOSTIC_SESSION, &[0x81])
    }
}

fn routine_step(protocol: BusProtocol, routine: u8) -> ProcedureStep {
    if protocol.is_can() {
        // startRoutine, routine id 0xF0xx
        ProcedureStep::new(kwp::START_ROUTINE, &[0x01, 0xF0, routine])
    } else {
        // startRoutineByLocalIdentifier
        ProcedureStep::new(kwp::START_ROUTINE, &[routine])
    }
}

fn adaptation_catalog(protocol: BusProtocol) -> Vec<Procedure> {
    let run = |routine| vec![session_step(protocol), routine_step(protocol, routine)];
    vec![
        procedure("idle_air_control_reset", "Idle air control reset", "engine", run(0x01), None),
        procedure("throttle_position_learn", "Throttle position learn", "engine", run(0x02), None),
        procedure("fuel_trim_reset", "Fuel trim adaptation reset", "engine", run(0x03), None),
        procedure(
            "immobilizer_learn",
            "Immobilizer key learn",
            "immobilizer",
            run(0x10),
            Some(Feature::Immobilizer),
        ),
        procedure(
            "abs_sensor_calibration",
            "ABS wheel speed sensor calibration",
            "abs",
            run(0x20),
            Some(Feature::Abs),
        ),
    ]
}

fn reset_catalog(protocol: BusProtocol) -> Vec<Procedure> {
    vec![
        procedure(
            "ecu_reset",
            "Engine ECU hard reset",
            "engine",
            vec![ProcedureStep::new(kwp::ECU_RESET, &[0x01])],
            None,
        ),
        procedure(
            "learned_values_reset",
            "Reset learned values",
            "engine",
            vec![
                session_step(protocol),
                ProcedureStep::new(kwp::WRITE_DATA_BY_LOCAL_ID, &[0xA0, 0x00]),
            ],
            None,
        ),
        procedure(
            "abs_reset",
            "ABS module reset",
            "abs",
            vec![ProcedureStep::new(kwp::ECU_RESET, &[0x01])],
            Some(Feature::Abs),
        ),
        procedure(
            "airbag_crash_reset",
            "Airbag crash data reset",
            "airbag",
            vec![
                session_step(protocol),
                routine_step(protocol, 0x30),
            ],
            Some(Feature::Airbag),
        ),
    ]
}

// ============================================================================
// ECU TABLES
// ============================================================================

fn ecu(
    id: &str,
    name: &str,
    address: EcuAddress,
    presence_check: &str,
    dtc_method: DtcReadMethod,
    requires: Option<Feature>,
) -> EcuDefinition {
    EcuDefinition {
        id: id.to_string(),
        name: name.to_string(),
        address,
        presence_check: presence_check.to_string(),
        dtc_method,
        requires,
    }
}

fn ecu_table(ecu_type: EcuType) -> Vec<EcuDefinition> {
    let protocol = ecu_type.protocol();
    if protocol.is_can() {
        let can = |request, response| EcuAddress::Can { request, response };
        return vec![
            ecu("engine", "Engine Control Unit", can(0x7E0, 0x7E8), "0100", DtcReadMethod::Obd2, None),
            ecu("abs", "ABS Control Unit", can(0x7B0, 0x7B8), "3E00", DtcReadMethod::UdsByStatusMask, Some(Feature::Abs)),
            ecu("airbag", "Airbag Control Unit", can(0x772, 0x77A), "3E00", DtcReadMethod::UdsByStatusMask, Some(Feature::Airbag)),
            ecu("immobilizer", "Immobilizer", can(0x7C0, 0x7C8), "3E00", DtcReadMethod::UdsByStatusMask, Some(Feature::Immobilizer)),
        ];
    }

    let engine_address = match protocol {
        BusProtocol::Iso9141 => EcuAddress::iso9141_functional(),
        _ => EcuAddress::kwp(0x10),
    };
    vec![
        ecu("engine", "Engine Control Unit", engine_address, "0100", DtcReadMethod::Obd2, None),
        ecu("abs", "ABS Control Unit", EcuAddress::kwp(0x28), "3E01", DtcReadMethod::Kwp2000ByStatus, Some(Feature::Abs)),
        ecu("airbag", "Airbag Control Unit", EcuAddress::kwp(0x58), "3E01", DtcReadMethod::Kwp2000ByStatus, Some(Feature::Airbag)),
        ecu("immobilizer", "Immobilizer", EcuAddress::kwp(0x2A), "3E01", DtcReadMethod::Kwp2000ByStatus, Some(Feature::Immobilizer)),
    ]
}

fn engine_pids(ecu_type: EcuType) -> Vec<Pid> {
    let base = [
        Pid::EngineRpm,
        Pid::VehicleSpeed,
        Pid::CoolantTemp,
        Pid::IntakeTemp,
        Pid::EngineLoad,
        Pid::ThrottlePosition,
        Pid::TimingAdvance,
        Pid::MafRate,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::O2Voltage,
    ];
    match ecu_type {
        EcuType::BoschMp70 | EcuType::January72 => base.to_vec(),
        EcuType::BoschM797 => {
            let mut pids = base.to_vec();
            pids.push(Pid::ControlModuleVoltage);
            pids
        }
        EcuType::BoschMe1797 => Pid::ALL.to_vec(),
    }
}

// ============================================================================
// CALIBRATION AND RANGES
// ============================================================================

/// Calibration constants for the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub idle_target_rpm: f64,
    pub idle_tolerance_rpm: f64,
    /// Static injector flow, cc/min at 3 bar
    pub injector_flow_cc_min: f64,
    pub displacement_l: f64,
}

fn calibration(ecu_type: EcuType) -> Calibration {
    let (idle_target_rpm, injector_flow_cc_min) = match ecu_type {
        EcuType::BoschMp70 => (850.0, 133.0),
        EcuType::January72 => (850.0, 142.0),
        EcuType::BoschM797 => (800.0, 142.0),
        EcuType::BoschMe1797 => (780.0, 150.0),
    };
    Calibration {
        idle_target_rpm,
        idle_tolerance_rpm: 50.0,
        injector_flow_cc_min,
        displacement_l: 1.69,
    }
}

/// Normal operating range of one parameter on a warm engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalRange {
    pub pid: Pid,
    pub min: f64,
    pub max: f64,
}

impl NormalRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn normal_range(pid: Pid) -> NormalRange {
    let (min, max) = match pid {
        Pid::EngineRpm => (0.0, 6000.0),
        Pid::CoolantTemp => (-40.0, 105.0),
        Pid::IntakeTemp => (-40.0, 60.0),
        Pid::AmbientTemp => (-45.0, 50.0),
        Pid::OilTemp => (-40.0, 130.0),
        Pid::ShortFuelTrim | Pid::LongFuelTrim => (-20.0, 20.0),
        Pid::FuelPressure => (250.0, 400.0),
        Pid::IntakePressure => (20.0, 105.0),
        Pid::VehicleSpeed => (0.0, 150.0),
        Pid::TimingAdvance => (-10.0, 45.0),
        Pid::MafRate => (0.0, 120.0),
        Pid::O2Voltage => (0.0, 1.1),
        Pid::ControlModuleVoltage => (11.0, 15.0),
        Pid::EngineLoad | Pid::ThrottlePosition | Pid::FuelLevel => (0.0, 100.0),
    };
    NormalRange { pid, min, max }
}

// ============================================================================
// DEFINITION SET
// ============================================================================

/// Everything needed to talk to one vehicle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDefinitionSet {
    pub ecu_type: EcuType,
    pub protocol: BusProtocol,
    pub init_sequence: Vec<InitStep>,
    pub ecus: Vec<EcuDefinition>,
    pub pids: Vec<Pid>,
    pub adaptations: Vec<Procedure>,
    pub resets: Vec<Procedure>,
    pub calibration: Calibration,
    pub normal_ranges: Vec<NormalRange>,
}

impl ProtocolDefinitionSet {
    /// Build the tables for `ecu_type`, keeping only the ECUs and
    /// procedures the equipment supports
    pub fn build(ecu_type: EcuType, equipment: &Equipment) -> Self {
        let protocol = ecu_type.protocol();
        let pids = engine_pids(ecu_type);
        let normal_ranges = pids.iter().map(|p| normal_range(*p)).collect();

        Self {
            ecu_type,
            protocol,
            init_sequence: init_sequence(protocol),
            ecus: ecu_table(ecu_type)
                .into_iter()
                .filter(|e| equipment.allows(e.requires))
                .collect(),
            pids,
            adaptations: adaptation_catalog(protocol)
                .into_iter()
                .filter(|p| equipment.allows(p.requires))
                .collect(),
            resets: reset_catalog(protocol)
                .into_iter()
                .filter(|p| equipment.allows(p.requires))
                .collect(),
            calibration: calibration(ecu_type),
            normal_ranges,
        }
    }

    pub fn ecu(&self, id: &str) -> Option<&EcuDefinition> {
        self.ecus.iter().find(|e| e.id == id)
    }

    pub fn engine(&self) -> Option<&EcuDefinition> {
        self.ecus.iter().find(|e| e.dtc_method == DtcReadMethod::Obd2)
    }

    pub fn adaptation(&self, id: &str) -> Option<&Procedure> {
        self.adaptations.iter().find(|p| p.id == id)
    }

    pub fn reset(&self, id: &str) -> Option<&Procedure> {
        self.resets.iter().find(|p| p.id == id)
    }

    pub fn normal_range(&self, pid: Pid) -> Option<&NormalRange> {
        self.normal_ranges.iter().find(|r| r.pid == pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_per_ecu_type() {
        assert_eq!(EcuType::BoschMp70.protocol(), BusProtocol::Iso9141);
        assert_eq!(EcuType::January72.protocol(), BusProtocol::Kwp2000Fast);
        assert_eq!(EcuType::BoschM797.protocol(), BusProtocol::Kwp2000Fast);
        assert!(EcuType::BoschMe1797.protocol().is_can());
    }

    #[test]
    fn test_init_sequence_order() {
        let set = ProtocolDefinitionSet::build(EcuType::BoschM797, &Equipment::default());
        let commands: Vec<&str> = set.init_sequence.iter().map(|s| s.command.as_str()).collect();
        assert_eq!(
            commands,
            vec!["ATZ", "ATE0", "ATL0", "ATS1", "ATH0", "ATAT1", "ATST64", "ATSP5"]
        );
        assert_eq!(set.init_sequence[0].wait(), timing::RESET_TIMEOUT);
    }

    #[test]
    fn test_can_uses_headers_on() {
        let set = ProtocolDefinitionSet::build(EcuType::BoschMe1797, &Equipment::full());
        let commands: Vec<&str> = set.init_sequence.iter().map(|s| s.command.as_str()).collect();
        assert!(commands.contains(&"ATH1"));
        assert!(commands.contains(&"ATSP6"));
        assert!(set
            .ecus
            .iter()
            .all(|e| matches!(e.address, EcuAddress::Can { .. })));
    }

    #[test]
    fn test_kline_never_gets_can_addresses() {
        for ecu_type in [EcuType::BoschMp70, EcuType::January72, EcuType::BoschM797] {
            let set = ProtocolDefinitionSet::build(ecu_type, &Equipment::full());
            assert!(set
                .ecus
                .iter()
                .all(|e| matches!(e.address, EcuAddress::KLine { .. })));
        }
    }

    #[test]
    fn test_equipment_filters_tables() {
        let base = ProtocolDefinitionSet::build(
            EcuType::January72,
            &Equipment {
                abs: false,
                airbag: false,
                immobilizer: true,
            },
        );
        let ids: Vec<&str> = base.ecus.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["engine", "immobilizer"]);
        assert!(base.adaptation("abs_sensor_calibration").is_none());
        assert!(base.adaptation("immobilizer_learn").is_some());
        assert!(base.reset("abs_reset").is_none());

        let full = ProtocolDefinitionSet::build(EcuType::January72, &Equipment::full());
        assert_eq!(full.ecus.len(), 4);
        assert!(full.adaptation("abs_sensor_calibration").is_some());
    }

    #[test]
    fn test_addresses() {
        assert_eq!(EcuAddress::kwp(0x10).header(), "8110F1");
        assert_eq!(EcuAddress::iso9141_functional().header(), "686AF1");
        let can = EcuAddress::Can {
            request: 0x7E0,
            response: 0x7E8,
        };
        assert_eq!(can.header(), "7E0");
        assert_eq!(can.receive_filter().as_deref(), Some("7E8"));
        assert_eq!(EcuAddress::kwp(0x10).receive_filter(), None);
    }

    #[test]
    fn test_every_pid_has_range() {
        let set = ProtocolDefinitionSet::build(EcuType::BoschMe1797, &Equipment::full());
        assert_eq!(set.pids.len(), Pid::ALL.len());
        for pid in &set.pids {
            assert!(set.normal_range(*pid).is_some());
        }
        let volts = set.normal_range(Pid::ControlModuleVoltage).unwrap();
        assert!(volts.contains(13.4));
        assert!(!volts.contains(3.4));
    }

    #[test]
    fn test_procedures_target_existing_ecus() {
        for ecu_type in EcuType::ALL {
            let set = ProtocolDefinitionSet::build(ecu_type, &Equipment::full());
            for p in set.adaptations.iter().chain(set.resets.iter()) {
                assert!(set.ecu(&p.ecu_id).is_some(), "{} targets {}", p.id, p.ecu_id);
                assert!(!p.steps.is_empty());
            }
        }
    }

    #[test]
    fn test_engine_lookup() {
        let set = ProtocolDefinitionSet::build(EcuType::BoschMp70, &Equipment::default());
        assert_eq!(set.engine().map(|e| e.id.as_str()), Some("engine"));
        assert_eq!(set.pids.len(), 11);
    }
}
