//! Vehicle adapter selection
//!
//! Maps a vehicle profile to the ECU type, equipment and protocol
//! definition set used for a session, and decodes what it can from a VIN.

use crate::definitions::{EcuType, Equipment, Procedure, ProtocolDefinitionSet};
use crate::engine::DiagnosticContext;
use crate::error::SelectionError;
use crate::validators;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// First model year with ABS and airbags fitted
const SAFETY_SYSTEMS_FROM: u16 = 2009;

/// First model year of the Bosch M7.9.7 on the pre-restyle car
const M797_FROM: u16 = 2006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum VehicleModel {
    ChevroletNiva,
    ChevroletNivaRestyle,
    NivaTravel,
}

impl VehicleModel {
    pub const ALL: [VehicleModel; 3] = [
        VehicleModel::ChevroletNiva,
        VehicleModel::ChevroletNivaRestyle,
        VehicleModel::NivaTravel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VehicleModel::ChevroletNiva => "Chevrolet Niva",
            VehicleModel::ChevroletNivaRestyle => "Chevrolet Niva Restyle",
            VehicleModel::NivaTravel => "Niva Travel",
        }
    }

    /// First and last model year
    pub fn production(&self) -> (u16, u16) {
        match self {
            VehicleModel::ChevroletNiva => (2002, 2008),
            VehicleModel::ChevroletNivaRestyle => (2009, 2020),
            VehicleModel::NivaTravel => (2020, 2030),
        }
    }

    pub fn compatible_ecus(&self) -> &'static [EcuType] {
        match self {
            VehicleModel::ChevroletNiva => &[EcuType::BoschMp70, EcuType::January72, EcuType::BoschM797],
            VehicleModel::ChevroletNivaRestyle => &[EcuType::BoschM797],
            VehicleModel::NivaTravel => &[EcuType::BoschMe1797],
        }
    }

    /// ECU fitted at the factory for `year`
    pub fn default_ecu(&self, year: u16) -> EcuType {
        match self {
            VehicleModel::ChevroletNiva if year < M797_FROM => EcuType::BoschMp70,
            VehicleModel::ChevroletNiva | VehicleModel::ChevroletNivaRestyle => EcuType::BoschM797,
            VehicleModel::NivaTravel => EcuType::BoschMe1797,
        }
    }
}

impl fmt::Display for VehicleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineType {
    /// VAZ-2123, 1.7 L, Euro 2/3
    Vaz2123,
    /// VAZ-21214, 1.7 L, Euro 4 and later
    Vaz21214,
}

impl EngineType {
    pub fn for_year(year: u16) -> Self {
        if year < SAFETY_SYSTEMS_FROM {
            EngineType::Vaz2123
        } else {
            EngineType::Vaz21214
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmissionsClass {
    Euro2,
    Euro3,
    Euro4,
    Euro5,
}

impl EmissionsClass {
    pub fn for_year(year: u16) -> Self {
        match year {
            ..=2005 => EmissionsClass::Euro2,
            2006..=2008 => EmissionsClass::Euro3,
            2009..=2015 => EmissionsClass::Euro4,
            _ => EmissionsClass::Euro5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transmission {
    Manual5,
}

/// Identifies one car for protocol parameterization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub model: VehicleModel,
    pub year: u16,
    #[serde(default)]
    pub vin: Option<String>,
    pub engine_type: EngineType,
    /// Defaulted from model and year when absent
    #[serde(default)]
    pub ecu_type: Option<EcuType>,
    #[serde(default)]
    pub transmission: Option<Transmission>,
    #[serde(default)]
    pub mileage_km: Option<u32>,
}

impl VehicleProfile {
    pub fn new(model: VehicleModel, year: u16) -> Self {
        Self {
            model,
            year,
            vin: None,
            engine_type: EngineType::for_year(year),
            ecu_type: None,
            transmission: Some(Transmission::Manual5),
            mileage_km: None,
        }
    }

    pub fn with_ecu(mut self, ecu_type: EcuType) -> Self {
        self.ecu_type = Some(ecu_type);
        self
    }

    pub fn emissions_class(&self) -> EmissionsClass {
        EmissionsClass::for_year(self.year)
    }

    pub fn has_abs(&self) -> bool {
        self.year >= SAFETY_SYSTEMS_FROM
    }

    pub fn has_airbag(&self) -> bool {
        self.year >= SAFETY_SYSTEMS_FROM
    }

    pub fn has_immobilizer(&self) -> bool {
        true
    }

    pub fn equipment(&self) -> Equipment {
        Equipment {
            abs: self.has_abs(),
            airbag: self.has_airbag(),
            immobilizer: self.has_immobilizer(),
        }
    }

    pub fn resolved_ecu(&self) -> EcuType {
        self.ecu_type.unwrap_or_else(|| self.model.default_ecu(self.year))
    }
}

/// Protocol parameters chosen for one vehicle
#[derive(Debug, Clone)]
pub struct VehicleAdapter {
    pub profile: VehicleProfile,
    pub ecu_type: EcuType,
    pub equipment: Equipment,
    pub definitions: Arc<ProtocolDefinitionSet>,
}

impl VehicleAdapter {
    pub fn adaptations(&self) -> &[Procedure] {
        &self.definitions.adaptations
    }

    pub fn resets(&self) -> &[Procedure] {
        &self.definitions.resets
    }

    /// Engine context for this vehicle
    pub fn context(&self) -> DiagnosticContext {
        DiagnosticContext::new(self.definitions.clone())
    }
}

/// Resolve the ECU type, check it against the model, derive equipment and
/// build the definition set
pub fn select_adapter(profile: &VehicleProfile) -> Result<VehicleAdapter, SelectionError> {
    let model = profile.model;
    let (first, last) = model.production();
    if profile.year < first || profile.year > last {
        return Err(SelectionError::YearOutOfRange {
            model: model.name().to_string(),
            year: profile.year,
            first,
            last,
        });
    }

    let ecu_type = profile.resolved_ecu();
    if !model.compatible_ecus().contains(&ecu_type) {
        return Err(SelectionError::IncompatibleEcu {
            model: model.name().to_string(),
            ecu: ecu_type.name().to_string(),
        });
    }

    let equipment = profile.equipment();
    log::info!(
        "Selected {} ({}) for {} {}, {:?}",
        ecu_type,
        ecu_type.protocol().name(),
        model,
        profile.year,
        equipment
    );

    Ok(VehicleAdapter {
        profile: profile.clone(),
        ecu_type,
        equipment,
        definitions: Arc::new(ProtocolDefinitionSet::build(ecu_type, &equipment)),
    })
}

// ============================================================================
// VIN DETECTION
// ============================================================================

/// What a VIN says about the car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VinDetection {
    Detected {
        model: VehicleModel,
        year: u16,
        engine_code: char,
    },
    Unknown,
}

impl VinDetection {
    /// Profile with defaults for everything the VIN does not encode
    pub fn profile(&self, vin: &str) -> Option<VehicleProfile> {
        match self {
            VinDetection::Detected { model, year, .. } => {
                let mut profile = VehicleProfile::new(*model, *year);
                profile.vin = Some(vin.trim().to_ascii_uppercase());
                Some(profile)
            }
            VinDetection::Unknown => None,
        }
    }
}

/// ISO 3779 model year for position 10, in the 2000-2029 cycle
fn model_year(code: char) -> Option<u16> {
    const LETTERS: &str = "ABCDEFGHJKLMNPRSTVWX";
    match code {
        'Y' => Some(2000),
        '1'..='9' => Some(2000 + code.to_digit(10)? as u16),
        _ => LETTERS.find(code).map(|i| 2010 + i as u16),
    }
}

/// Best-effort detection; anything malformed or unrecognized is `Unknown`
pub fn detect_from_vin(vin: &str) -> VinDetection {
    let vin = match validators::validate_vin(vin) {
        Ok(vin) => vin,
        Err(e) => {
            log::debug!("VIN rejected: {}", e);
            return VinDetection::Unknown;
        }
    };

    let wmi = &vin[0..3];
    let model_code = &vin[3..7];
    let chars: Vec<char> = vin.chars().collect();
    let engine_code = chars[7];

    if model_code != "2123" {
        return VinDetection::Unknown;
    }
    let Some(year) = model_year(chars[9]) else {
        return VinDetection::Unknown;
    };

    let model = match wmi {
        "X9L" if year <= 2008 => VehicleModel::ChevroletNiva,
        "X9L" => VehicleModel::ChevroletNivaRestyle,
        "XTA" if year >= 2020 => VehicleModel::NivaTravel,
        _ => return VinDetection::Unknown,
    };

    let (first, last) = model.production();
    if year < first || year > last {
        return VinDetection::Unknown;
    }

    VinDetection::Detected {
        model,
        year,
        engine_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::BusProtocol;

    #[test]
    fn test_default_ecu_by_year() {
        assert_eq!(VehicleModel::ChevroletNiva.default_ecu(2004), EcuType::BoschMp70);
        assert_eq!(VehicleModel::ChevroletNiva.default_ecu(2007), EcuType::BoschM797);
        assert_eq!(VehicleModel::ChevroletNivaRestyle.default_ecu(2012), EcuType::BoschM797);
        assert_eq!(VehicleModel::NivaTravel.default_ecu(2021), EcuType::BoschMe1797);
    }

    #[test]
    fn test_derived_facts() {
        let early = VehicleProfile::new(VehicleModel::ChevroletNiva, 2004);
        assert_eq!(early.emissions_class(), EmissionsClass::Euro2);
        assert!(!early.has_abs());
        assert!(!early.has_airbag());
        assert!(early.has_immobilizer());
        assert_eq!(early.engine_type, EngineType::Vaz2123);

        let restyle = VehicleProfile::new(VehicleModel::ChevroletNivaRestyle, 2012);
        assert_eq!(restyle.emissions_class(), EmissionsClass::Euro4);
        assert_eq!(restyle.equipment(), Equipment::full());
        assert_eq!(restyle.engine_type, EngineType::Vaz21214);

        assert_eq!(EmissionsClass::for_year(2007), EmissionsClass::Euro3);
        assert_eq!(EmissionsClass::for_year(2018), EmissionsClass::Euro5);
    }

    #[test]
    fn test_select_filters_equipment() {
        let adapter = select_adapter(&VehicleProfile::new(VehicleModel::ChevroletNiva, 2004)).unwrap();
        assert_eq!(adapter.ecu_type, EcuType::BoschMp70);
        assert_eq!(adapter.definitions.protocol, BusProtocol::Iso9141);
        assert!(adapter.definitions.ecu("abs").is_none());
        assert!(adapter.definitions.ecu("airbag").is_none());
        assert!(adapter.definitions.ecu("immobilizer").is_some());
        assert!(adapter.adaptations().iter().all(|p| p.id != "abs_sensor_calibration"));
    }

    #[test]
    fn test_select_restyle_full_equipment() {
        let adapter = select_adapter(&VehicleProfile::new(VehicleModel::ChevroletNivaRestyle, 2012)).unwrap();
        assert_eq!(adapter.ecu_type, EcuType::BoschM797);
        assert_eq!(adapter.definitions.ecus.len(), 4);
        assert!(adapter.resets().iter().any(|p| p.id == "abs_reset"));
    }

    #[test]
    fn test_travel_gets_can_tables() {
        let adapter = select_adapter(&VehicleProfile::new(VehicleModel::NivaTravel, 2021)).unwrap();
        assert!(adapter.definitions.protocol.is_can());
        assert!(adapter.definitions.init_sequence.iter().any(|s| s.command == "ATSP6"));
    }

    #[test]
    fn test_incompatible_pairing() {
        let profile = VehicleProfile::new(VehicleModel::NivaTravel, 2021).with_ecu(EcuType::BoschMp70);
        assert!(matches!(
            select_adapter(&profile),
            Err(SelectionError::IncompatibleEcu { .. })
        ));

        let profile = VehicleProfile::new(VehicleModel::ChevroletNivaRestyle, 2012).with_ecu(EcuType::BoschMe1797);
        assert!(select_adapter(&profile).is_err());
    }

    #[test]
    fn test_year_out_of_range() {
        let profile = VehicleProfile::new(VehicleModel::ChevroletNiva, 2015);
        assert_eq!(
            select_adapter(&profile).unwrap_err(),
            SelectionError::YearOutOfRange {
                model: "Chevrolet Niva".to_string(),
                year: 2015,
                first: 2002,
                last: 2008,
            }
        );
    }

    #[test]
    fn test_model_year_codes() {
        assert_eq!(model_year('Y'), Some(2000));
        assert_eq!(model_year('2'), Some(2002));
        assert_eq!(model_year('9'), Some(2009));
        assert_eq!(model_year('A'), Some(2010));
        assert_eq!(model_year('H'), Some(2017));
        assert_eq!(model_year('J'), Some(2018));
        assert_eq!(model_year('L'), Some(2020));
        assert_eq!(model_year('P'), Some(2023));
        assert_eq!(model_year('U'), None);
        assert_eq!(model_year('Z'), None);
        assert_eq!(model_year('0'), None);
    }

    #[test]
    fn test_detect_restyle() {
        let detection = detect_from_vin("X9L212300C0123456");
        assert_eq!(
            detection,
            VinDetection::Detected {
                model: VehicleModel::ChevroletNivaRestyle,
                year: 2012,
                engine_code: '0',
            }
        );
        let profile = detection.profile("x9l212300c0123456").unwrap();
        assert_eq!(profile.vin.as_deref(), Some("X9L212300C0123456"));
        assert!(select_adapter(&profile).is_ok());
    }

    #[test]
    fn test_detect_early_and_travel() {
        assert!(matches!(
            detect_from_vin("X9L21230050123456"),
            VinDetection::Detected {
                model: VehicleModel::ChevroletNiva,
                year: 2005,
                ..
            }
        ));
        assert!(matches!(
            detect_from_vin("XTA212300M0123456"),
            VinDetection::Detected {
                model: VehicleModel::NivaTravel,
                year: 2021,
                ..
            }
        ));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect_from_vin(""), VinDetection::Unknown);
        assert_eq!(detect_from_vin("X9L2123"), VinDetection::Unknown);
        // Wrong model code
        assert_eq!(detect_from_vin("X9L211000C0123456"), VinDetection::Unknown);
        // Foreign manufacturer
        assert_eq!(detect_from_vin("WBA212300C0123456"), VinDetection::Unknown);
        // Invalid year code
        assert_eq!(detect_from_vin("X9L212300U0123456"), VinDetection::Unknown);
        // Chevrolet badge after production ended
        assert_eq!(detect_from_vin("X9L212300T0123456"), VinDetection::Unknown);
        assert!(VinDetection::Unknown.profile("X9L2123").is_none());
    }
}
