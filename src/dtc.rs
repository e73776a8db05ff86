//! Diagnostic Trouble Codes
//!
//! DTC records as they appear in a diagnostic report, plus descriptions for
//! the codes Niva ECUs report most often.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where the code was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcStatus {
    /// Stored / confirmed (mode 03, KWP storage state present)
    Active,
    /// Detected this drive cycle but not yet confirmed (mode 07)
    Pending,
    /// Survives a clear until the monitor passes (mode 0A, CAN only)
    Permanent,
}

/// Freeze frame stored with the code that triggered it (mode 02)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeFrame {
    pub dtc: String,
    /// PID key -> decoded value
    pub values: BTreeMap<String, f64>,
}

/// Diagnostic Trouble Code (DTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dtc {
    pub code: String,
    pub status: DtcStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freeze_frame: Option<FreezeFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Dtc {
    pub fn new(code: impl Into<String>, status: DtcStatus, seen: DateTime<Utc>) -> Self {
        let code = code.into();
        let description = describe(&code).map(str::to_string);
        Self {
            code,
            status,
            first_seen: seen,
            last_seen: seen,
            occurrences: 1,
            freeze_frame: None,
            description,
        }
    }

    /// Fold a repeated sighting of the same code into this record.
    /// Active outranks Permanent, which outranks Pending.
    pub fn merge(&mut self, status: DtcStatus, seen: DateTime<Utc>) {
        self.occurrences += 1;
        if seen < self.first_seen {
            self.first_seen = seen;
        }
        if seen > self.last_seen {
            self.last_seen = seen;
        }
        if rank(status) > rank(self.status) {
            self.status = status;
        }
    }
}

fn rank(status: DtcStatus) -> u8 {
    match status {
        DtcStatus::Pending => 0,
        DtcStatus::Permanent => 1,
        DtcStatus::Active => 2,
    }
}

/// Add `code` to `list`, merging with an existing record of the same code
pub fn record(list: &mut Vec<Dtc>, code: &str, status: DtcStatus, seen: DateTime<Utc>) {
    match list.iter_mut().find(|d| d.code == code) {
        Some(existing) => existing.merge(status, seen),
        None => list.push(Dtc::new(code, status, seen)),
    }
}

/// Description for codes seen on Niva engine and body ECUs
pub fn describe(code: &str) -> Option<&'static str> {
    let text = match code {
        "P0030" => "O2 sensor 1 heater control circuit",
        "P0102" => "MAF sensor circuit low input",
        "P0103" => "MAF sensor circuit high input",
        "P0112" => "Intake air temperature sensor circuit low",
        "P0113" => "Intake air temperature sensor circuit high",
        "P0115" => "Coolant temperature sensor circuit malfunction",
        "P0117" => "Coolant temperature sensor circuit low",
        "P0118" => "Coolant temperature sensor circuit high",
        "P0122" => "Throttle position sensor circuit low",
        "P0123" => "Throttle position sensor circuit high",
        "P0130" => "O2 sensor 1 circuit malfunction",
        "P0131" => "O2 sensor 1 circuit low voltage",
        "P0132" => "O2 sensor 1 circuit high voltage",
        "P0133" => "O2 sensor 1 slow response",
        "P0134" => "O2 sensor 1 no activity detected",
        "P0135" => "O2 sensor 1 heater circuit malfunction",
        "P0136" => "O2 sensor 2 circuit malfunction",
        "P0171" => "System too lean",
        "P0172" => "System too rich",
        "P0201" => "Injector circuit cylinder 1",
        "P0202" => "Injector circuit cylinder 2",
        "P0203" => "Injector circuit cylinder 3",
        "P0204" => "Injector circuit cylinder 4",
        "P0300" => "Random/multiple cylinder misfire detected",
        "P0301" => "Cylinder 1 misfire detected",
        "P0302" => "Cylinder 2 misfire detected",
        "P0303" => "Cylinder 3 misfire detected",
        "P0304" => "Cylinder 4 misfire detected",
        "P0325" => "Knock sensor circuit malfunction",
        "P0327" => "Knock sensor circuit low",
        "P0328" => "Knock sensor circuit high",
        "P0335" => "Crankshaft position sensor circuit",
        "P0336" => "Crankshaft position sensor range/performance",
        "P0340" => "Camshaft position sensor circuit",
        "P0420" => "Catalyst efficiency below threshold",
        "P0443" => "Canister purge valve circuit",
        "P0480" => "Cooling fan relay circuit",
        "P0500" => "Vehicle speed sensor malfunction",
        "P0505" => "Idle air control system malfunction",
        "P0506" => "Idle speed lower than expected",
        "P0507" => "Idle speed higher than expected",
        "P0560" => "System voltage malfunction",
        "P0562" => "System voltage low",
        "P0563" => "System voltage high",
        "P0601" => "ECU memory checksum error",
        "P0603" => "ECU keep-alive memory error",
        "P0615" => "Starter relay circuit",
        "P1602" => "ECU power lost",
        "P1689" => "ECU fault memory error",
        "C0031" => "Front left wheel speed sensor",
        "C0034" => "Front right wheel speed sensor",
        "C0037" => "Rear left wheel speed sensor",
        "C0040" => "Rear right wheel speed sensor",
        "B0001" => "Driver frontal airbag deployment loop",
        "B0002" => "Passenger frontal airbag deployment loop",
        "U0100" => "Lost communication with engine ECU",
        "U0121" => "Lost communication with ABS module",
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_dtc_has_description() {
        let now = Utc::now();
        let dtc = Dtc::new("P0133", DtcStatus::Active, now);
        assert_eq!(dtc.occurrences, 1);
        assert_eq!(dtc.description.as_deref(), Some("O2 sensor 1 slow response"));
        assert!(Dtc::new("P1999", DtcStatus::Active, now).description.is_none());
    }

    #[test]
    fn test_record_merges_duplicates() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);
        let mut list = Vec::new();
        record(&mut list, "P0300", DtcStatus::Pending, t0);
        record(&mut list, "P0300", DtcStatus::Active, t1);
        record(&mut list, "P0133", DtcStatus::Active, t1);

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].status, DtcStatus::Active);
        assert_eq!(list[0].occurrences, 2);
        assert_eq!(list[0].first_seen, t0);
        assert_eq!(list[0].last_seen, t1);
    }

    #[test]
    fn test_pending_does_not_downgrade() {
        let now = Utc::now();
        let mut dtc = Dtc::new("P0420", DtcStatus::Active, now);
        dtc.merge(DtcStatus::Pending, now);
        assert_eq!(dtc.status, DtcStatus::Active);
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let dtc = Dtc::new("P1999", DtcStatus::Pending, Utc::now());
        let json = serde_json::to_value(&dtc).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("freeze_frame").is_none());
        assert!(json.get("description").is_none());
    }
}
