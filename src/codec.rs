//! Command Codec
//!
//! Pure functions that build ELM327 requests and decode adapter replies.
//! Nothing here touches I/O; malformed input yields `None`, an empty list
//! or the `"0000"` DTC sentinel instead of an error.

use crate::can;
use crate::constants::{elm, kwp, obd, uds};
use crate::definitions::EcuAddress;
use crate::dtc::DtcStatus;
use crate::pid::Pid;
use serde::{Deserialize, Serialize};

/// Sentinel returned by [`bytes_to_dtc`] for malformed input
pub const NO_DTC: &str = "0000";

/// A request ready to be written to the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Value for `ATSH`, `None` to keep whatever header is set
    pub header: Option<String>,
    /// Value for `ATCRA` on CAN targets
    pub receive_filter: Option<String>,
    /// Hex command without terminator, e.g. `010C`
    pub command: String,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            header: None,
            receive_filter: None,
            command: command.into(),
        }
    }
}

/// Classification of a cleaned adapter reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    /// Hex payload or free text such as the reset banner
    Data,
    /// Bare `OK` after an AT command
    Ok,
    /// `NO DATA`, `UNABLE TO CONNECT` and similar
    NoData,
    /// ECU negative response (`7F sid nrc`)
    Negative(u8),
    /// `?`, `ERROR`, bus errors
    AdapterError,
}

/// Decoded payload bytes of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payloads {
    /// Reply came from a CAN bus with headers on
    pub can: bool,
    /// One entry per ECU message (CAN) or the whole byte stream (K-line)
    pub messages: Vec<Vec<u8>>,
}

// ============================================================================
// REQUEST BUILDING
// ============================================================================

/// Build an OBD-II request for `mode` and optional `pid`, addressed to
/// `ecu` when given. Mode 02 requests ask for freeze frame 0.
pub fn build_command(mode: u8, pid: Option<u8>, ecu: Option<&EcuAddress>) -> Request {
    let mut command = format!("{:02X}", mode);
    if let Some(pid) = pid {
        command.push_str(&format!("{:02X}", pid));
        if mode == obd::FREEZE_FRAME {
            command.push_str("00");
        }
    }
    Request {
        header: ecu.map(EcuAddress::header),
        receive_filter: ecu.and_then(EcuAddress::receive_filter),
        command,
    }
}

/// Build a KWP2000 or UDS service request
pub fn build_service_request(service: u8, data: &[u8], ecu: Option<&EcuAddress>) -> Request {
    let mut command = format!("{:02X}", service);
    for byte in data {
        command.push_str(&format!("{:02X}", byte));
    }
    Request {
        header: ecu.map(EcuAddress::header),
        receive_filter: ecu.and_then(EcuAddress::receive_filter),
        command,
    }
}

// ============================================================================
// RESPONSE CLEANING
// ============================================================================

/// Strip echo, prompt and adapter progress noise, collapse whitespace
pub fn clean_response(raw: &str, command: &str) -> String {
    let mut text = raw.replace(elm::PROMPT as char, " ");
    for noise in elm::NOISE {
        text = text.replace(noise, " ");
    }

    let mut tokens: Vec<&str> = text.split_whitespace().collect();

    // Echo is the command text on its own line, possibly spaced
    let command_compact: String = command.split_whitespace().collect();
    if !command_compact.is_empty() {
        let mut joined = String::new();
        let mut echo_end = None;
        for (i, token) in tokens.iter().enumerate() {
            joined.push_str(token);
            if joined.len() >= command_compact.len() {
                if joined.eq_ignore_ascii_case(&command_compact) {
                    echo_end = Some(i);
                }
                break;
            }
        }
        if let Some(end) = echo_end {
            tokens.drain(..=end);
        }
    }

    tokens.join(" ")
}

fn bytes_from_tokens(tokens: &[&str]) -> Option<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in tokens {
        if token.is_empty() || token.len() % 2 != 0 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        for i in (0..token.len()).step_by(2) {
            bytes.push(u8::from_str_radix(&token[i..i + 2], 16).ok()?);
        }
    }
    Some(bytes)
}

/// Decode a cleaned reply into payload bytes. Header-on CAN replies are
/// reassembled per ECU; anything else must be pure hex, spaced or not.
pub fn decode_payloads(cleaned: &str) -> Option<Payloads> {
    let tokens: Vec<&str> = cleaned.split_whitespace().collect();
    let first = tokens.first()?;

    if can::is_header_token(first) {
        let messages: Vec<Vec<u8>> = can::messages_from_tokens(&tokens)?
            .into_iter()
            .map(|m| m.payload)
            .collect();
        return Some(Payloads { can: true, messages });
    }

    let bytes = bytes_from_tokens(&tokens)?;
    Some(Payloads {
        can: false,
        messages: vec![bytes],
    })
}

/// Classify a cleaned reply
pub fn classify_response(cleaned: &str) -> ResponseKind {
    let upper = cleaned.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return ResponseKind::NoData;
    }
    if upper == "OK" {
        return ResponseKind::Ok;
    }
    if elm::NO_DATA_REPLIES.iter().any(|r| upper.contains(r)) {
        return ResponseKind::NoData;
    }
    if upper.split_whitespace().any(|t| t == "?")
        || elm::ERROR_REPLIES.iter().filter(|r| **r != "?").any(|r| upper.contains(r))
    {
        return ResponseKind::AdapterError;
    }

    if let Some(payloads) = decode_payloads(&upper) {
        let negatives: Vec<u8> = payloads
            .messages
            .iter()
            .filter(|m| m.len() >= 3 && m[0] == kwp::NEGATIVE_RESPONSE)
            .map(|m| m[2])
            .collect();
        if !negatives.is_empty() && negatives.len() == payloads.messages.len() {
            return ResponseKind::Negative(negatives[0]);
        }
    }

    ResponseKind::Data
}

/// True when any message in the reply is the positive response to `sid`
pub fn is_positive_response(cleaned: &str, sid: u8) -> bool {
    if classify_response(cleaned) != ResponseKind::Data {
        return false;
    }
    let expected = sid.wrapping_add(kwp::POSITIVE_RESPONSE_OFFSET);
    decode_payloads(cleaned)
        .map(|p| p.messages.iter().any(|m| m.first() == Some(&expected)))
        .unwrap_or(false)
}

// ============================================================================
// PID DECODING
// ============================================================================

fn split_pid_code(pid_code: &str) -> Option<(u8, u8)> {
    let code = pid_code.trim();
    if code.len() != 4 || !code.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mode = u8::from_str_radix(&code[..2], 16).ok()?;
    let pid = u8::from_str_radix(&code[2..], 16).ok()?;
    Some((mode, pid))
}

fn decode_after_marker(payload: &[u8], mode: u8, pid: u8) -> Option<f64> {
    let marker = [mode.wrapping_add(obd::POSITIVE_RESPONSE_OFFSET), pid];
    let start = payload.windows(2).position(|w| w == marker)? + 2;
    let skip = if mode == obd::FREEZE_FRAME { 1 } else { 0 };
    let data = payload.get(start + skip..)?;

    match Pid::from_code(pid) {
        Some(known) => known.decode(data),
        None => {
            if data.is_empty() || data.len() > 4 {
                return None;
            }
            let raw = data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
            Some(raw as f64)
        }
    }
}

/// Decode the value of `pid_code` (`"010C"`, `"020C"`) from a raw or
/// cleaned reply.
///
/// Returns `None` for empty, error-tagged, non-hex or too-short input.
/// Unknown PIDs decode to the raw big-endian integer of 1-4 payload bytes.
pub fn parse_response(raw: &str, pid_code: &str) -> Option<f64> {
    let (mode, pid) = split_pid_code(pid_code)?;
    let cleaned = clean_response(raw, pid_code);
    if classify_response(&cleaned) != ResponseKind::Data {
        return None;
    }
    let payloads = decode_payloads(&cleaned)?;
    payloads
        .messages
        .iter()
        .find_map(|m| decode_after_marker(m, mode, pid))
}

// ============================================================================
// DTC DECODING
// ============================================================================

const DTC_LETTERS: [char; 4] = ['P', 'C', 'B', 'U'];

/// SAE J2012 rendering of a raw 16-bit DTC word. `0x0000` is padding.
pub fn dtc_from_word(word: u16) -> Option<String> {
    if word == 0 {
        return None;
    }
    let letter = DTC_LETTERS[(word >> 14) as usize];
    Some(format!("{}{:04X}", letter, word & 0x3FFF))
}

/// Convert four hex characters to a DTC code, `"0000"` when malformed.
///
/// The category letter comes from the top two bits. Words whose top two
/// bits are clear carry the category in bits 13-12 instead, the layout the
/// Niva K-line ECUs store in their string tables. This departs from strict
/// SAE J2012 decoding for `1xxx`-`3xxx` words: `"2000"` gives `B2000` where
/// the top two bits alone would give `P2000`. The ECU reply parsers use the
/// strict rule.
pub fn bytes_to_dtc(hex: &str) -> String {
    let hex = hex.trim();
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return NO_DTC.to_string();
    }
    let Ok(word) = u16::from_str_radix(hex, 16) else {
        return NO_DTC.to_string();
    };

    let top = (word >> 14) as usize;
    let category = if top != 0 { top } else { ((word >> 12) & 0x03) as usize };
    format!("{}{:04X}", DTC_LETTERS[category], word & 0x3FFF)
}

fn push_unique(out: &mut Vec<(String, DtcStatus)>, code: String, status: DtcStatus) {
    if !out.iter().any(|(c, _)| *c == code) {
        out.push((code, status));
    }
}

/// Parse a mode 03, 07 or 0A reply into DTC codes.
///
/// K-line replies are a stream of `4x hi lo hi lo hi lo` frames; CAN
/// replies carry a count byte after the service id.
pub fn parse_obd_dtcs(cleaned: &str, mode: u8) -> Vec<String> {
    let sid = mode.wrapping_add(obd::POSITIVE_RESPONSE_OFFSET);
    let Some(payloads) = decode_payloads(cleaned) else {
        return Vec::new();
    };

    let mut codes: Vec<String> = Vec::new();
    let mut push = |word: u16| {
        if let Some(code) = dtc_from_word(word) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    };

    for message in &payloads.messages {
        if payloads.can {
            if message.len() < 2 || message[0] != sid {
                continue;
            }
            let count = message[1] as usize;
            for pair in message[2..].chunks_exact(2).take(count) {
                push(u16::from_be_bytes([pair[0], pair[1]]));
            }
        } else {
            let mut i = 0;
            while i < message.len() {
                if message[i] != sid {
                    i += 1;
                    continue;
                }
                let frame_end = (i + 7).min(message.len());
                for pair in message[i + 1..frame_end].chunks_exact(2) {
                    push(u16::from_be_bytes([pair[0], pair[1]]));
                }
                i = frame_end;
            }
        }
    }

    codes
}

/// Parse a KWP2000 readDiagnosticTroubleCodesByStatus (0x58) reply
pub fn parse_kwp_dtcs(cleaned: &str) -> Vec<(String, DtcStatus)> {
    let sid = kwp::READ_DTC_BY_STATUS + kwp::POSITIVE_RESPONSE_OFFSET;
    let mut out = Vec::new();
    let Some(payloads) = decode_payloads(cleaned) else {
        return out;
    };

    for message in &payloads.messages {
        let Some(start) = message.iter().position(|b| *b == sid) else {
            continue;
        };
        let Some(&count) = message.get(start + 1) else {
            continue;
        };
        for entry in message[start + 2..].chunks_exact(3).take(count as usize) {
            let word = u16::from_be_bytes([entry[0], entry[1]]);
            // Bits 6-5: DTC storage state
            let status = match (entry[2] >> 5) & 0x03 {
                0 => continue,
                2 => DtcStatus::Pending,
                _ => DtcStatus::Active,
            };
            if let Some(code) = dtc_from_word(word) {
                push_unique(&mut out, code, status);
            }
        }
    }

    out
}

/// Parse a UDS readDTCInformation reportDTCByStatusMask (0x59 0x02) reply
pub fn parse_uds_dtcs(cleaned: &str) -> Vec<(String, DtcStatus)> {
    let sid = uds::READ_DTC_INFO + kwp::POSITIVE_RESPONSE_OFFSET;
    let mut out = Vec::new();
    let Some(payloads) = decode_payloads(cleaned) else {
        return out;
    };

    for message in &payloads.messages {
        if message.len() < 3
            || message[0] != sid
            || message[1] != uds::dtc::REPORT_BY_STATUS_MASK
        {
            continue;
        }
        // message[2] is the availability mask
        for record in message[3..].chunks_exact(4) {
            let word = u16::from_be_bytes([record[0], record[1]]);
            let status_byte = record[3];
            let status = if status_byte & 0x09 != 0 {
                DtcStatus::Active
            } else if status_byte & 0x04 != 0 {
                DtcStatus::Pending
            } else {
                continue;
            };
            if let Some(code) = dtc_from_word(word) {
                push_unique(&mut out, code, status);
            }
        }
    }

    out
}

/// DTC that triggered the stored freeze frame (mode 02 PID 02)
pub fn parse_freeze_frame_dtc(cleaned: &str) -> Option<String> {
    let marker = [
        obd::FREEZE_FRAME + obd::POSITIVE_RESPONSE_OFFSET,
        obd::PID_FREEZE_DTC,
    ];
    let payloads = decode_payloads(cleaned)?;
    payloads.messages.iter().find_map(|m| {
        let start = m.windows(2).position(|w| w == marker)? + 3;
        let bytes = m.get(start..start + 2)?;
        dtc_from_word(u16::from_be_bytes([bytes[0], bytes[1]]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rpm() {
        assert_eq!(parse_response("41 0C 1A F8", "010C"), Some(1726.0));
    }

    #[test]
    fn test_parse_coolant() {
        assert_eq!(parse_response("41 05 7B", "0105"), Some(83.0));
    }

    #[test]
    fn test_parse_throttle() {
        let value = parse_response("41 11 33", "0111").unwrap();
        assert!((value - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_unspaced_and_echoed() {
        assert_eq!(parse_response("410C1AF8", "010C"), Some(1726.0));
        assert_eq!(parse_response("010C\r41 0C 1A F8\r\r>", "010C"), Some(1726.0));
        assert_eq!(parse_response("SEARCHING...\r41 0D 3C\r\r>", "010D"), Some(60.0));
    }

    #[test]
    fn test_parse_can_header_on() {
        assert_eq!(parse_response("7E8 04 41 0C 1A F8 00 00 00", "010C"), Some(1726.0));
    }

    #[test]
    fn test_parse_freeze_frame_skips_frame_byte() {
        assert_eq!(parse_response("42 0C 00 1A F8", "020C"), Some(1726.0));
    }

    #[test]
    fn test_parse_unknown_pid_raw() {
        assert_eq!(parse_response("41 1F 01 2C", "011F"), Some(300.0));
        assert_eq!(parse_response("41 1F", "011F"), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for pid in ["010C", "0105", "0111", "0142", "0110"] {
            assert_eq!(parse_response("", pid), None);
            assert_eq!(parse_response("ERROR", pid), None);
            assert_eq!(parse_response("NO DATA", pid), None);
            assert_eq!(parse_response("41", pid), None);
        }
        assert_eq!(parse_response("41 0C 1A", "010C"), None);
        assert_eq!(parse_response("41 0C ZZ F8", "010C"), None);
        assert_eq!(parse_response("41 0C 1A F8", "01"), None);
        assert_eq!(parse_response("41 05 7B", "010C"), None);
    }

    #[test]
    fn test_parse_is_pure() {
        let first = parse_response("41 0C 1A F8", "010C");
        let second = parse_response("41 0C 1A F8", "010C");
        assert_eq!(first, second);
    }

    #[test]
    fn test_bytes_to_dtc() {
        assert_eq!(bytes_to_dtc("0100"), "P0100");
        assert_eq!(bytes_to_dtc("1000"), "C1000");
        assert_eq!(bytes_to_dtc("4123"), "C0123");
        assert_eq!(bytes_to_dtc("8100"), "B0100");
        assert_eq!(bytes_to_dtc("C001"), "U0001");
    }

    #[test]
    fn test_bytes_to_dtc_low_category_bits() {
        // Top two bits clear: category read from bits 13-12
        assert_eq!(bytes_to_dtc("2000"), "B2000");
        assert_eq!(bytes_to_dtc("3000"), "U3000");
        assert_eq!(bytes_to_dtc("0FFF"), "P0FFF");
        // Strict top-bits decoding of the same word in a mode 03 reply
        assert_eq!(parse_obd_dtcs("43 20 00 00 00 00 00", 0x03), vec!["P2000".to_string()]);
    }

    #[test]
    fn test_bytes_to_dtc_malformed() {
        assert_eq!(bytes_to_dtc(""), NO_DTC);
        assert_eq!(bytes_to_dtc("010"), NO_DTC);
        assert_eq!(bytes_to_dtc("01000"), NO_DTC);
        assert_eq!(bytes_to_dtc("01G0"), NO_DTC);
    }

    #[test]
    fn test_build_command() {
        assert_eq!(build_command(0x01, Some(0x0C), None), Request::new("010C"));
        assert_eq!(build_command(0x03, None, None).command, "03");
        assert_eq!(build_command(0x02, Some(0x0C), None).command, "020C00");

        let ecu = EcuAddress::Can {
            request: 0x7E0,
            response: 0x7E8,
        };
        let request = build_command(0x01, Some(0x0C), Some(&ecu));
        assert_eq!(request.header.as_deref(), Some("7E0"));
        assert_eq!(request.receive_filter.as_deref(), Some("7E8"));
    }

    #[test]
    fn test_build_service_request() {
        let ecu = EcuAddress::KLine {
            format: 0x81,
            target: 0x28,
            source: 0xF1,
        };
        let request = build_service_request(0x18, &[0x00, 0xFF, 0x00], Some(&ecu));
        assert_eq!(request.command, "1800FF00");
        assert_eq!(request.header.as_deref(), Some("8128F1"));
    }

    #[test]
    fn test_clean_response() {
        assert_eq!(clean_response("ATE0\rOK\r\r>", "ATE0"), "OK");
        assert_eq!(clean_response("41 0C 1A F8\r\r>", "010C"), "41 0C 1A F8");
        assert_eq!(
            clean_response("0100\rSEARCHING...\r41 00 BE 3F A8 13\r\r>", "0100"),
            "41 00 BE 3F A8 13"
        );
        assert_eq!(clean_response("BUS INIT: ...OK\r41 05 7B\r>", "0105"), "41 05 7B");
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(classify_response("OK"), ResponseKind::Ok);
        assert_eq!(classify_response("NO DATA"), ResponseKind::NoData);
        assert_eq!(classify_response(""), ResponseKind::NoData);
        assert_eq!(classify_response("?"), ResponseKind::AdapterError);
        assert_eq!(classify_response("CAN ERROR"), ResponseKind::AdapterError);
        assert_eq!(classify_response("7F 18 11"), ResponseKind::Negative(0x11));
        assert_eq!(classify_response("41 0C 1A F8"), ResponseKind::Data);
        assert_eq!(classify_response("ELM327 v1.5"), ResponseKind::Data);
    }

    #[test]
    fn test_is_positive_response() {
        assert!(is_positive_response("71 01 02", 0x31));
        assert!(is_positive_response("7E8 03 71 01 02", 0x31));
        assert!(!is_positive_response("7F 31 22", 0x31));
        assert!(!is_positive_response("NO DATA", 0x31));
    }

    #[test]
    fn test_parse_obd_dtcs_kline() {
        let codes = parse_obd_dtcs("43 01 33 03 00 00 00 43 01 02 00 00 00 00", 0x03);
        assert_eq!(codes, vec!["P0133", "P0300", "P0102"]);
        assert!(parse_obd_dtcs("43 00 00 00 00 00 00", 0x03).is_empty());
        assert!(parse_obd_dtcs("NO DATA", 0x03).is_empty());
    }

    #[test]
    fn test_parse_obd_dtcs_can() {
        let codes = parse_obd_dtcs("7E8 06 43 02 01 33 C1 00 00", 0x03);
        assert_eq!(codes, vec!["P0133", "U0100"]);
        let pending = parse_obd_dtcs("7E8 04 47 01 03 00", 0x07);
        assert_eq!(pending, vec!["P0300"]);
    }

    #[test]
    fn test_parse_kwp_dtcs() {
        let dtcs = parse_kwp_dtcs("58 02 50 31 60 50 32 40");
        assert_eq!(
            dtcs,
            vec![
                ("C1031".to_string(), DtcStatus::Active),
                ("C1032".to_string(), DtcStatus::Pending),
            ]
        );
        assert!(parse_kwp_dtcs("58 00").is_empty());
    }

    #[test]
    fn test_parse_uds_dtcs() {
        let dtcs = parse_uds_dtcs("7E8 10 0B 59 02 FF 50 31 00 \
                                   7E8 21 09 D0 01 00 04 00 00");
        assert_eq!(
            dtcs,
            vec![
                ("C1031".to_string(), DtcStatus::Active),
                ("U1001".to_string(), DtcStatus::Pending),
            ]
        );
    }

    #[test]
    fn test_parse_freeze_frame_dtc() {
        assert_eq!(parse_freeze_frame_dtc("42 02 00 01 33"), Some("P0133".to_string()));
        assert_eq!(parse_freeze_frame_dtc("42 02 00 00 00"), None);
    }
}
