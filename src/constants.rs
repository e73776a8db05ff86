//! Centralized constants for ELM327 / OBD-II communication
//!
//! This module contains the AT command set, service identifiers, baud
//! rates and timing defaults used throughout the crate.

// ============================================================================
// ELM327 AT COMMANDS
// ============================================================================

pub mod elm {
    /// Full adapter reset; answers with the identification banner
    pub const RESET: &str = "ATZ";
    pub const ECHO_OFF: &str = "ATE0";
    pub const LINEFEEDS_OFF: &str = "ATL0";
    pub const SPACES_ON: &str = "ATS1";
    pub const HEADERS_OFF: &str = "ATH0";
    pub const HEADERS_ON: &str = "ATH1";
    /// Adaptive timing, normal aggressiveness
    pub const ADAPTIVE_TIMING: &str = "ATAT1";

    /// Prefix of the set-header command (`ATSH 7E0`, `ATSH 8110F1`)
    pub const SET_HEADER: &str = "ATSH";
    /// Prefix of the set-timeout command, value in 4 ms units
    pub const SET_TIMEOUT: &str = "ATST";
    /// Prefix of the set-protocol command
    pub const SET_PROTOCOL: &str = "ATSP";
    /// Prefix of the CAN receive-address filter command
    pub const SET_RECEIVE_ADDRESS: &str = "ATCRA";

    /// Prompt character that terminates every adapter reply
    pub const PROMPT: u8 = b'>';
    pub const TERMINATOR: &str = "\r";

    /// Replies that mean the request reached the adapter but nothing answered
    pub const NO_DATA_REPLIES: &[&str] = &["NO DATA", "UNABLE TO CONNECT", "STOPPED", "BUS BUSY"];

    /// Replies that mean the adapter itself rejected or failed the request
    pub const ERROR_REPLIES: &[&str] = &[
        "?",
        "ERROR",
        "BUS ERROR",
        "CAN ERROR",
        "DATA ERROR",
        "FB ERROR",
        "BUFFER FULL",
        "LV RESET",
    ];

    /// Progress noise the adapter interleaves with real data
    pub const NOISE: &[&str] = &["SEARCHING...", "BUS INIT:", "...OK"];
}

// ============================================================================
// OBD-II MODES (SAE J1979)
// ============================================================================

pub mod obd {
    pub const CURRENT_DATA: u8 = 0x01;
    pub const FREEZE_FRAME: u8 = 0x02;
    pub const STORED_DTCS: u8 = 0x03;
    pub const CLEAR_DTCS: u8 = 0x04;
    pub const PENDING_DTCS: u8 = 0x07;
    pub const PERMANENT_DTCS: u8 = 0x0A;

    /// DTC that caused the stored freeze frame
    pub const PID_FREEZE_DTC: u8 = 0x02;

    // Positive response = mode + 0x40
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

// ============================================================================
// KWP2000 SERVICES (ISO 14230)
// ============================================================================

pub mod kwp {
    pub const START_DIAGNOSTIC_SESSION: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_BY_STATUS: u8 = 0x18;
    pub const START_ROUTINE: u8 = 0x31;
    pub const WRITE_DATA_BY_LOCAL_ID: u8 = 0x3B;

    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Negative response codes shared by KWP2000 and UDS
    pub mod nrc {
        pub const GENERAL_REJECT: u8 = 0x10;
        pub const SERVICE_NOT_SUPPORTED: u8 = 0x11;
        pub const SUB_FUNCTION_NOT_SUPPORTED: u8 = 0x12;
        pub const INVALID_FORMAT: u8 = 0x13;
        pub const BUSY_REPEAT_REQUEST: u8 = 0x21;
        pub const CONDITIONS_NOT_CORRECT: u8 = 0x22;
        pub const REQUEST_SEQUENCE_ERROR: u8 = 0x24;
        pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
        pub const SECURITY_ACCESS_DENIED: u8 = 0x33;
        pub const RESPONSE_PENDING: u8 = 0x78;

        pub fn description(code: u8) -> &'static str {
            match code {
                GENERAL_REJECT => "General reject",
                SERVICE_NOT_SUPPORTED => "Service not supported",
                SUB_FUNCTION_NOT_SUPPORTED => "Sub-function not supported",
                INVALID_FORMAT => "Incorrect message length or invalid format",
                BUSY_REPEAT_REQUEST => "Busy - repeat request",
                CONDITIONS_NOT_CORRECT => "Conditions not correct",
                REQUEST_SEQUENCE_ERROR => "Request sequence error",
                REQUEST_OUT_OF_RANGE => "Request out of range",
                SECURITY_ACCESS_DENIED => "Security access denied",
                RESPONSE_PENDING => "Response pending",
                _ => "Unknown error",
            }
        }
    }
}

// ============================================================================
// UDS SERVICES (ISO 14229), used by CAN body ECUs
// ============================================================================

pub mod uds {
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;

    pub mod dtc {
        pub const REPORT_BY_STATUS_MASK: u8 = 0x02;
        pub const STATUS_MASK_ALL: u8 = 0xFF;
    }
}

// ============================================================================
// ADDRESSES
// ============================================================================

pub mod addresses {
    /// Diagnostic tester address (ISO 14230)
    pub const TESTER: u8 = 0xF1;

    /// KWP2000 format byte for physical addressing with length in the
    /// data field
    pub const KWP_PHYSICAL_FORMAT: u8 = 0x81;

    /// ISO 9141-2 functional OBD header bytes
    pub const ISO9141_FUNCTIONAL: [u8; 3] = [0x68, 0x6A, 0xF1];
}

// ============================================================================
// BAUD RATES
// ============================================================================

pub mod baud {
    /// ELM327 default on most USB and Bluetooth clones
    pub const ELM_DEFAULT: u32 = 38_400;

    /// Valid baud rate range
    pub const MIN_BAUD: u32 = 9_600;
    pub const MAX_BAUD: u32 = 2_000_000;
}

// ============================================================================
// TIMING CONSTANTS
// ============================================================================

pub mod timing {
    use std::time::Duration;

    /// Serial read timeout on the physical handle
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// Default upper bound for one OBD request/response
    pub const COMMAND_TIMEOUT_MS: u64 = 2000;

    /// Reset needs longer: the adapter reboots before printing its banner
    pub const RESET_TIMEOUT_MS: u64 = 3000;

    /// Setup commands answer almost instantly
    pub const SETUP_TIMEOUT_MS: u64 = 1000;

    /// TCP connect timeout for WiFi adapters
    pub const TCP_CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Interval between unsolicited-data polls
    pub const MONITOR_POLL_MS: u64 = 50;

    /// Sleep between read polls while waiting for the prompt
    pub const READ_POLL_MS: u64 = 5;

    pub const READ_POLL: Duration = Duration::from_millis(READ_POLL_MS);
    pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(COMMAND_TIMEOUT_MS);
    pub const RESET_TIMEOUT: Duration = Duration::from_millis(RESET_TIMEOUT_MS);
    pub const SETUP_TIMEOUT: Duration = Duration::from_millis(SETUP_TIMEOUT_MS);

    /// Pause between reconnection attempts
    pub const RETRY_DELAY_MS: u64 = 500;
    pub const RETRY_DELAY: Duration = Duration::from_millis(RETRY_DELAY_MS);
}

// ============================================================================
// LIMITS
// ============================================================================

pub mod limits {
    /// Capacity of the unsolicited frame queue
    pub const UNSOLICITED_QUEUE: usize = 64;

    /// Upper bound on a single adapter reply before it is treated as garbage
    pub const MAX_RESPONSE_BYTES: usize = 4096;

    /// Consecutive I/O failures after which a run treats the adapter as gone
    pub const MAX_CONSECUTIVE_IO_FAILURES: u32 = 3;

    /// Retries accepted from configuration
    pub const MAX_RETRIES: u32 = 10;

    /// Bounds on configured timeouts
    pub const MIN_TIMEOUT_MS: u64 = 100;
    pub const MAX_TIMEOUT_MS: u64 = 30_000;

    /// Bounds on the monitor poll interval
    pub const MIN_POLL_MS: u64 = 10;
    pub const MAX_POLL_MS: u64 = 1_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_baud_in_range() {
        assert!(baud::ELM_DEFAULT >= baud::MIN_BAUD);
        assert!(baud::ELM_DEFAULT <= baud::MAX_BAUD);
    }

    #[test]
    fn test_reset_waits_longer_than_setup() {
        assert!(timing::RESET_TIMEOUT > timing::SETUP_TIMEOUT);
    }

    #[test]
    fn test_nrc_description() {
        assert_eq!(kwp::nrc::description(kwp::nrc::CONDITIONS_NOT_CORRECT), "Conditions not correct");
        assert_eq!(kwp::nrc::description(0xEE), "Unknown error");
    }

    #[test]
    fn test_no_data_and_error_replies_disjoint() {
        for reply in elm::NO_DATA_REPLIES {
            assert!(!elm::ERROR_REPLIES.contains(reply));
        }
    }
}
