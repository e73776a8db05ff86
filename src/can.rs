//! ISO-TP (ISO 15765-2) reassembly for ELM327 CAN output
//!
//! With headers on (`ATH1`) and spaces on (`ATS1`) the adapter prints every
//! received CAN frame as a 3 digit 11-bit identifier followed by the 8 data
//! bytes, PCI byte included:
//!
//! ```text
//! 7E8 10 14 49 02 01 58 39 4C
//! 7E8 21 32 31 32 33 30 30 36
//! 7E8 22 30 31 32 33 34 35 36
//! ```
//!
//! The header token is the only 3 character token, so frames can be split
//! out of a whitespace-collapsed response without relying on line breaks.

use std::collections::HashMap;
use thiserror::Error;

/// ISO-TP frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// SF, payload up to 7 bytes
    Single,
    /// FF, start of a segmented message
    First,
    /// CF
    Consecutive,
    /// FC, only ever sent by the tester side
    FlowControl,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    #[error("Empty CAN frame")]
    Empty,
    #[error("CAN frame too short for {0} frame")]
    TooShort(&'static str),
    #[error("Unknown ISO-TP frame type: 0x{0:02X}")]
    UnknownType(u8),
}

/// ISO-TP frame decoded from the 8 CAN data bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoTpFrame {
    pub kind: FrameKind,
    pub data: Vec<u8>,
    pub sequence: Option<u8>,
    pub total_length: Option<u16>,
}

impl IsoTpFrame {
    /// Parse frame from CAN data bytes
    pub fn from_can_data(data: &[u8]) -> Result<Self, FrameError> {
        let pci = *data.first().ok_or(FrameError::Empty)?;

        match pci & 0xF0 {
            0x00 => {
                // [0L DDDDDDD] where L = length
                let len = (pci & 0x0F) as usize;
                if len == 0 || data.len() < len + 1 {
                    return Err(FrameError::TooShort("single"));
                }
                Ok(Self {
                    kind: FrameKind::Single,
                    data: data[1..=len].to_vec(),
                    sequence: None,
                    total_length: None,
                })
            }
            0x10 => {
                // [1H HL DDDDDD] where HHL = total length
                if data.len() < 3 {
                    return Err(FrameError::TooShort("first"));
                }
                let len = (((pci & 0x0F) as u16) << 8) | (data[1] as u16);
                Ok(Self {
                    kind: FrameKind::First,
                    data: data[2..].to_vec(),
                    sequence: None,
                    total_length: Some(len),
                })
            }
            0x20 => {
                // [2N DDDDDDD] where N = sequence
                if data.len() < 2 {
                    return Err(FrameError::TooShort("consecutive"));
                }
                Ok(Self {
                    kind: FrameKind::Consecutive,
                    data: data[1..].to_vec(),
                    sequence: Some(pci & 0x0F),
                    total_length: None,
                })
            }
            0x30 => Ok(Self {
                kind: FrameKind::FlowControl,
                data: vec![
                    pci & 0x0F,
                    data.get(1).copied().unwrap_or(0),
                    data.get(2).copied().unwrap_or(0),
                ],
                sequence: None,
                total_length: None,
            }),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// One CAN frame as printed by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub header: u16,
    pub data: Vec<u8>,
}

/// Complete payload received from one ECU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanMessage {
    pub header: u16,
    pub payload: Vec<u8>,
}

/// True for a 3 digit 11-bit CAN identifier token
pub fn is_header_token(token: &str) -> bool {
    token.len() == 3
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && u16::from_str_radix(token, 16).map(|v| v <= 0x7FF).unwrap_or(false)
}

/// Split whitespace separated tokens into CAN frames.
///
/// Returns `None` unless the first token is a header and every other token
/// is a header or a 2 digit hex byte.
pub fn split_frames(tokens: &[&str]) -> Option<Vec<CanFrame>> {
    let mut frames: Vec<CanFrame> = Vec::new();

    for token in tokens {
        if is_header_token(token) {
            let header = u16::from_str_radix(token, 16).ok()?;
            frames.push(CanFrame {
                header,
                data: Vec::new(),
            });
        } else if token.len() == 2 {
            let byte = u8::from_str_radix(token, 16).ok()?;
            frames.last_mut()?.data.push(byte);
        } else {
            return None;
        }
    }

    if frames.is_empty() {
        None
    } else {
        Some(frames)
    }
}

struct Pending {
    total: usize,
    next_sequence: u8,
    payload: Vec<u8>,
}

/// Reassemble frames into complete messages, one per ECU transfer, in the
/// order they complete. Incomplete or out-of-sequence transfers are dropped.
pub fn reassemble(frames: &[CanFrame]) -> Vec<CanMessage> {
    let mut pending: HashMap<u16, Pending> = HashMap::new();
    let mut messages = Vec::new();

    for frame in frames {
        let isotp = match IsoTpFrame::from_can_data(&frame.data) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Skipping frame from {:03X}: {}", frame.header, e);
                continue;
            }
        };

        match isotp.kind {
            FrameKind::Single => messages.push(CanMessage {
                header: frame.header,
                payload: isotp.data,
            }),
            FrameKind::First => {
                let total = isotp.total_length.unwrap_or(0) as usize;
                let mut payload = isotp.data;
                if payload.len() >= total {
                    payload.truncate(total);
                    messages.push(CanMessage {
                        header: frame.header,
                        payload,
                    });
                } else {
                    if pending.contains_key(&frame.header) {
                        log::debug!("Restarting transfer from {:03X}", frame.header);
                    }
                    pending.insert(
                        frame.header,
                        Pending {
                            total,
                            next_sequence: 1,
                            payload,
                        },
                    );
                }
            }
            FrameKind::Consecutive => {
                let Some(entry) = pending.get_mut(&frame.header) else {
                    log::debug!("Consecutive frame from {:03X} without first frame", frame.header);
                    continue;
                };
                if isotp.sequence != Some(entry.next_sequence) {
                    log::debug!(
                        "Sequence error from {:03X}: expected {}, got {:?}",
                        frame.header,
                        entry.next_sequence,
                        isotp.sequence
                    );
                    pending.remove(&frame.header);
                    continue;
                }
                entry.payload.extend_from_slice(&isotp.data);
                entry.next_sequence = (entry.next_sequence + 1) & 0x0F;
                if entry.payload.len() >= entry.total {
                    if let Some(mut done) = pending.remove(&frame.header) {
                        done.payload.truncate(done.total);
                        messages.push(CanMessage {
                            header: frame.header,
                            payload: done.payload,
                        });
                    }
                }
            }
            FrameKind::FlowControl => {}
        }
    }

    for (header, left) in &pending {
        log::debug!(
            "Dropping incomplete transfer from {:03X} ({}/{} bytes)",
            header,
            left.payload.len(),
            left.total
        );
    }

    messages
}

/// Split and reassemble a whitespace separated header-on response
pub fn messages_from_tokens(tokens: &[&str]) -> Option<Vec<CanMessage>> {
    split_frames(tokens).map(|frames| reassemble(&frames))
}
