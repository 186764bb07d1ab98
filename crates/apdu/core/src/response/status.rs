//! Status word definitions for APDU responses

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) of an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Warning carrying a retry counter (63 Cx), `x` saturating at 15
    pub const fn counter(remaining: u8) -> Self {
        let remaining = if remaining > 0x0F { 0x0F } else { remaining };
        Self::new(0x63, 0xC0 | remaining)
    }

    /// The big-endian bytes of the status word without leading zero bytes
    ///
    /// This is the encoding carried in the secure messaging processing status object.
    pub fn to_minimal_bytes(&self) -> Vec<u8> {
        let bytes = self.to_u16().to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        bytes[start..].to_vec()
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word is a warning (62 XX or 63 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Remaining tries when this is a counter warning (63 Cx)
    pub const fn retries_remaining(&self) -> Option<u8> {
        if self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x63, 0x00) => "Verification failed",
            (0x63, 0xC0) => "Verification failed, no tries left",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Verification failed, counter value",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x00) => "Command not allowed, no information given",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x84) => "Referenced data not usable",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x69, 0x87) => "Expected SM data objects missing",
            (0x69, 0x88) => "SM data objects incorrect",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Success (90 00)
pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

/// Verification failed, no further information (63 00)
pub const WARNING_NO_INFO: StatusWord = StatusWord::new(0x63, 0x00);

/// Wrong length (67 00)
pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

/// Command not allowed, no further information (69 00)
pub const COMMAND_NOT_ALLOWED_NO_INFO: StatusWord = StatusWord::new(0x69, 0x00);

/// Security status not satisfied (69 82)
pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

/// Authentication method blocked (69 83)
pub const AUTHENTICATION_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);

/// Referenced data not usable (69 84)
pub const REFERENCE_DATA_NOT_USABLE: StatusWord = StatusWord::new(0x69, 0x84);

/// Conditions of use not satisfied (69 85)
pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

/// Expected secure messaging data objects missing (69 87)
pub const SM_OBJECTS_MISSING: StatusWord = StatusWord::new(0x69, 0x87);

/// Secure messaging data objects incorrect (69 88)
pub const SM_OBJECTS_INCORRECT: StatusWord = StatusWord::new(0x69, 0x88);

/// Incorrect parameters in the data field (6A 80)
pub const INCORRECT_DATA: StatusWord = StatusWord::new(0x6A, 0x80);

/// Incorrect parameters P1-P2 (6A 86)
pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);

/// Referenced data not found (6A 88)
pub const DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);

/// Invalid instruction (6D 00)
pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

/// Class not supported (6E 00)
pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
