//! APDU command definitions
//!
//! This module provides the command APDU as received by the card, with both the
//! short and the extended length encodings of ISO/IEC 7816-3 § 12.1.3. EAC needs
//! the extended form because card verifiable certificates exceed 255 bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Expected response length (Ne), 1..=65536
pub type ExpectedLength = u32;

/// CLA bits signalling secure messaging with an authenticated header
pub const CLA_SECURE_MESSAGING: u8 = 0x0C;
/// CLA bit signalling command chaining
pub const CLA_CHAINING: u8 = 0x10;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = if data.is_empty() { None } else { Some(data) };
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Replace the class byte
    pub const fn with_class(mut self, cla: u8) -> Self {
        self.cla = cla;
        self
    }

    /// The command data, empty when absent
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Whether the class byte announces secure messaging
    pub const fn is_secure_messaging(&self) -> bool {
        self.cla & CLA_SECURE_MESSAGING == CLA_SECURE_MESSAGING
    }

    /// Whether the class byte announces that more chained commands follow
    pub const fn is_chained(&self) -> bool {
        self.cla & CLA_CHAINING == CLA_CHAINING
    }

    /// The four header bytes
    pub const fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 4 {
            return Err(Error::InvalidCommandLength(raw.len()));
        }

        let mut command = Self::new(raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];

        match body.len() {
            // case 1
            0 => {}
            // case 2S
            1 => command.le = Some(short_le(body[0])),
            _ if body[0] != 0x00 => {
                let lc = body[0] as usize;
                let rest = &body[1..];
                if rest.len() < lc {
                    return Err(Error::InvalidCommandLength(raw.len()));
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                match rest.len() - lc {
                    // case 3S
                    0 => {}
                    // case 4S
                    1 => command.le = Some(short_le(rest[lc])),
                    _ => return Err(Error::InvalidCommandLength(raw.len())),
                }
            }
            // case 2E
            3 => command.le = Some(extended_le(body[1], body[2])),
            n if n > 3 => {
                let lc = u16::from_be_bytes([body[1], body[2]]) as usize;
                if lc == 0 {
                    return Err(Error::InvalidCommandData("extended Lc of zero"));
                }
                let rest = &body[3..];
                if rest.len() < lc {
                    return Err(Error::InvalidCommandLength(raw.len()));
                }
                command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                match rest.len() - lc {
                    // case 3E
                    0 => {}
                    // case 4E
                    2 => command.le = Some(extended_le(rest[lc], rest[lc + 1])),
                    _ => return Err(Error::InvalidCommandLength(raw.len())),
                }
            }
            _ => return Err(Error::InvalidCommandData("truncated extended length")),
        }

        Ok(command)
    }

    /// Convert to raw APDU bytes, choosing the extended encoding only when needed
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let data_len = self.data().len();
        if data_len > u16::MAX as usize {
            return Err(Error::PayloadTooLong(data_len));
        }
        if let Some(le) = self.le {
            if le == 0 || le > 65536 {
                return Err(Error::InvalidCommandData("Ne out of range"));
            }
        }

        let extended = data_len > 255 || self.le.is_some_and(|le| le > 256);
        let mut buffer = BytesMut::with_capacity(4 + 3 + data_len + 3);
        buffer.put_slice(&self.header());

        if extended {
            if data_len > 0 {
                buffer.put_u8(0x00);
                buffer.put_u16(data_len as u16);
                buffer.put_slice(self.data());
            }
            if let Some(le) = self.le {
                if data_len == 0 {
                    buffer.put_u8(0x00);
                }
                // 65536 is encoded as 00 00
                buffer.put_u16(le as u16);
            }
        } else {
            if data_len > 0 {
                buffer.put_u8(data_len as u8);
                buffer.put_slice(self.data());
            }
            if let Some(le) = self.le {
                // 256 is encoded as 00
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }
}

const fn short_le(byte: u8) -> ExpectedLength {
    if byte == 0 { 256 } else { byte as ExpectedLength }
}

const fn extended_le(msb: u8, lsb: u8) -> ExpectedLength {
    match u16::from_be_bytes([msb, lsb]) {
        0 => 65536,
        n => n as ExpectedLength,
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CLA={:02X} INS={:02X} P1={:02X} P2={:02X} data={}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            hex::encode(self.data())
        )?;
        if let Some(le) = self.le {
            write!(f, " Ne={le}")?;
        }
        Ok(())
    }
}
