//! Error type for APDU parsing and encoding

use crate::response::status::{self, StatusWord};

/// Result type for APDU operations
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while decoding or encoding APDUs
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The command is shorter than its header or its length fields claim
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// The command body does not follow any ISO/IEC 7816-3 case
    #[error("Invalid command data: {0}")]
    InvalidCommandData(&'static str),

    /// The response is shorter than a status word
    #[error("Incomplete response: {0} bytes")]
    IncompleteResponse(usize),

    /// The payload does not fit into the length encoding
    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),
}

impl Error {
    /// The status word a card answers with when it receives such a command
    pub const fn status(&self) -> StatusWord {
        match self {
            Self::InvalidCommandLength(_) | Self::IncompleteResponse(_) | Self::PayloadTooLong(_) => {
                status::WRONG_LENGTH
            }
            Self::InvalidCommandData(_) => status::INCORRECT_DATA,
        }
    }
}
