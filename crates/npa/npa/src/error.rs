use iso7816_tlv::TlvError;
use vnpa_apdu_core::{StatusWord, status};

use crate::backend::CryptoError;

/// Result type for card operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for card operations
///
/// Every variant is answered with exactly one status word, see [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Verification failed, the terminal may start over
    #[error("Try again")]
    TryAgain,

    /// Verification failed, the given number of tries is left
    #[error("{0} tries remaining")]
    RetriesRemaining(u8),

    /// Malformed length
    #[error("Wrong length")]
    WrongLength,

    /// Malformed command APDU
    #[error(transparent)]
    Apdu(#[from] vnpa_apdu_core::Error),

    /// Secure messaging or PACE required
    #[error("Security status not satisfied")]
    SecurityStatusNotSatisfied,

    /// Protocol selected out of order
    #[error("Authentication method blocked")]
    AuthenticationBlocked,

    /// Unknown object or mechanism in a template
    #[error("Referenced data not usable")]
    ReferenceDataNotUsable,

    /// Operation not allowed in the current state
    #[error("Conditions of use not satisfied")]
    ConditionsNotSatisfied,

    /// Protected command without checksum
    #[error("Expected secure messaging data objects missing")]
    SmObjectsMissing,

    /// Protected command failed verification
    #[error("Secure messaging data objects incorrect")]
    SmObjectsIncorrect,

    /// Backend failure
    #[error("Cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Missing, duplicate or unexpected data object
    #[error("Incorrect parameters in the data field")]
    IncorrectParameters,

    /// Unsupported P1 or P2
    #[error("Incorrect parameters P1-P2")]
    IncorrectP1P2,

    /// Unknown secret reference
    #[error("Referenced data not found")]
    DataNotFound,

    /// Unknown instruction
    #[error("Instruction not supported")]
    InstructionNotSupported,

    /// Unsupported class byte
    #[error("Class not supported")]
    ClassNotSupported,

    /// Malformed BER-TLV data
    #[error("TlvError: {0}")]
    Tlv(TlvError),
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Tlv(error)
    }
}

impl Error {
    /// The status word reported to the terminal
    pub const fn status(&self) -> StatusWord {
        match self {
            Self::TryAgain => status::WARNING_NO_INFO,
            Self::RetriesRemaining(n) => StatusWord::counter(*n),
            Self::WrongLength => status::WRONG_LENGTH,
            Self::Apdu(e) => e.status(),
            Self::SecurityStatusNotSatisfied => status::SECURITY_STATUS_NOT_SATISFIED,
            Self::AuthenticationBlocked => status::AUTHENTICATION_BLOCKED,
            Self::ReferenceDataNotUsable => status::REFERENCE_DATA_NOT_USABLE,
            Self::ConditionsNotSatisfied => status::CONDITIONS_NOT_SATISFIED,
            Self::SmObjectsMissing => status::SM_OBJECTS_MISSING,
            Self::SmObjectsIncorrect => status::SM_OBJECTS_INCORRECT,
            Self::Crypto(_) => status::COMMAND_NOT_ALLOWED_NO_INFO,
            Self::IncorrectParameters | Self::Tlv(_) => status::INCORRECT_DATA,
            Self::IncorrectP1P2 => status::INCORRECT_P1P2,
            Self::DataNotFound => status::DATA_NOT_FOUND,
            Self::InstructionNotSupported => status::INVALID_INSTRUCTION,
            Self::ClassNotSupported => status::CLASS_NOT_SUPPORTED,
        }
    }
}
