//! EAC security environment of a virtual German eID card
//!
//! The crate implements the card side of Extended Access Control:
//!
//! - PACE with the MRZ, the CAN, the PIN or the PUK
//! - Terminal authentication with card verifiable certificates
//! - Chip authentication, which replaces the PACE session keys
//! - Secure messaging for every command after PACE
//! - The PIN, CAN and PUK with their retry counters
//!
//! [`Sam`] is the entry point: it takes command APDUs and answers with response
//! APDUs. Cryptography goes through the [`EacProvider`] seam; [`SoftProvider`]
//! implements it in software, and [`Terminal`] plays the other side of the
//! protocols.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod constants;
pub mod crt;
mod error;
pub mod sam;
pub mod se;
pub mod secrets;
mod tlv;

pub use backend::{
    CryptoError, EacContext, EacId, EacProvider,
    soft::{SoftProvider, terminal::Terminal},
};
pub use config::{CardConfig, ConfigError};
pub use crt::{Algorithm, CredentialSelector};
pub use error::{Error, Result};
pub use sam::Sam;
pub use se::{ResponseAuthentication, SecurityEnvironment, Step};
pub use secrets::Secrets;
