//! Command and response types for the card side of ISO/IEC 7816-4
//!
//! This crate provides the foundational types used by the virtual nPA to receive
//! command APDUs and emit response APDUs:
//!
//! - Parsing command APDUs (short and extended length) into [`Command`]
//! - Building response APDUs from a payload and a [`StatusWord`]
//! - Naming the status words the EAC protocol layer reports
//!
//! Transport concerns (readers, PC/SC, relays) are left to the embedding application.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod response;

// Core error types
mod error;
pub use error::{Error, Result};

// Re-exports for common types
pub use command::Command;
pub use response::Response;
pub use response::status::{self, StatusWord};
