//! EAC cryptography seam
//!
//! The security environment never performs cryptography itself. It drives an
//! [`EacContext`] created by an [`EacProvider`], one call per protocol step, and
//! interprets the results. Contexts and password secrets are plain owned values:
//! dropping them releases every key they hold.

#[cfg(test)]
pub(crate) mod mock;
pub mod soft;

use bytes::Bytes;
use derive_more::Display;

use crate::crt::CredentialSelector;

/// Errors reported by a cryptography backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// An operation was called before the state it depends on exists
    #[error("Invalid protocol state: {0}")]
    State(&'static str),

    /// Input that does not decode
    #[error("Malformed {0}")]
    Malformed(&'static str),

    /// Point not on the curve or wrongly encoded
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Mechanism or parameters the backend does not implement
    #[error("Unsupported {0}")]
    Unsupported(&'static str),

    /// Certificate not accepted for import
    #[error("Certificate rejected: {0}")]
    Certificate(&'static str),

    /// Padding check failed after decryption
    #[error("Invalid padding")]
    Padding,

    /// Key of the wrong size
    #[error("Invalid key length")]
    KeyLength,

    /// Signing failed
    #[error("Signature generation failed")]
    Signature,

    /// Authentication token mismatch
    #[error("Authentication token mismatch")]
    Token,
}

/// Session keys of the secure messaging channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EacId {
    /// Keys derived by PACE
    #[display("PACE")]
    Pace,
    /// Keys derived by chip authentication
    #[display("CA")]
    Ca,
}

/// Factory for protocol contexts and password secrets
pub trait EacProvider {
    /// Password material derived from a PACE credential
    type Secret;
    /// Protocol state of one EAC run
    type Context: EacContext<Secret = Self::Secret>;

    /// Create a fresh protocol context
    fn new_context(&self) -> Result<Self::Context, CryptoError>;

    /// Derive the PACE password secret
    fn new_secret(
        &self,
        password: &[u8],
        credential: CredentialSelector,
    ) -> Result<Self::Secret, CryptoError>;
}

/// Protocol state of one EAC run on the chip side
///
/// Public keys and tokens are exchanged in their encoded form.
pub trait EacContext {
    /// Password material consumed by PACE
    type Secret;

    /// Select the PACE parameters advertised in EF.CardAccess
    fn init_ef_card_access(&mut self, ef_card_access: &[u8]) -> Result<(), CryptoError>;

    /// Select the chip authentication protocol and key
    fn init_ca(&mut self, protocol: &[u8], key_id: u8) -> Result<(), CryptoError>;

    /// Choose a nonce and return it encrypted with the password
    fn pace_encrypted_nonce(&mut self, secret: &Self::Secret) -> Result<Bytes, CryptoError>;

    /// Generate the chip's mapping data
    fn pace_mapping_data(&mut self) -> Result<Bytes, CryptoError>;

    /// Map the generator with the terminal's mapping data
    fn pace_map_generator(&mut self, mapping_data: &[u8]) -> Result<(), CryptoError>;

    /// Generate the chip's ephemeral key pair on the mapped generator
    fn pace_ephemeral_key(&mut self) -> Result<Bytes, CryptoError>;

    /// Agree on the shared secret with the terminal's ephemeral public key
    fn pace_shared_secret(&mut self, terminal_key: &[u8]) -> Result<(), CryptoError>;

    /// Derive the session keys from the shared secret
    fn pace_derive_keys(&mut self) -> Result<(), CryptoError>;

    /// Authentication token over the terminal's ephemeral public key
    fn pace_authentication_token(&mut self, terminal_key: &[u8]) -> Result<Bytes, CryptoError>;

    /// Verify the terminal's token over the chip's ephemeral public key
    fn pace_verify_token(&mut self, token: &[u8]) -> bool;

    /// Select the keys used for secure messaging
    fn set_encryption(&mut self, id: EacId) -> Result<(), CryptoError>;

    /// Trust the certificate authority reference for terminal authentication
    fn init_ta(&mut self, car: &[u8]) -> Result<(), CryptoError>;

    /// Import a card verifiable certificate (tag 0x7F21)
    fn ta_import_certificate(&mut self, certificate: &[u8]) -> Result<(), CryptoError>;

    /// Choose the challenge the terminal signs
    fn ta_nonce(&mut self) -> Result<Bytes, CryptoError>;

    /// Verify the terminal's signature over the challenge
    fn ta_verify(
        &mut self,
        terminal_key: &[u8],
        id_picc: &[u8],
        auxiliary_data: Option<&[u8]>,
        signature: &[u8],
    ) -> bool;

    /// Compressed representation of a public key
    fn compressed_key(&self, id: EacId, public_key: &[u8]) -> Result<Bytes, CryptoError>;

    /// Agree on the chip authentication secret
    fn ca_shared_secret(&mut self, terminal_key: &[u8]) -> Result<(), CryptoError>;

    /// Derive the chip authentication keys, returning nonce and token
    fn ca_derive_keys(&mut self, terminal_key: &[u8]) -> Result<(Bytes, Bytes), CryptoError>;

    /// Cryptographic checksum over padded data
    fn authenticate(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError>;

    /// Encrypt padded data
    fn encrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError>;

    /// Decrypt to padded data
    fn decrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError>;

    /// Sign a message digest
    fn sign(&self, digest: &[u8]) -> Result<Bytes, CryptoError>;
}
