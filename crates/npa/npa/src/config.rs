//! Card profile configuration
//!
//! A profile is read from a TOML file and `VNPA_`-prefixed environment variables on
//! top of the built-in test card:
//!
//! ```toml
//! pin = "123456"
//! can = "500540"
//! pin_retries = 3
//! ef_card_access = "3114301206...020c"
//! ```

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::backend::CryptoError;
use crate::constants::{
    DEFAULT_CA_REFERENCE, DEFAULT_EF_CARD_ACCESS, PIN_MAX_RETRIES, PUK_MAX_RETRIES,
};

/// Errors raised while loading a card profile
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The profile could not be loaded or extracted
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    /// A hex encoded field does not decode
    #[error("Invalid hex in {field}: {source}")]
    Hex {
        /// Name of the field
        field: &'static str,
        /// Decoding error
        source: hex::FromHexError,
    },

    /// The configured key is not a P-256 scalar
    #[error("Invalid chip authentication key: {0}")]
    ChipAuthenticationKey(#[from] CryptoError),
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Figment(Box::new(error))
    }
}

/// Secrets, counters and files of a virtual card
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// eID PIN
    pub pin: String,
    /// Card access number
    pub can: String,
    /// PIN unblocking key
    pub puk: String,
    /// MRZ information (document number, date of birth and date of expiry with check digits)
    pub mrz: String,
    /// Initial PIN retry counter
    pub pin_retries: u8,
    /// Initial PUK retry counter
    pub puk_retries: u8,
    /// EF.CardAccess, hex encoded
    #[serde(with = "hex")]
    pub ef_card_access: Vec<u8>,
    /// Certificate authority reference announced after PACE
    pub ca_reference: String,
    /// Static chip authentication private key (P-256 scalar), hex encoded; random when absent
    pub chip_authentication_key: Option<String>,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            pin: "111111".to_string(),
            can: "500540".to_string(),
            puk: "987654321".to_string(),
            mrz: "T220001293690806462208054".to_string(),
            pin_retries: PIN_MAX_RETRIES,
            puk_retries: PUK_MAX_RETRIES,
            ef_card_access: DEFAULT_EF_CARD_ACCESS.to_vec(),
            ca_reference: DEFAULT_CA_REFERENCE.to_string(),
            chip_authentication_key: None,
        }
    }
}

impl CardConfig {
    /// Load the profile from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed("VNPA_")).extract()?)
    }

    /// The decoded chip authentication key
    pub fn chip_authentication_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        self.chip_authentication_key
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|source| ConfigError::Hex {
                field: "chip_authentication_key",
                source,
            })
    }

    /// A copy with every secret replaced by asterisks
    pub fn masked(&self) -> Self {
        let mask = |secret: &str| "*".repeat(secret.len());
        Self {
            pin: mask(&self.pin),
            can: mask(&self.can),
            puk: mask(&self.puk),
            mrz: mask(&self.mrz),
            chip_authentication_key: self.chip_authentication_key.as_deref().map(mask),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for CardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = self.masked();
        f.debug_struct("CardConfig")
            .field("pin", &masked.pin)
            .field("can", &masked.can)
            .field("puk", &masked.puk)
            .field("pin_retries", &self.pin_retries)
            .field("puk_retries", &self.puk_retries)
            .field("ef_card_access", &hex::encode(&self.ef_card_access))
            .field("ca_reference", &self.ca_reference)
            .finish_non_exhaustive()
    }
}
