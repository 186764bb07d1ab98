//! Long-lived secrets of the card and their retry counters

use std::fmt;

use tracing::{debug, info};
use vnpa_apdu_core::{StatusWord, status};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    Error, Result,
    config::CardConfig,
    constants::{PIN_MAX_RETRIES, PUK_MAX_RETRIES},
    crt::CredentialSelector,
};

/// PIN, CAN, PUK and MRZ of the card with the PIN and PUK retry counters
///
/// The security environment never touches the fields directly: every state change
/// goes through one of the methods below, which keeps the counter rules in one place.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secrets {
    pin: Vec<u8>,
    can: Vec<u8>,
    puk: Vec<u8>,
    mrz: Vec<u8>,
    #[zeroize(skip)]
    pin_retries: u8,
    #[zeroize(skip)]
    pin_active: bool,
    #[zeroize(skip)]
    puk_retries: u8,
}

impl Secrets {
    /// Create secrets with full retry counters
    pub fn new(pin: &[u8], can: &[u8], puk: &[u8], mrz: &[u8]) -> Self {
        Self {
            pin: pin.to_vec(),
            can: can.to_vec(),
            puk: puk.to_vec(),
            mrz: mrz.to_vec(),
            pin_retries: PIN_MAX_RETRIES,
            pin_active: true,
            puk_retries: PUK_MAX_RETRIES,
        }
    }

    /// Override the retry counters, e.g. to load a card profile
    pub fn with_retries(mut self, pin_retries: u8, puk_retries: u8) -> Self {
        self.pin_retries = pin_retries;
        self.puk_retries = puk_retries;
        // a PIN with a single try left needs to be resumed first
        self.pin_active = pin_retries > 1;
        self
    }

    /// Create the secrets of a card profile
    pub fn from_config(config: &CardConfig) -> Self {
        Self::new(
            config.pin.as_bytes(),
            config.can.as_bytes(),
            config.puk.as_bytes(),
            config.mrz.as_bytes(),
        )
        .with_retries(config.pin_retries, config.puk_retries)
    }

    /// Remaining PIN tries
    pub const fn pin_retries(&self) -> u8 {
        self.pin_retries
    }

    /// Remaining PUK tries
    pub const fn puk_retries(&self) -> u8 {
        self.puk_retries
    }

    /// Whether the PIN may be used for PACE
    pub const fn pin_active(&self) -> bool {
        self.pin_active
    }

    /// The password fed into PACE for the given credential
    pub fn password(&self, credential: CredentialSelector) -> &[u8] {
        match credential {
            CredentialSelector::Mrz => &self.mrz,
            CredentialSelector::Can => &self.can,
            CredentialSelector::Pin => &self.pin,
            CredentialSelector::Puk => &self.puk,
        }
    }

    /// The status word announcing the remaining PIN tries on MSE:SET AT
    pub const fn pin_status(&self) -> StatusWord {
        match self.pin_retries {
            n @ 0..=2 => StatusWord::counter(n),
            _ => status::SUCCESS,
        }
    }

    /// Check whether a PACE run with the credential may start
    ///
    /// Does not consume a try, see [`Self::consume_attempt`].
    pub fn check_attempt(&self, credential: CredentialSelector) -> Result<()> {
        match credential {
            CredentialSelector::Mrz | CredentialSelector::Can => Ok(()),
            CredentialSelector::Pin if self.pin_retries == 0 => {
                debug!("PIN blocked, PUK required");
                Err(Error::TryAgain)
            }
            CredentialSelector::Pin if self.pin_retries == 1 && !self.pin_active => {
                debug!("PIN suspended, CAN required");
                Err(Error::RetriesRemaining(1))
            }
            CredentialSelector::Pin => Ok(()),
            CredentialSelector::Puk if self.puk_retries == 0 => Err(Error::TryAgain),
            CredentialSelector::Puk => Ok(()),
        }
    }

    /// Consume one try of the credential
    pub fn consume_attempt(&mut self, credential: CredentialSelector) {
        match credential {
            CredentialSelector::Pin => {
                self.pin_retries = self.pin_retries.saturating_sub(1);
                if self.pin_retries <= 1 {
                    self.pin_active = false;
                }
            }
            CredentialSelector::Puk => self.puk_retries = self.puk_retries.saturating_sub(1),
            CredentialSelector::Mrz | CredentialSelector::Can => {}
        }
    }

    /// Apply the side effects of a successful PACE run
    pub fn pace_established(&mut self, credential: CredentialSelector) {
        match credential {
            CredentialSelector::Can if self.pin_retries == 1 => {
                self.pin_active = true;
                info!("PIN resumed");
            }
            CredentialSelector::Pin => {
                self.pin_active = true;
                self.pin_retries = PIN_MAX_RETRIES;
            }
            CredentialSelector::Puk => {
                self.pin_active = true;
                self.pin_retries = PIN_MAX_RETRIES;
                info!("PIN unblocked");
            }
            _ => {}
        }
    }

    /// Replace the CAN
    pub fn change_can(&mut self, can: &[u8]) {
        self.can.zeroize();
        self.can = can.to_vec();
        info!("CAN changed");
    }

    /// Replace the PIN
    pub fn change_pin(&mut self, pin: &[u8]) {
        self.pin.zeroize();
        self.pin = pin.to_vec();
        info!("PIN changed");
    }

    /// Allow the PIN again without touching its counter
    pub fn resume_pin(&mut self) {
        self.pin_active = true;
        info!("PIN resumed");
    }

    /// Allow the PIN again with a full counter
    pub fn unblock_pin(&mut self) {
        self.pin_active = true;
        self.pin_retries = PIN_MAX_RETRIES;
        info!("PIN unblocked");
    }
}

impl Default for Secrets {
    fn default() -> Self {
        Self::from_config(&CardConfig::default())
    }
}

// Secrets stay out of debug output
impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("pin_retries", &self.pin_retries)
            .field("pin_active", &self.pin_active)
            .field("puk_retries", &self.puk_retries)
            .finish_non_exhaustive()
    }
}
