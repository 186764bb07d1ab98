//! Security environment of the EAC protocols
//!
//! The security environment tracks one EAC run: the authentication template set by
//! MSE:SET, the protocol step, the backend context holding the keys, and the send
//! sequence counter of the secure messaging channel.
//!
//! Steps advance strictly in order:
//!
//! | step | reached after                                       |
//! |------|-----------------------------------------------------|
//! | 0    | MSE:SET AT selecting PACE                           |
//! | 1-3  | the first three GENERAL AUTHENTICATE commands       |
//! | 4    | the PACE tokens were exchanged (secure messaging)   |
//! | 5    | EXTERNAL AUTHENTICATE verified the terminal         |
//!
//! Chip authentication runs at step 5; its keys replace the PACE keys once the
//! response carrying its token has left the card.

mod ca;
mod pace;
pub mod sm;
mod ta;

use std::fmt;

use bytes::Bytes;
use tracing::{debug, info};
use vnpa_apdu_core::{StatusWord, status};

pub use self::sm::ResponseAuthentication;
use crate::{
    Error, Result,
    backend::{CryptoError, EacContext, EacId, EacProvider},
    constants::{DEFAULT_CA_REFERENCE, DEFAULT_EF_CARD_ACCESS, mse},
    crt::{Algorithm, ControlReferenceTemplate, CredentialSelector, DigitalSignatureTemplate},
    secrets::Secrets,
};

/// Protocol step of an EAC run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// PACE selected, waiting for the nonce request
    #[default]
    Start,
    /// Nonce sent, waiting for the terminal's mapping data
    Mapping,
    /// Generator mapped, waiting for the terminal's ephemeral key
    KeyAgreement,
    /// Shared secret agreed, waiting for the terminal's token
    MutualAuthentication,
    /// PACE established
    PaceEstablished,
    /// Terminal authenticated
    TerminalAuthenticated,
}

impl Step {
    /// Numeric step as used in protocol traces
    pub const fn number(self) -> u8 {
        self as u8
    }
}

/// Security environment driving an [`EacProvider`]
pub struct SecurityEnvironment<P: EacProvider> {
    provider: P,
    at: ControlReferenceTemplate,
    dst: DigitalSignatureTemplate,
    step: Step,
    context: Option<P::Context>,
    secret: Option<P::Secret>,
    pace_credential: Option<CredentialSelector>,
    terminal_ephemeral_key: Option<Bytes>,
    chip_ephemeral_key: Option<Bytes>,
    ssc: u64,
    encryption: Option<EacId>,
    ca_keys_pending: bool,
    response_authentication: ResponseAuthentication,
    ca_reference: Bytes,
    ef_card_access: Bytes,
}

impl<P: EacProvider> SecurityEnvironment<P> {
    /// Security environment announcing the default EF.CardAccess and CA reference
    pub fn new(provider: P) -> Self {
        Self::with_files(
            provider,
            Bytes::from_static(DEFAULT_EF_CARD_ACCESS),
            Bytes::from_static(DEFAULT_CA_REFERENCE.as_bytes()),
        )
    }

    /// Security environment with the given EF.CardAccess and CA reference
    pub fn with_files(provider: P, ef_card_access: Bytes, ca_reference: Bytes) -> Self {
        Self {
            provider,
            at: ControlReferenceTemplate::default(),
            dst: DigitalSignatureTemplate::default(),
            step: Step::Start,
            context: None,
            secret: None,
            pace_credential: None,
            terminal_ephemeral_key: None,
            chip_ephemeral_key: None,
            ssc: 0,
            encryption: None,
            ca_keys_pending: false,
            response_authentication: ResponseAuthentication::default(),
            ca_reference,
            ef_card_access,
        }
    }

    /// Choose how protected responses are authenticated
    pub const fn set_response_authentication(&mut self, authentication: ResponseAuthentication) {
        self.response_authentication = authentication;
    }

    /// Current protocol step
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Send sequence counter
    pub const fn ssc(&self) -> u64 {
        self.ssc
    }

    /// Advance the send sequence counter before a protected message is processed
    pub const fn increment_ssc(&mut self) {
        self.ssc = self.ssc.wrapping_add(1);
    }

    /// The authentication template
    pub const fn authentication_template(&self) -> &ControlReferenceTemplate {
        &self.at
    }

    /// Credential of the last successful PACE run
    pub const fn pace_credential(&self) -> Option<CredentialSelector> {
        self.pace_credential
    }

    /// Keys protecting the channel, if any
    pub const fn encryption(&self) -> Option<EacId> {
        self.encryption
    }

    /// Whether a secure messaging session is open
    pub const fn has_session(&self) -> bool {
        self.encryption.is_some() && self.context.is_some()
    }

    /// Whether chip authentication keys wait for activation
    pub const fn ca_keys_pending(&self) -> bool {
        self.ca_keys_pending
    }

    fn context(&self) -> Result<&P::Context> {
        self.context
            .as_ref()
            .ok_or(Error::Crypto(CryptoError::State("no EAC context")))
    }

    fn context_mut(&mut self) -> Result<&mut P::Context> {
        self.context
            .as_mut()
            .ok_or(Error::Crypto(CryptoError::State("no EAC context")))
    }

    /// Release the context and secret and forget the protocol state
    ///
    /// The authentication template survives, so a new run may start right away.
    pub fn abort(&mut self) {
        if self.context.is_some() {
            debug!(step = self.step.number(), "Releasing EAC context");
        }
        self.context = None;
        self.secret = None;
        self.pace_credential = None;
        self.terminal_ephemeral_key = None;
        self.chip_ephemeral_key = None;
        self.encryption = None;
        self.ca_keys_pending = false;
        self.step = Step::Start;
        self.ssc = 0;
    }

    /// MANAGE SECURITY ENVIRONMENT
    ///
    /// Only SET is supported, for the authentication and the digital signature
    /// template. Selecting PACE restarts the protocol at step 0.
    pub fn manage_security_environment(
        &mut self,
        p1: u8,
        p2: u8,
        data: &[u8],
        secrets: &Secrets,
    ) -> Result<StatusWord> {
        if p1 & 0x0F != mse::SET {
            return Err(Error::IncorrectP1P2);
        }
        match p2 {
            mse::AUTHENTICATION_TEMPLATE => self.set_authentication_template(data, secrets),
            mse::DIGITAL_SIGNATURE_TEMPLATE => {
                self.dst = DigitalSignatureTemplate::parse(data)?;
                Ok(status::SUCCESS)
            }
            _ => Err(Error::IncorrectP1P2),
        }
    }

    fn set_authentication_template(&mut self, data: &[u8], secrets: &Secrets) -> Result<StatusWord> {
        let (at, status) = ControlReferenceTemplate::configure(data, secrets.pin_status())?;
        match at.algorithm() {
            Some(Algorithm::Pace) => self.step = Step::Start,
            Some(Algorithm::Ta) if self.step != Step::PaceEstablished => {
                debug!(step = self.step.number(), "TA selected before PACE");
                return Err(Error::AuthenticationBlocked);
            }
            Some(Algorithm::Ca) if self.step != Step::TerminalAuthenticated => {
                debug!(step = self.step.number(), "CA selected before TA");
                return Err(Error::AuthenticationBlocked);
            }
            _ => {}
        }
        self.at = at;
        Ok(status)
    }

    /// GENERAL AUTHENTICATE, dispatched on step and selected mechanism
    pub fn general_authenticate(
        &mut self,
        p1: u8,
        p2: u8,
        data: &[u8],
        secrets: &mut Secrets,
    ) -> Result<Bytes> {
        if (p1, p2) != (0x00, 0x00) {
            return Err(Error::IncorrectParameters);
        }
        match (self.step, self.at.algorithm()) {
            (Step::Start, Some(Algorithm::Pace)) => self.pace_start(data, secrets),
            (Step::Mapping, Some(Algorithm::Pace)) => self.pace_map(data),
            (Step::KeyAgreement, Some(Algorithm::Pace)) => self.pace_key_agreement(data),
            (Step::MutualAuthentication, Some(Algorithm::Pace)) => {
                self.pace_mutual_authentication(data, secrets)
            }
            (Step::TerminalAuthenticated, Some(Algorithm::Ca)) => self.chip_authentication(data),
            (step, algorithm) => {
                debug!(step = step.number(), ?algorithm, "No GENERAL AUTHENTICATE expected");
                Err(Error::IncorrectParameters)
            }
        }
    }

    /// Switch to the chip authentication keys once the CA response was sent
    ///
    /// Returns whether a switch happened.
    pub fn activate_pending_keys(&mut self) -> Result<bool> {
        if !self.ca_keys_pending {
            return Ok(false);
        }
        self.ca_keys_pending = false;
        self.context_mut()?.set_encryption(EacId::Ca)?;
        self.encryption = Some(EacId::Ca);
        self.ssc = 0;
        info!("Secure messaging switched to chip authentication keys");
        Ok(true)
    }
}

#[cfg(test)]
impl<P: EacProvider> SecurityEnvironment<P> {
    pub(crate) const fn set_step(&mut self, step: Step) {
        self.step = step;
    }

    pub(crate) const fn set_ssc(&mut self, ssc: u64) {
        self.ssc = ssc;
    }
}

impl<P: EacProvider + Default> Default for SecurityEnvironment<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: EacProvider> fmt::Debug for SecurityEnvironment<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityEnvironment")
            .field("at", &self.at)
            .field("dst", &self.dst)
            .field("step", &self.step)
            .field("context", &self.context.is_some())
            .field("secret", &self.secret.is_some())
            .field("pace_credential", &self.pace_credential)
            .field("ssc", &self.ssc)
            .field("encryption", &self.encryption)
            .field("ca_keys_pending", &self.ca_keys_pending)
            .field("response_authentication", &self.response_authentication)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::mock::{self, MockProvider};
    use crate::constants::oid;
    use crate::tlv::{dynamic_authentication_data, pack_dynamic_authentication_data, wrap};

    pub(crate) fn pace_template(credential: CredentialSelector) -> Vec<u8> {
        let mut data = wrap(&[0x80], oid::PACE_ECDH_GM_AES_CBC_CMAC_128);
        data.extend(wrap(&[0x83], &[credential.reference()]));
        data
    }

    fn ga(objects: &[(u8, &[u8])]) -> Bytes {
        pack_dynamic_authentication_data(objects).unwrap()
    }

    /// Run PACE to step 4 against the mock backend
    pub(crate) fn establish(
        se: &mut SecurityEnvironment<MockProvider>,
        secrets: &mut Secrets,
        credential: CredentialSelector,
    ) {
        se.manage_security_environment(0xC1, 0xA4, &pace_template(credential), secrets)
            .unwrap();
        se.general_authenticate(0, 0, &ga(&[]), secrets).unwrap();
        se.general_authenticate(0, 0, &ga(&[(0x81, &[0x04, 0x09])]), secrets)
            .unwrap();
        se.general_authenticate(0, 0, &ga(&[(0x83, &[0x04, 0x0A])]), secrets)
            .unwrap();
        se.general_authenticate(0, 0, &ga(&[(0x85, &mock::TERMINAL_TOKEN)]), secrets)
            .unwrap();
    }

    #[test]
    fn test_pace_reaches_step_four() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();

        se.manage_security_environment(0xC1, 0xA4, &pace_template(CredentialSelector::Can), &secrets)
            .unwrap();
        let nonce = se.general_authenticate(0, 0, &ga(&[]), &mut secrets).unwrap();
        assert_eq!(
            dynamic_authentication_data(&nonce).unwrap(),
            vec![(0x80, Bytes::from_static(&mock::ENCRYPTED_NONCE))]
        );
        assert_eq!(se.step(), Step::Mapping);

        let mapping = se
            .general_authenticate(0, 0, &ga(&[(0x81, &[0x04, 0x09])]), &mut secrets)
            .unwrap();
        assert_eq!(
            dynamic_authentication_data(&mapping).unwrap(),
            vec![(0x82, Bytes::from_static(&mock::MAPPING_DATA))]
        );

        let key = se
            .general_authenticate(0, 0, &ga(&[(0x83, &[0x04, 0x0A])]), &mut secrets)
            .unwrap();
        assert_eq!(
            dynamic_authentication_data(&key).unwrap(),
            vec![(0x84, Bytes::from_static(&mock::EPHEMERAL_KEY))]
        );

        let token = se
            .general_authenticate(0, 0, &ga(&[(0x85, &mock::TERMINAL_TOKEN)]), &mut secrets)
            .unwrap();
        assert_eq!(
            dynamic_authentication_data(&token).unwrap(),
            vec![
                (0x86, Bytes::from_static(&mock::CHIP_TOKEN)),
                (0x87, Bytes::from_static(DEFAULT_CA_REFERENCE.as_bytes())),
            ]
        );
        assert_eq!(se.step(), Step::PaceEstablished);
        assert_eq!(se.ssc(), 0);
        assert_eq!(se.encryption(), Some(EacId::Pace));
        assert_eq!(se.pace_credential(), Some(CredentialSelector::Can));
        assert_eq!(se.authentication_template().algorithm(), Some(Algorithm::Ta));
        assert_eq!(
            se.context().unwrap().trust_reference.as_deref(),
            Some(DEFAULT_CA_REFERENCE.as_bytes())
        );
    }

    #[test]
    fn test_general_authenticate_rejects_parameters() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();
        se.manage_security_environment(0xC1, 0xA4, &pace_template(CredentialSelector::Can), &secrets)
            .unwrap();
        assert!(matches!(
            se.general_authenticate(0, 1, &ga(&[]), &mut secrets),
            Err(Error::IncorrectParameters)
        ));
        // step 0 only accepts the empty nonce request
        assert!(matches!(
            se.general_authenticate(0, 0, &ga(&[(0x85, &mock::TERMINAL_TOKEN)]), &mut secrets),
            Err(Error::TryAgain)
        ));
        assert_eq!(se.step(), Step::Start);
    }

    #[test]
    fn test_nothing_selected() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();
        assert!(matches!(
            se.general_authenticate(0, 0, &ga(&[]), &mut secrets),
            Err(Error::IncorrectParameters)
        ));
    }

    #[test]
    fn test_manage_security_environment_rejects_p1p2() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let secrets = Secrets::default();
        let template = pace_template(CredentialSelector::Can);
        assert!(matches!(
            se.manage_security_environment(0xC2, 0xA4, &template, &secrets),
            Err(Error::IncorrectP1P2)
        ));
        assert!(matches!(
            se.manage_security_environment(0xC1, 0xAA, &template, &secrets),
            Err(Error::IncorrectP1P2)
        ));
    }

    #[test]
    fn test_ta_and_ca_need_previous_protocols() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();

        let mut ta = wrap(&[0x80], oid::TA_ECDSA_SHA_256);
        ta.extend(wrap(&[0x83], b"DETESTterm00001"));
        let mut ca = wrap(&[0x80], oid::CA_ECDH_AES_CBC_CMAC_128);
        ca.extend(wrap(&[0x84], &[13]));

        assert!(matches!(
            se.manage_security_environment(0x81, 0xA4, &ta, &secrets),
            Err(Error::AuthenticationBlocked)
        ));

        establish(&mut se, &mut secrets, CredentialSelector::Can);
        assert!(matches!(
            se.manage_security_environment(0x41, 0xA4, &ca, &secrets),
            Err(Error::AuthenticationBlocked)
        ));
        assert!(se.manage_security_environment(0x81, 0xA4, &ta, &secrets).is_ok());
    }

    #[test]
    fn test_new_template_drops_stale_objects() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();
        establish(&mut se, &mut secrets, CredentialSelector::Can);

        let mut ta = wrap(&[0x80], oid::TA_ECDSA_SHA_256);
        ta.extend(wrap(&[0x83], b"DETESTterm00001"));
        let mut with_objects = ta.clone();
        with_objects.extend(
            hex::decode("67177315060904007F00070301040253083230323631303138").unwrap(),
        );
        with_objects.extend(wrap(&[0x91], &[0x04, 0x0B]));
        with_objects.extend(hex::decode("7F4C0E060904007F000703010202530103").unwrap());

        se.manage_security_environment(0x81, 0xA4, &with_objects, &secrets)
            .unwrap();
        let at = se.authentication_template();
        assert_eq!(at.auxiliary_data().map(|aux| aux[0]), Some(0x67));
        assert_eq!(at.ephemeral_public_key(), Some(&[0x04, 0x0B][..]));
        assert!(at.chat().is_some());

        se.manage_security_environment(0x81, 0xA4, &ta, &secrets)
            .unwrap();
        let at = se.authentication_template();
        assert_eq!(at.algorithm(), Some(Algorithm::Ta));
        assert_eq!(at.auxiliary_data(), None);
        assert_eq!(at.ephemeral_public_key(), None);
        assert_eq!(at.chat(), None);
    }

    #[test]
    fn test_abort_releases_state() {
        let mut se = SecurityEnvironment::new(MockProvider::default());
        let mut secrets = Secrets::default();
        establish(&mut se, &mut secrets, CredentialSelector::Can);
        assert!(se.has_session());

        se.abort();
        assert!(!se.has_session());
        assert_eq!(se.step(), Step::Start);
        assert_eq!(se.pace_credential(), None);
        assert!(se.context().is_err());
    }
}
