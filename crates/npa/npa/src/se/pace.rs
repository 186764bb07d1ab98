//! PACE steps 0 to 3

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{SecurityEnvironment, Step};
use crate::{
    Error, Result,
    backend::{CryptoError, EacContext, EacId, EacProvider},
    constants::{CA_KEY_ID, oid, tags},
    crt::Algorithm,
    secrets::Secrets,
    tlv::{pack_dynamic_authentication_data, single_object, unpack_dynamic_authentication_data},
};

impl<P: EacProvider> SecurityEnvironment<P> {
    /// Step 0: answer the empty request with the encrypted nonce
    ///
    /// All checks run before the previous run is aborted, so a rejected request
    /// leaves the card untouched.
    pub(super) fn pace_start(&mut self, data: &[u8], secrets: &mut Secrets) -> Result<Bytes> {
        if !unpack_dynamic_authentication_data(data)?.is_empty() {
            debug!("PACE nonce request carries data");
            return Err(Error::TryAgain);
        }
        let credential = self.at.credential().ok_or(Error::IncorrectParameters)?;
        secrets.check_attempt(credential)?;

        self.abort();
        let mut context = self.provider.new_context()?;
        let secret = self
            .provider
            .new_secret(secrets.password(credential), credential)?;
        secrets.consume_attempt(credential);

        context.init_ef_card_access(&self.ef_card_access)?;
        context.init_ca(oid::CA_ECDH_AES_CBC_CMAC_128, CA_KEY_ID)?;
        let nonce = context.pace_encrypted_nonce(&secret)?;

        self.context = Some(context);
        self.secret = Some(secret);
        self.step = Step::Mapping;
        debug!(%credential, "PACE started");
        pack_dynamic_authentication_data(&[(tags::ENCRYPTED_NONCE, &nonce[..])])
    }

    /// Step 1: map the generator
    pub(super) fn pace_map(&mut self, data: &[u8]) -> Result<Bytes> {
        let objects = unpack_dynamic_authentication_data(data)?;
        let terminal_mapping_data = single_object(&objects, tags::MAPPING_DATA_TERMINAL)?;
        let context = self.context_mut()?;
        let mapping_data = context.pace_mapping_data()?;
        context.pace_map_generator(&terminal_mapping_data)?;

        self.step = Step::KeyAgreement;
        pack_dynamic_authentication_data(&[(tags::MAPPING_DATA_CHIP, &mapping_data[..])])
    }

    /// Step 2: exchange ephemeral keys and agree on the shared secret
    pub(super) fn pace_key_agreement(&mut self, data: &[u8]) -> Result<Bytes> {
        let objects = unpack_dynamic_authentication_data(data)?;
        let terminal_key = single_object(&objects, tags::EPHEMERAL_KEY_TERMINAL)?;
        let context = self.context_mut()?;
        let chip_key = context.pace_ephemeral_key().map_err(|error| {
            warn!(%error, "Ephemeral key generation failed");
            Error::TryAgain
        })?;
        context.pace_shared_secret(&terminal_key)?;

        self.terminal_ephemeral_key = Some(terminal_key);
        self.chip_ephemeral_key = Some(chip_key.clone());
        self.step = Step::MutualAuthentication;
        pack_dynamic_authentication_data(&[(tags::EPHEMERAL_KEY_CHIP, &chip_key[..])])
    }

    /// Step 3: exchange tokens and open secure messaging
    pub(super) fn pace_mutual_authentication(
        &mut self,
        data: &[u8],
        secrets: &mut Secrets,
    ) -> Result<Bytes> {
        let objects = unpack_dynamic_authentication_data(data)?;
        let credential = self.at.credential().ok_or(Error::IncorrectParameters)?;
        let terminal_key = self
            .terminal_ephemeral_key
            .clone()
            .ok_or(CryptoError::State("no terminal ephemeral key"))?;
        let context = self
            .context
            .as_mut()
            .ok_or(CryptoError::State("no EAC context"))?;

        let terminal_token = single_object(&objects, tags::TOKEN_TERMINAL)?;
        context.pace_derive_keys()?;
        let token = context.pace_authentication_token(&terminal_key)?;
        if !context.pace_verify_token(&terminal_token) {
            warn!(%credential, "PACE token verification failed");
            return Err(Error::TryAgain);
        }
        context.set_encryption(EacId::Pace)?;
        context.init_ta(&self.ca_reference)?;

        secrets.pace_established(credential);
        self.at.set_algorithm(Algorithm::Ta);
        self.encryption = Some(EacId::Pace);
        self.pace_credential = Some(credential);
        self.ssc = 0;
        self.step = Step::PaceEstablished;
        info!(%credential, "PACE established");

        pack_dynamic_authentication_data(&[
            (tags::TOKEN_CHIP, &token[..]),
            (tags::CA_REFERENCE, &self.ca_reference[..]),
        ])
    }
}
