//! Chip authentication

use bytes::Bytes;
use tracing::debug;

use super::SecurityEnvironment;
use crate::{
    Result,
    backend::{EacContext, EacProvider},
    constants::tags,
    tlv::{pack_dynamic_authentication_data, single_object, unpack_dynamic_authentication_data},
};

impl<P: EacProvider> SecurityEnvironment<P> {
    /// GENERAL AUTHENTICATE at step 5: answer with nonce and token
    ///
    /// The new keys stay pending until [`Self::activate_pending_keys`], so this
    /// response still travels under the PACE keys.
    pub(super) fn chip_authentication(&mut self, data: &[u8]) -> Result<Bytes> {
        let objects = unpack_dynamic_authentication_data(data)?;
        let terminal_key = single_object(&objects, tags::CA_EPHEMERAL_KEY_TERMINAL)?;
        let context = self.context_mut()?;
        context.ca_shared_secret(&terminal_key)?;
        let (nonce, token) = context.ca_derive_keys(&terminal_key)?;

        self.ca_keys_pending = true;
        debug!("Chip authentication keys derived");
        pack_dynamic_authentication_data(&[
            (tags::CA_NONCE, &nonce[..]),
            (tags::CA_TOKEN, &token[..]),
        ])
    }
}
