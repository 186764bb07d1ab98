//! Deterministic backend for unit tests

use std::{cell::Cell, rc::Rc};

use bytes::Bytes;

use super::{CryptoError, EacContext, EacId, EacProvider};
use crate::crt::CredentialSelector;

pub(crate) const ENCRYPTED_NONCE: [u8; 16] = [0xE0; 16];
pub(crate) const MAPPING_DATA: [u8; 3] = [0x04, 0x01, 0x01];
pub(crate) const EPHEMERAL_KEY: [u8; 3] = [0x04, 0x02, 0x02];
pub(crate) const TERMINAL_TOKEN: [u8; 8] = [0x85; 8];
pub(crate) const CHIP_TOKEN: [u8; 8] = [0x86; 8];
pub(crate) const TA_NONCE: [u8; 8] = [0x11; 8];
pub(crate) const TA_SIGNATURE: [u8; 64] = [0x5A; 64];
pub(crate) const CA_NONCE: [u8; 8] = [0xCA; 8];
pub(crate) const CA_TOKEN: [u8; 8] = [0xCB; 8];

#[derive(Debug, Clone, Default)]
pub(crate) struct MockProvider {
    pub(crate) fail_ephemeral_key: bool,
    pub(crate) fail_certificate: bool,
    pub(crate) contexts: Rc<Cell<usize>>,
    pub(crate) key_derivations: Rc<Cell<usize>>,
}

#[derive(Debug)]
pub(crate) struct MockSecret;

#[derive(Debug, Default)]
pub(crate) struct MockContext {
    fail_ephemeral_key: bool,
    fail_certificate: bool,
    pace_keys: bool,
    ca_keys: bool,
    encryption: Option<EacId>,
    key_derivations: Rc<Cell<usize>>,
    pub(crate) trust_reference: Option<Bytes>,
}

impl EacProvider for MockProvider {
    type Secret = MockSecret;
    type Context = MockContext;

    fn new_context(&self) -> Result<MockContext, CryptoError> {
        self.contexts.set(self.contexts.get() + 1);
        Ok(MockContext {
            fail_ephemeral_key: self.fail_ephemeral_key,
            fail_certificate: self.fail_certificate,
            key_derivations: Rc::clone(&self.key_derivations),
            ..Default::default()
        })
    }

    fn new_secret(&self, _: &[u8], _: CredentialSelector) -> Result<MockSecret, CryptoError> {
        Ok(MockSecret)
    }
}

impl MockContext {
    fn key_byte(&self) -> Result<u8, CryptoError> {
        match self.encryption {
            Some(EacId::Pace) => Ok(0x50),
            Some(EacId::Ca) => Ok(0xC0),
            None => Err(CryptoError::State("no keys selected")),
        }
    }

    fn xor(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        let key = self.key_byte()? ^ ssc as u8;
        Ok(data.iter().map(|byte| byte ^ key).collect())
    }
}

impl EacContext for MockContext {
    type Secret = MockSecret;

    fn init_ef_card_access(&mut self, ef_card_access: &[u8]) -> Result<(), CryptoError> {
        if ef_card_access.is_empty() {
            return Err(CryptoError::Malformed("EF.CardAccess"));
        }
        Ok(())
    }

    fn init_ca(&mut self, _: &[u8], _: u8) -> Result<(), CryptoError> {
        Ok(())
    }

    fn pace_encrypted_nonce(&mut self, _: &MockSecret) -> Result<Bytes, CryptoError> {
        Ok(Bytes::from_static(&ENCRYPTED_NONCE))
    }

    fn pace_mapping_data(&mut self) -> Result<Bytes, CryptoError> {
        Ok(Bytes::from_static(&MAPPING_DATA))
    }

    fn pace_map_generator(&mut self, mapping_data: &[u8]) -> Result<(), CryptoError> {
        if mapping_data.is_empty() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(())
    }

    fn pace_ephemeral_key(&mut self) -> Result<Bytes, CryptoError> {
        if self.fail_ephemeral_key {
            return Err(CryptoError::State("key generation failed"));
        }
        Ok(Bytes::from_static(&EPHEMERAL_KEY))
    }

    fn pace_shared_secret(&mut self, _: &[u8]) -> Result<(), CryptoError> {
        Ok(())
    }

    fn pace_derive_keys(&mut self) -> Result<(), CryptoError> {
        self.pace_keys = true;
        self.key_derivations.set(self.key_derivations.get() + 1);
        Ok(())
    }

    fn pace_authentication_token(&mut self, _: &[u8]) -> Result<Bytes, CryptoError> {
        Ok(Bytes::from_static(&CHIP_TOKEN))
    }

    fn pace_verify_token(&mut self, token: &[u8]) -> bool {
        token == TERMINAL_TOKEN
    }

    fn set_encryption(&mut self, id: EacId) -> Result<(), CryptoError> {
        let derived = match id {
            EacId::Pace => self.pace_keys,
            EacId::Ca => self.ca_keys,
        };
        if !derived {
            return Err(CryptoError::State("keys not derived"));
        }
        self.encryption = Some(id);
        Ok(())
    }

    fn init_ta(&mut self, car: &[u8]) -> Result<(), CryptoError> {
        self.trust_reference = Some(Bytes::copy_from_slice(car));
        Ok(())
    }

    fn ta_import_certificate(&mut self, _: &[u8]) -> Result<(), CryptoError> {
        if self.fail_certificate {
            return Err(CryptoError::Certificate("unknown certificate authority"));
        }
        Ok(())
    }

    fn ta_nonce(&mut self) -> Result<Bytes, CryptoError> {
        Ok(Bytes::from_static(&TA_NONCE))
    }

    fn ta_verify(&mut self, _: &[u8], _: &[u8], _: Option<&[u8]>, signature: &[u8]) -> bool {
        signature == TA_SIGNATURE
    }

    fn compressed_key(&self, _: EacId, public_key: &[u8]) -> Result<Bytes, CryptoError> {
        Ok(Bytes::copy_from_slice(public_key.get(1..).unwrap_or_default()))
    }

    fn ca_shared_secret(&mut self, terminal_key: &[u8]) -> Result<(), CryptoError> {
        if terminal_key.is_empty() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(())
    }

    fn ca_derive_keys(&mut self, _: &[u8]) -> Result<(Bytes, Bytes), CryptoError> {
        self.ca_keys = true;
        Ok((Bytes::from_static(&CA_NONCE), Bytes::from_static(&CA_TOKEN)))
    }

    fn authenticate(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        let fold = data.iter().fold(self.key_byte()?, |acc, byte| acc.rotate_left(1) ^ byte);
        Ok(ssc.to_be_bytes().iter().map(|byte| byte ^ fold).collect())
    }

    fn encrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        self.xor(ssc, data)
    }

    fn decrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        self.xor(ssc, data)
    }

    fn sign(&self, digest: &[u8]) -> Result<Bytes, CryptoError> {
        self.key_byte()?;
        Ok(Bytes::copy_from_slice(digest))
    }
}
