//! Software EAC backend on NIST P-256 with AES-128
//!
//! Implements PACE with the generic mapping, terminal authentication with
//! ECDSA-SHA-256 and chip authentication with ECDH, all for the protocols of
//! [`oid`]. The [`terminal`] module holds the matching terminal side.

mod crypto;
mod cvc;
pub mod terminal;

use std::fmt;

use bytes::Bytes;
use iso7816_tlv::ber::Tlv;
use p256::{
    NonZeroScalar, ProjectivePoint, PublicKey, Scalar, SecretKey,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Verifier, hazmat::PrehashSigner},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use self::{
    crypto::{
        Key, SessionKeys, cbc_encrypt, decode_point, encode_point, password_key, random_bytes,
        random_scalar, scalar_from_nonce, shared_secret, x_coordinate,
    },
    cvc::CvCertificate,
};
use super::{CryptoError, EacContext, EacId, EacProvider};
use crate::{
    config::{CardConfig, ConfigError},
    constants::{oid, tags},
    crt::CredentialSelector,
    tlv::{constructed, find, has_tag, primitive},
};

/// Length of the PACE nonce
const NONCE_LENGTH: usize = 16;
/// Length of the TA challenge and the CA nonce
const CHALLENGE_LENGTH: usize = 8;

/// Creates software contexts sharing one static chip authentication key
#[derive(Clone)]
pub struct SoftProvider {
    chip_authentication_key: SecretKey,
}

impl SoftProvider {
    /// Provider with a random chip authentication key
    pub fn new() -> Self {
        Self {
            chip_authentication_key: SecretKey::random(&mut rand_v8::thread_rng()),
        }
    }

    /// Provider with the given chip authentication key (a P-256 scalar)
    pub fn with_chip_authentication_key(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            chip_authentication_key: SecretKey::from_slice(key)
                .map_err(|_| CryptoError::KeyLength)?,
        })
    }

    /// Provider for a card profile
    pub fn from_config(config: &CardConfig) -> Result<Self, ConfigError> {
        match config.chip_authentication_key()? {
            Some(key) => Ok(Self::with_chip_authentication_key(&key)?),
            None => Ok(Self::new()),
        }
    }

    /// The static chip authentication public key, uncompressed
    pub fn chip_authentication_public_key(&self) -> Bytes {
        let point = self.chip_authentication_key.public_key().to_encoded_point(false);
        Bytes::copy_from_slice(point.as_bytes())
    }
}

impl Default for SoftProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoftProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftProvider")
            .field(
                "chip_authentication_public_key",
                &hex::encode(self.chip_authentication_public_key()),
            )
            .finish()
    }
}

impl EacProvider for SoftProvider {
    type Secret = SoftSecret;
    type Context = SoftContext;

    fn new_context(&self) -> Result<SoftContext, CryptoError> {
        Ok(SoftContext::new(self.chip_authentication_key.clone()))
    }

    fn new_secret(
        &self,
        password: &[u8],
        credential: CredentialSelector,
    ) -> Result<SoftSecret, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::KeyLength);
        }
        Ok(SoftSecret {
            key: password_key(password, credential == CredentialSelector::Mrz),
        })
    }
}

/// The PACE password key K_pi
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SoftSecret {
    key: Key,
}

impl fmt::Debug for SoftSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SoftSecret(..)")
    }
}

/// Protocol state of one EAC run
pub struct SoftContext {
    chip_authentication_key: SecretKey,

    // PACE
    pace_protocol: Option<Bytes>,
    nonce: Option<Scalar>,
    mapping_key: Option<NonZeroScalar>,
    generator: Option<ProjectivePoint>,
    ephemeral_key: Option<NonZeroScalar>,
    ephemeral_public_key: Option<Bytes>,
    pace_secret: Option<Bytes>,
    pace_keys: Option<SessionKeys>,

    // TA
    trust_reference: Option<Bytes>,
    certificate_key: Option<Bytes>,
    challenge: Option<[u8; CHALLENGE_LENGTH]>,
    terminal_compressed_key: Option<Bytes>,

    // CA
    ca_protocol: Option<Bytes>,
    ca_secret: Option<Bytes>,
    ca_keys: Option<SessionKeys>,

    encryption: Option<EacId>,
}

impl SoftContext {
    fn new(chip_authentication_key: SecretKey) -> Self {
        Self {
            chip_authentication_key,
            pace_protocol: None,
            nonce: None,
            mapping_key: None,
            generator: None,
            ephemeral_key: None,
            ephemeral_public_key: None,
            pace_secret: None,
            pace_keys: None,
            trust_reference: None,
            certificate_key: None,
            challenge: None,
            terminal_compressed_key: None,
            ca_protocol: None,
            ca_secret: None,
            ca_keys: None,
            encryption: None,
        }
    }

    fn pace_protocol(&self) -> Result<&[u8], CryptoError> {
        self.pace_protocol
            .as_deref()
            .ok_or(CryptoError::State("EF.CardAccess not initialized"))
    }

    fn pace_keys(&self) -> Result<&SessionKeys, CryptoError> {
        self.pace_keys
            .as_ref()
            .ok_or(CryptoError::State("PACE keys not derived"))
    }

    fn session_keys(&self) -> Result<&SessionKeys, CryptoError> {
        match self.encryption {
            Some(EacId::Pace) => self.pace_keys(),
            Some(EacId::Ca) => self
                .ca_keys
                .as_ref()
                .ok_or(CryptoError::State("CA keys not derived")),
            None => Err(CryptoError::State("no secure messaging keys selected")),
        }
    }
}

impl fmt::Debug for SoftContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftContext")
            .field("pace_keys", &self.pace_keys.is_some())
            .field("trust_reference", &self.trust_reference)
            .field("ca_keys", &self.ca_keys.is_some())
            .field("encryption", &self.encryption)
            .finish_non_exhaustive()
    }
}

/// Find the PACEInfo in EF.CardAccess, returning protocol and parameter id
fn pace_info(ef_card_access: &[u8]) -> Result<(Bytes, Option<u8>), CryptoError> {
    let malformed = |_: crate::Error| CryptoError::Malformed("EF.CardAccess");

    let set =
        Tlv::from_bytes(ef_card_access).map_err(|_| CryptoError::Malformed("EF.CardAccess"))?;
    for info in constructed(&set).map_err(malformed)? {
        let Ok(fields) = constructed(info) else {
            continue;
        };
        let Some(protocol) = find(fields, &[tags::OBJECT_IDENTIFIER]) else {
            continue;
        };
        let protocol = primitive(protocol).map_err(malformed)?;
        if !protocol.starts_with(oid::PACE) || protocol.len() <= oid::PACE.len() {
            continue;
        }

        // version followed by the optional parameter id, both INTEGER
        let parameter_id = fields
            .iter()
            .filter(|tlv| has_tag(tlv, &[0x02]))
            .nth(1)
            .map(primitive)
            .transpose()
            .map_err(malformed)?
            .and_then(|value| value.last().copied());
        return Ok((Bytes::copy_from_slice(protocol), parameter_id));
    }
    Err(CryptoError::Malformed("EF.CardAccess without PACEInfo"))
}

impl EacContext for SoftContext {
    type Secret = SoftSecret;

    fn init_ef_card_access(&mut self, ef_card_access: &[u8]) -> Result<(), CryptoError> {
        let (protocol, parameter_id) = pace_info(ef_card_access)?;
        if protocol != oid::PACE_ECDH_GM_AES_CBC_CMAC_128 {
            return Err(CryptoError::Unsupported("PACE protocol"));
        }
        if parameter_id != Some(oid::PARAMETER_ID_P256) {
            return Err(CryptoError::Unsupported("PACE domain parameters"));
        }
        trace!(protocol = %hex::encode(&protocol), "Selected PACE parameters");
        self.pace_protocol = Some(protocol);
        Ok(())
    }

    fn init_ca(&mut self, protocol: &[u8], key_id: u8) -> Result<(), CryptoError> {
        if protocol != oid::CA_ECDH_AES_CBC_CMAC_128 {
            return Err(CryptoError::Unsupported("CA protocol"));
        }
        trace!(key_id, "Selected chip authentication key");
        self.ca_protocol = Some(Bytes::copy_from_slice(protocol));
        Ok(())
    }

    fn pace_encrypted_nonce(&mut self, secret: &SoftSecret) -> Result<Bytes, CryptoError> {
        self.pace_protocol()?;
        let mut nonce = random_bytes::<NONCE_LENGTH>();
        let encrypted = cbc_encrypt(&secret.key, &[0u8; 16], &nonce);
        self.nonce = Some(scalar_from_nonce(&nonce)?);
        nonce.zeroize();
        Ok(encrypted?.into())
    }

    fn pace_mapping_data(&mut self) -> Result<Bytes, CryptoError> {
        let key = random_scalar();
        let mapping_data = encode_point(&(ProjectivePoint::GENERATOR * *key))?;
        self.mapping_key = Some(key);
        Ok(mapping_data)
    }

    fn pace_map_generator(&mut self, mapping_data: &[u8]) -> Result<(), CryptoError> {
        let nonce = self.nonce.ok_or(CryptoError::State("no PACE nonce"))?;
        let key = self.mapping_key.ok_or(CryptoError::State("no mapping key"))?;

        let shared = decode_point(mapping_data)? * *key;
        if shared == ProjectivePoint::IDENTITY {
            return Err(CryptoError::InvalidPublicKey);
        }
        let generator = ProjectivePoint::GENERATOR * nonce + shared;
        if generator == ProjectivePoint::IDENTITY {
            return Err(CryptoError::InvalidPublicKey);
        }
        self.generator = Some(generator);
        Ok(())
    }

    fn pace_ephemeral_key(&mut self) -> Result<Bytes, CryptoError> {
        let generator = self.generator.ok_or(CryptoError::State("generator not mapped"))?;
        let key = random_scalar();
        let public_key = encode_point(&(generator * *key))?;
        self.ephemeral_key = Some(key);
        self.ephemeral_public_key = Some(public_key.clone());
        Ok(public_key)
    }

    fn pace_shared_secret(&mut self, terminal_key: &[u8]) -> Result<(), CryptoError> {
        let key = self.ephemeral_key.ok_or(CryptoError::State("no ephemeral key"))?;
        if self.ephemeral_public_key.as_deref() == Some(terminal_key) {
            return Err(CryptoError::InvalidPublicKey);
        }
        self.pace_secret = Some(shared_secret(&key, terminal_key)?);
        Ok(())
    }

    fn pace_derive_keys(&mut self) -> Result<(), CryptoError> {
        let secret = self
            .pace_secret
            .as_ref()
            .ok_or(CryptoError::State("no PACE shared secret"))?;
        self.pace_keys = Some(SessionKeys::derive(secret, &[]));
        Ok(())
    }

    fn pace_authentication_token(&mut self, terminal_key: &[u8]) -> Result<Bytes, CryptoError> {
        self.pace_keys()?.token(self.pace_protocol()?, terminal_key)
    }

    fn pace_verify_token(&mut self, token: &[u8]) -> bool {
        match (self.pace_keys(), self.pace_protocol(), &self.ephemeral_public_key) {
            (Ok(keys), Ok(protocol), Some(public_key)) => {
                keys.verify_token(protocol, public_key, token)
            }
            _ => false,
        }
    }

    fn set_encryption(&mut self, id: EacId) -> Result<(), CryptoError> {
        match id {
            EacId::Pace => self.pace_keys()?,
            EacId::Ca => self
                .ca_keys
                .as_ref()
                .ok_or(CryptoError::State("CA keys not derived"))?,
        };
        debug!(%id, "Selected secure messaging keys");
        self.encryption = Some(id);
        Ok(())
    }

    fn init_ta(&mut self, car: &[u8]) -> Result<(), CryptoError> {
        self.trust_reference = Some(Bytes::copy_from_slice(car));
        self.certificate_key = None;
        self.challenge = None;
        self.terminal_compressed_key = None;
        Ok(())
    }

    fn ta_import_certificate(&mut self, certificate: &[u8]) -> Result<(), CryptoError> {
        let certificate = CvCertificate::parse(certificate)?;
        if self.trust_reference.as_ref() != Some(&certificate.car) {
            return Err(CryptoError::Certificate("unknown certificate authority"));
        }
        if certificate.protocol != oid::TA_ECDSA_SHA_256 {
            return Err(CryptoError::Unsupported("TA protocol"));
        }
        PublicKey::from_sec1_bytes(&certificate.public_point)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        debug!(
            car = %String::from_utf8_lossy(&certificate.car),
            chr = %String::from_utf8_lossy(&certificate.chr),
            "Imported certificate"
        );
        self.trust_reference = Some(certificate.chr);
        self.certificate_key = Some(certificate.public_point);
        Ok(())
    }

    fn ta_nonce(&mut self) -> Result<Bytes, CryptoError> {
        let challenge = random_bytes::<CHALLENGE_LENGTH>();
        self.challenge = Some(challenge);
        Ok(Bytes::copy_from_slice(&challenge))
    }

    fn ta_verify(
        &mut self,
        terminal_key: &[u8],
        id_picc: &[u8],
        auxiliary_data: Option<&[u8]>,
        signature: &[u8],
    ) -> bool {
        let (Some(key), Some(challenge)) = (&self.certificate_key, &self.challenge) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };

        let mut message = id_picc.to_vec();
        message.extend_from_slice(challenge);
        message.extend_from_slice(terminal_key);
        message.extend_from_slice(auxiliary_data.unwrap_or_default());
        if verifying_key.verify(&message, &signature).is_err() {
            return false;
        }

        // a challenge is good for one signature
        self.challenge = None;
        self.terminal_compressed_key = Some(Bytes::copy_from_slice(terminal_key));
        true
    }

    fn compressed_key(&self, _id: EacId, public_key: &[u8]) -> Result<Bytes, CryptoError> {
        x_coordinate(&decode_point(public_key)?)
    }

    fn ca_shared_secret(&mut self, terminal_key: &[u8]) -> Result<(), CryptoError> {
        if self.ca_protocol.is_none() {
            return Err(CryptoError::State("CA not initialized"));
        }
        let point = decode_point(terminal_key)?;
        if let Some(expected) = &self.terminal_compressed_key {
            if &x_coordinate(&point)? != expected {
                return Err(CryptoError::InvalidPublicKey);
            }
        }
        let key = self.chip_authentication_key.to_nonzero_scalar();
        self.ca_secret = Some(shared_secret(&key, terminal_key)?);
        Ok(())
    }

    fn ca_derive_keys(&mut self, terminal_key: &[u8]) -> Result<(Bytes, Bytes), CryptoError> {
        let secret = self
            .ca_secret
            .as_ref()
            .ok_or(CryptoError::State("no CA shared secret"))?;
        let protocol = self
            .ca_protocol
            .as_ref()
            .ok_or(CryptoError::State("CA not initialized"))?;

        let nonce = random_bytes::<CHALLENGE_LENGTH>();
        let keys = SessionKeys::derive(secret, &nonce);
        let token = keys.token(protocol, terminal_key)?;
        self.ca_keys = Some(keys);
        Ok((Bytes::copy_from_slice(&nonce), token))
    }

    fn authenticate(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        self.session_keys()?.authenticate(ssc, data)
    }

    fn encrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        self.session_keys()?.encrypt(ssc, data)
    }

    fn decrypt(&self, ssc: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        self.session_keys()?.decrypt(ssc, data)
    }

    fn sign(&self, digest: &[u8]) -> Result<Bytes, CryptoError> {
        let key = SigningKey::from(&self.chip_authentication_key);
        let signature: Signature = key
            .sign_prehash(digest)
            .map_err(|_| CryptoError::Signature)?;
        Ok(Bytes::copy_from_slice(&signature.to_bytes()))
    }
}
