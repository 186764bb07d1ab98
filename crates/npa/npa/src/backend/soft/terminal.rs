//! Terminal side of EAC
//!
//! A software PCD that walks a card through PACE, terminal authentication and chip
//! authentication, and then talks to it over secure messaging. The simulator and the
//! integration tests drive the card with it.
//!
//! Every method builds the next command or consumes the card's answer; sending
//! is left to the caller:
//!
//! ```no_run
//! # use vnpa::{CredentialSelector, Sam, SoftProvider, Terminal};
//! # fn main() -> vnpa::Result<()> {
//! let mut sam = Sam::new(SoftProvider::new(), Default::default());
//! let mut terminal = Terminal::new(CredentialSelector::Can, b"500540");
//!
//! sam.process_command(&terminal.set_pace_template());
//! let response = sam.process_command(&terminal.pace_start()?);
//! let response = sam.process_command(&terminal.pace_map(response.payload())?);
//! let response = sam.process_command(&terminal.pace_key_agreement(response.payload())?);
//! let response = sam.process_command(&terminal.pace_mutual_authentication(response.payload())?);
//! terminal.pace_finish(response.payload())?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use bytes::Bytes;
use p256::{
    NonZeroScalar, ProjectivePoint, Scalar,
    ecdsa::{Signature, SigningKey, signature::Signer},
};
use tracing::{debug, trace};
use vnpa_apdu_core::{Command, Response, StatusWord};

use super::{
    crypto::{
        Key, SessionKeys, cbc_decrypt, decode_point, encode_point, password_key, random_scalar,
        scalar_from_nonce, shared_secret, x_coordinate,
    },
    cvc::CvCertificate,
};
use crate::{
    Error, Result,
    backend::CryptoError,
    constants::{CA_KEY_ID, PSO_VERIFY_CERTIFICATE, SM_BLOCK_LENGTH, cla, ins, mse, oid, sm, tags},
    crt::CredentialSelector,
    se::sm::{pad, unpad},
    tlv::{
        dynamic_authentication_data, pack_dynamic_authentication_data, parse_raw_objects,
        primitive, wrap,
    },
};

/// Holder reference of the document verifier certificate
pub const DV_REFERENCE: &[u8] = b"DEDVeIDDTR00001";
/// Holder reference of the terminal certificate
pub const TERMINAL_REFERENCE: &[u8] = b"DETESTterm00001";

/// P1 of MSE:SET for mutual authentication (PACE)
const MSE_SET_MUTUAL: u8 = 0xC1;
/// P1 of MSE:SET for external authentication (TA) and signature verification
const MSE_SET_EXTERNAL: u8 = 0x81;
/// P1 of MSE:SET for internal authentication (CA)
const MSE_SET_INTERNAL: u8 = 0x41;

fn state(what: &'static str) -> Error {
    Error::Crypto(CryptoError::State(what))
}

/// Value of the object with `tag` in a GENERAL AUTHENTICATE response
fn response_object(response: &[u8], tag: u8) -> Result<Bytes> {
    dynamic_authentication_data(response)?
        .into_iter()
        .find_map(|(t, value)| (t == tag).then_some(value))
        .ok_or(Error::IncorrectParameters)
}

fn general_authenticate(chained: bool, objects: &[(u8, &[u8])]) -> Result<Command> {
    let class = if chained { cla::CHAINING } else { cla::PLAIN };
    Ok(Command::new_with_data(
        class,
        ins::GENERAL_AUTHENTICATE,
        0x00,
        0x00,
        pack_dynamic_authentication_data(objects)?,
    )
    .with_le(256))
}

fn public_point(key: &SigningKey) -> Bytes {
    Bytes::copy_from_slice(key.verifying_key().to_encoded_point(false).as_bytes())
}

/// Encode Ne for the 0x97 object
fn encode_le(le: u32) -> Vec<u8> {
    match le {
        1..=255 => vec![le as u8],
        256 => vec![0x00],
        65536 => vec![0x00, 0x00],
        _ => (le as u16).to_be_bytes().to_vec(),
    }
}

/// Software inspection system
pub struct Terminal {
    credential: CredentialSelector,
    password_key: Key,

    nonce: Option<Scalar>,
    mapping_key: Option<NonZeroScalar>,
    ephemeral_key: Option<NonZeroScalar>,
    ephemeral_public_key: Option<Bytes>,
    chip_ephemeral_key: Option<Bytes>,
    pending_keys: Option<SessionKeys>,
    keys: Option<SessionKeys>,
    ssc: u64,
    ca_reference: Option<Bytes>,

    cvca_key: SigningKey,
    dv_key: SigningKey,
    terminal_key: SigningKey,
    auxiliary_data: Option<Bytes>,

    ca_key: NonZeroScalar,
}

impl Terminal {
    /// Terminal knowing the password of one credential
    pub fn new(credential: CredentialSelector, password: &[u8]) -> Self {
        let mut rng = rand_v8::thread_rng();
        Self {
            credential,
            password_key: password_key(password, credential == CredentialSelector::Mrz),
            nonce: None,
            mapping_key: None,
            ephemeral_key: None,
            ephemeral_public_key: None,
            chip_ephemeral_key: None,
            pending_keys: None,
            keys: None,
            ssc: 0,
            ca_reference: None,
            cvca_key: SigningKey::random(&mut rng),
            dv_key: SigningKey::random(&mut rng),
            terminal_key: SigningKey::random(&mut rng),
            auxiliary_data: None,
            ca_key: random_scalar(),
        }
    }

    /// Send auxiliary data (an encoded 0x67 object) with terminal authentication
    pub fn with_auxiliary_data(mut self, auxiliary_data: impl Into<Bytes>) -> Self {
        self.auxiliary_data = Some(auxiliary_data.into());
        self
    }

    /// Send sequence counter
    pub const fn ssc(&self) -> u64 {
        self.ssc
    }

    /// Whether secure messaging keys are in place
    pub const fn is_established(&self) -> bool {
        self.keys.is_some()
    }

    /// Certificate authority reference announced by the card
    pub fn ca_reference(&self) -> Option<&[u8]> {
        self.ca_reference.as_deref()
    }

    // PACE

    /// MSE:SET AT selecting PACE with the terminal's credential
    pub fn set_pace_template(&self) -> Command {
        let mut data = wrap(&[tags::CRYPTOGRAPHIC_MECHANISM], oid::PACE_ECDH_GM_AES_CBC_CMAC_128);
        data.extend(wrap(&[tags::PUBLIC_KEY_REFERENCE], &[self.credential.reference()]));
        Command::new_with_data(
            cla::PLAIN,
            ins::MANAGE_SECURITY_ENVIRONMENT,
            MSE_SET_MUTUAL,
            mse::AUTHENTICATION_TEMPLATE,
            data,
        )
    }

    /// First GENERAL AUTHENTICATE, asking for the encrypted nonce
    pub fn pace_start(&self) -> Result<Command> {
        general_authenticate(true, &[])
    }

    /// Decrypt the nonce and send the terminal's mapping data
    pub fn pace_map(&mut self, response: &[u8]) -> Result<Command> {
        let encrypted_nonce = response_object(response, tags::ENCRYPTED_NONCE)?;
        let nonce = cbc_decrypt(&self.password_key, &[0u8; 16], &encrypted_nonce)?;
        self.nonce = Some(scalar_from_nonce(&nonce)?);

        let key = random_scalar();
        let mapping_data = encode_point(&(ProjectivePoint::GENERATOR * *key))?;
        self.mapping_key = Some(key);
        general_authenticate(true, &[(tags::MAPPING_DATA_TERMINAL, &mapping_data[..])])
    }

    /// Map the generator and send the terminal's ephemeral public key
    pub fn pace_key_agreement(&mut self, response: &[u8]) -> Result<Command> {
        let chip_mapping_data = response_object(response, tags::MAPPING_DATA_CHIP)?;
        let nonce = self.nonce.ok_or_else(|| state("no PACE nonce"))?;
        let mapping_key = self.mapping_key.ok_or_else(|| state("no mapping key"))?;

        let generator =
            ProjectivePoint::GENERATOR * nonce + decode_point(&chip_mapping_data)? * *mapping_key;
        let key = random_scalar();
        let public_key = encode_point(&(generator * *key))?;
        self.ephemeral_key = Some(key);
        self.ephemeral_public_key = Some(public_key.clone());
        general_authenticate(true, &[(tags::EPHEMERAL_KEY_TERMINAL, &public_key[..])])
    }

    /// Derive the session keys and send the terminal's token
    pub fn pace_mutual_authentication(&mut self, response: &[u8]) -> Result<Command> {
        let chip_key = response_object(response, tags::EPHEMERAL_KEY_CHIP)?;
        let key = self.ephemeral_key.ok_or_else(|| state("no ephemeral key"))?;
        if self.ephemeral_public_key.as_ref() == Some(&chip_key) {
            return Err(CryptoError::InvalidPublicKey.into());
        }

        let keys = SessionKeys::derive(&shared_secret(&key, &chip_key)?, &[]);
        let token = keys.token(oid::PACE_ECDH_GM_AES_CBC_CMAC_128, &chip_key)?;
        self.chip_ephemeral_key = Some(chip_key);
        self.pending_keys = Some(keys);
        general_authenticate(false, &[(tags::TOKEN_TERMINAL, &token[..])])
    }

    /// Verify the chip's token and start secure messaging
    pub fn pace_finish(&mut self, response: &[u8]) -> Result<()> {
        let objects = dynamic_authentication_data(response)?;
        let token = objects
            .iter()
            .find_map(|(tag, value)| (*tag == tags::TOKEN_CHIP).then_some(value))
            .ok_or(Error::IncorrectParameters)?;
        let public_key = self
            .ephemeral_public_key
            .as_ref()
            .ok_or_else(|| state("no ephemeral key"))?;
        let keys = self.pending_keys.take().ok_or_else(|| state("no PACE keys"))?;
        if !keys.verify_token(oid::PACE_ECDH_GM_AES_CBC_CMAC_128, public_key, token) {
            return Err(CryptoError::Token.into());
        }

        self.ca_reference = objects
            .into_iter()
            .find_map(|(tag, value)| (tag == tags::CA_REFERENCE).then_some(value));
        self.keys = Some(keys);
        self.ssc = 0;
        debug!(
            credential = %self.credential,
            ca_reference = ?self.ca_reference.as_deref().map(String::from_utf8_lossy),
            "PACE established"
        );
        Ok(())
    }

    // Terminal authentication

    /// Certificate chain from the card's trust anchor down to the terminal
    ///
    /// Each entry holds the reference of the issuing authority, for MSE:SET DST, and
    /// the certificate content for PSO:VERIFY CERTIFICATE.
    pub fn certificate_chain(&self) -> Result<Vec<(Bytes, Bytes)>> {
        let car = self
            .ca_reference
            .clone()
            .ok_or_else(|| state("no certificate authority reference"))?;
        let dv = CvCertificate {
            car: car.clone(),
            chr: Bytes::from_static(DV_REFERENCE),
            protocol: Bytes::from_static(oid::TA_ECDSA_SHA_256),
            public_point: public_point(&self.dv_key),
        }
        .issue(&self.cvca_key);
        let terminal = CvCertificate {
            car: Bytes::from_static(DV_REFERENCE),
            chr: Bytes::from_static(TERMINAL_REFERENCE),
            protocol: Bytes::from_static(oid::TA_ECDSA_SHA_256),
            public_point: public_point(&self.terminal_key),
        }
        .issue(&self.dv_key);

        Ok(vec![
            (car, dv.into()),
            (Bytes::from_static(DV_REFERENCE), terminal.into()),
        ])
    }

    /// MSE:SET DST naming the key that verifies the next certificate
    pub fn set_signature_template(&self, key_reference: &[u8]) -> Command {
        Command::new_with_data(
            cla::PLAIN,
            ins::MANAGE_SECURITY_ENVIRONMENT,
            MSE_SET_EXTERNAL,
            mse::DIGITAL_SIGNATURE_TEMPLATE,
            wrap(&[tags::PUBLIC_KEY_REFERENCE], key_reference),
        )
    }

    /// PSO:VERIFY CERTIFICATE
    pub fn verify_certificate(&self, certificate: &[u8]) -> Command {
        let (p1, p2) = PSO_VERIFY_CERTIFICATE;
        Command::new_with_data(
            cla::PLAIN,
            ins::PERFORM_SECURITY_OPERATION,
            p1,
            p2,
            Bytes::copy_from_slice(certificate),
        )
    }

    /// MSE:SET AT selecting terminal authentication
    pub fn set_ta_template(&self) -> Result<Command> {
        let mut data = wrap(&[tags::CRYPTOGRAPHIC_MECHANISM], oid::TA_ECDSA_SHA_256);
        data.extend(wrap(&[tags::PUBLIC_KEY_REFERENCE], TERMINAL_REFERENCE));
        data.extend(wrap(&[tags::EPHEMERAL_PUBLIC_KEY], &self.ca_compressed_key()?));
        if let Some(auxiliary_data) = &self.auxiliary_data {
            data.extend_from_slice(auxiliary_data);
        }
        Ok(Command::new_with_data(
            cla::PLAIN,
            ins::MANAGE_SECURITY_ENVIRONMENT,
            MSE_SET_EXTERNAL,
            mse::AUTHENTICATION_TEMPLATE,
            data,
        ))
    }

    /// GET CHALLENGE for eight bytes
    pub fn get_challenge(&self) -> Command {
        Command::new(cla::PLAIN, ins::GET_CHALLENGE, 0x00, 0x00).with_le(8)
    }

    /// EXTERNAL AUTHENTICATE with the signature over the card's challenge
    pub fn external_authenticate(&self, challenge: &[u8]) -> Result<Command> {
        let chip_key = self
            .chip_ephemeral_key
            .as_ref()
            .ok_or_else(|| state("PACE not established"))?;

        let mut message = x_coordinate(&decode_point(chip_key)?)?.to_vec();
        message.extend_from_slice(challenge);
        message.extend_from_slice(&self.ca_compressed_key()?);
        if let Some(auxiliary_data) = &self.auxiliary_data {
            message.extend_from_slice(auxiliary_data);
        }
        let signature: Signature = self.terminal_key.sign(&message);

        Ok(Command::new_with_data(
            cla::PLAIN,
            ins::EXTERNAL_AUTHENTICATE,
            0x00,
            0x00,
            signature.to_bytes().to_vec(),
        ))
    }

    // Chip authentication

    fn ca_public_key(&self) -> Result<Bytes> {
        Ok(encode_point(&(ProjectivePoint::GENERATOR * *self.ca_key))?)
    }

    fn ca_compressed_key(&self) -> Result<Bytes> {
        Ok(x_coordinate(&(ProjectivePoint::GENERATOR * *self.ca_key))?)
    }

    /// MSE:SET AT selecting chip authentication
    pub fn set_ca_template(&self) -> Command {
        let mut data = wrap(&[tags::CRYPTOGRAPHIC_MECHANISM], oid::CA_ECDH_AES_CBC_CMAC_128);
        data.extend(wrap(&[tags::PRIVATE_KEY_REFERENCE], &[CA_KEY_ID]));
        Command::new_with_data(
            cla::PLAIN,
            ins::MANAGE_SECURITY_ENVIRONMENT,
            MSE_SET_INTERNAL,
            mse::AUTHENTICATION_TEMPLATE,
            data,
        )
    }

    /// GENERAL AUTHENTICATE sending the terminal's CA ephemeral public key
    pub fn chip_authentication(&self) -> Result<Command> {
        let public_key = self.ca_public_key()?;
        general_authenticate(false, &[(tags::CA_EPHEMERAL_KEY_TERMINAL, &public_key[..])])
    }

    /// Verify the chip's token and switch to the chip authentication keys
    pub fn ca_finish(&mut self, response: &[u8], chip_public_key: &[u8]) -> Result<()> {
        let nonce = response_object(response, tags::CA_NONCE)?;
        let token = response_object(response, tags::CA_TOKEN)?;

        let keys = SessionKeys::derive(&shared_secret(&self.ca_key, chip_public_key)?, &nonce);
        if !keys.verify_token(oid::CA_ECDH_AES_CBC_CMAC_128, &self.ca_public_key()?, &token) {
            return Err(CryptoError::Token.into());
        }
        self.keys = Some(keys);
        self.ssc = 0;
        debug!("Chip authentication completed");
        Ok(())
    }

    // Secure messaging

    /// Wrap a plain command into secure messaging
    pub fn protect(&mut self, command: &Command) -> Result<Command> {
        let keys = self.keys.as_ref().ok_or_else(|| state("no session keys"))?;
        self.ssc += 1;

        let class = command.cla | cla::SECURE_MESSAGING;
        let mut objects = Vec::new();
        if !command.data().is_empty() {
            let mut cryptogram = vec![sm::PADDING_INDICATOR];
            let padded = pad(command.data(), SM_BLOCK_LENGTH);
            cryptogram.extend_from_slice(&keys.encrypt(self.ssc, &padded)?);
            objects.extend(wrap(&[sm::CRYPTOGRAM], &cryptogram));
        }
        if let Some(le) = command.le {
            objects.extend(wrap(&[sm::LE], &encode_le(le)));
        }

        let mut mac_input = pad(&[class, command.ins, command.p1, command.p2], SM_BLOCK_LENGTH);
        mac_input.extend_from_slice(&objects);
        let checksum = keys.authenticate(self.ssc, &pad(&mac_input, SM_BLOCK_LENGTH))?;
        objects.extend(wrap(&[sm::CHECKSUM], &checksum));

        let le = if objects.len() > 255 { 65536 } else { 256 };
        trace!(ssc = self.ssc, "Protected command");
        Ok(Command::new_with_data(class, command.ins, command.p1, command.p2, objects).with_le(le))
    }

    /// Verify and decrypt a protected response
    ///
    /// A response without data is an error the card answered in plain and is
    /// returned as is.
    pub fn unprotect(&mut self, response: &Response) -> Result<Response> {
        if response.payload().is_empty() {
            return Ok(response.clone());
        }
        let keys = self.keys.as_ref().ok_or_else(|| state("no session keys"))?;
        self.ssc += 1;

        let mut authenticated = Vec::new();
        let mut cryptogram = None;
        let mut status = None;
        let mut checksum = None;
        for (tlv, raw) in parse_raw_objects(response.payload())? {
            match tlv.tag().to_bytes() {
                [sm::CRYPTOGRAM] => {
                    cryptogram = Some(Bytes::copy_from_slice(primitive(&tlv)?));
                    authenticated.extend_from_slice(raw);
                }
                [sm::PROCESSING_STATUS] => {
                    status = Some(Bytes::copy_from_slice(primitive(&tlv)?));
                    authenticated.extend_from_slice(raw);
                }
                [sm::CHECKSUM] => checksum = Some(Bytes::copy_from_slice(primitive(&tlv)?)),
                _ => return Err(Error::SmObjectsIncorrect),
            }
        }

        let checksum = checksum.ok_or(Error::SmObjectsMissing)?;
        if keys.authenticate(self.ssc, &pad(&authenticated, SM_BLOCK_LENGTH))? != checksum {
            return Err(Error::SmObjectsIncorrect);
        }
        let status = match status.as_deref() {
            Some([sw1, sw2]) => StatusWord::new(*sw1, *sw2),
            Some([sw2]) => StatusWord::new(0x00, *sw2),
            _ => return Err(Error::SmObjectsMissing),
        };
        if status != response.status() {
            return Err(Error::SmObjectsIncorrect);
        }

        let data = match cryptogram.as_deref() {
            Some([sm::PADDING_INDICATOR, encrypted @ ..]) => {
                let padded = keys.decrypt(self.ssc, encrypted)?;
                Bytes::copy_from_slice(unpad(&padded)?)
            }
            Some(_) => return Err(Error::SmObjectsIncorrect),
            None => Bytes::new(),
        };
        Ok(Response::new(data, status))
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("credential", &self.credential)
            .field("established", &self.is_established())
            .field("ssc", &self.ssc)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_le() {
        assert_eq!(encode_le(8), vec![0x08]);
        assert_eq!(encode_le(256), vec![0x00]);
        assert_eq!(encode_le(300), vec![0x01, 0x2C]);
        assert_eq!(encode_le(65536), vec![0x00, 0x00]);
    }

    #[test]
    fn test_pace_template() {
        let command = Terminal::new(CredentialSelector::Pin, b"123456").set_pace_template();
        assert_eq!(command.header(), [0x00, 0x22, 0xC1, 0xA4]);
        assert_eq!(
            command.data(),
            hex::decode("800A04007F0007020204020283 0103".replace(' ', "")).unwrap()
        );
    }

    #[test]
    fn test_protect_requires_keys() {
        let mut terminal = Terminal::new(CredentialSelector::Can, b"500540");
        let command = terminal.get_challenge();
        assert!(terminal.protect(&command).is_err());
        assert_eq!(terminal.ssc(), 0);
        assert!(terminal.certificate_chain().is_err());
    }

    #[test]
    fn test_plain_error_passes_through() {
        let mut terminal = Terminal::new(CredentialSelector::Can, b"500540");
        let response = Response::status_only(StatusWord::new(0x6A, 0x80));
        assert_eq!(terminal.unprotect(&response).unwrap(), response);
        assert_eq!(terminal.ssc(), 0);
    }
}
