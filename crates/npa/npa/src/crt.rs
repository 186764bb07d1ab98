//! Control reference templates set by MSE:SET

use bytes::Bytes;
use derive_more::Display;
use iso7816_tlv::ber::Tlv;
use tracing::{debug, trace};
use vnpa_apdu_core::{StatusWord, status};

use crate::{
    Error, Result,
    constants::{oid, tags},
    tlv::{constructed, find, has_tag, parse_objects, primitive},
};

/// Key reference of the password used for PACE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u8)]
pub enum CredentialSelector {
    #[display("MRZ")]
    Mrz = 0x01,
    #[display("CAN")]
    Can = 0x02,
    #[display("PIN")]
    Pin = 0x03,
    #[display("PUK")]
    Puk = 0x04,
}

impl CredentialSelector {
    /// Decode a one-byte key reference
    pub const fn from_reference(reference: u8) -> Option<Self> {
        match reference {
            0x01 => Some(Self::Mrz),
            0x02 => Some(Self::Can),
            0x03 => Some(Self::Pin),
            0x04 => Some(Self::Puk),
            _ => None,
        }
    }

    /// The one-byte key reference
    pub const fn reference(self) -> u8 {
        self as u8
    }
}

/// Authentication mechanism selected by the cryptographic mechanism reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Algorithm {
    #[display("PACE")]
    Pace,
    #[display("TA")]
    Ta,
    #[display("CA")]
    Ca,
}

impl Algorithm {
    /// Identify the mechanism from a protocol object identifier
    pub fn from_protocol(protocol: &[u8]) -> Option<Self> {
        if protocol.starts_with(oid::PACE) {
            Some(Self::Pace)
        } else if protocol.starts_with(oid::TA) {
            Some(Self::Ta)
        } else if protocol.starts_with(oid::CA) {
            Some(Self::Ca)
        } else {
            None
        }
    }
}

/// Authentication template (MSE:SET AT)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlReferenceTemplate {
    algorithm: Option<Algorithm>,
    protocol: Bytes,
    public_key_reference: Option<Bytes>,
    private_key_reference: Option<u8>,
    auxiliary_data: Option<Bytes>,
    ephemeral_public_key: Option<Bytes>,
    chat: Option<Bytes>,
}

impl ControlReferenceTemplate {
    /// Parse an authentication template and report the remaining PIN tries
    ///
    /// When the template selects the PIN, the returned status word carries the
    /// PIN retry counter (63 C0 to 63 C2); otherwise it is 90 00.
    pub fn configure(config: &[u8], pin_status: StatusWord) -> Result<(Self, StatusWord)> {
        let crt = Self::parse(config)?;
        if crt.algorithm.is_none() {
            return Err(Error::IncorrectParameters);
        }

        let status = match crt.credential() {
            Some(CredentialSelector::Pin) => pin_status,
            _ => status::SUCCESS,
        };

        debug!(
            algorithm = ?crt.algorithm,
            credential = ?crt.credential(),
            sw = %status,
            "Configured authentication template"
        );
        Ok((crt, status))
    }

    /// Parse the data objects of a template
    pub fn parse(config: &[u8]) -> Result<Self> {
        let mut crt = Self::default();
        for tlv in parse_objects(config)? {
            crt.apply(&tlv)?;
        }
        Ok(crt)
    }

    fn apply(&mut self, tlv: &Tlv) -> Result<()> {
        match tlv.tag().to_bytes() {
            [tags::CRYPTOGRAPHIC_MECHANISM] => {
                let protocol = primitive(tlv)?;
                self.algorithm =
                    Some(Algorithm::from_protocol(protocol).ok_or(Error::ReferenceDataNotUsable)?);
                self.protocol = Bytes::copy_from_slice(protocol);
            }
            [tags::PUBLIC_KEY_REFERENCE] => {
                self.public_key_reference = Some(Bytes::copy_from_slice(primitive(tlv)?));
            }
            [tags::PRIVATE_KEY_REFERENCE] => match primitive(tlv)? {
                [id] => self.private_key_reference = Some(*id),
                _ => return Err(Error::IncorrectParameters),
            },
            [tags::AUXILIARY_DATA] => self.auxiliary_data = Some(tlv.to_vec().into()),
            [tags::EPHEMERAL_PUBLIC_KEY] => {
                self.ephemeral_public_key = Some(Bytes::copy_from_slice(primitive(tlv)?));
            }
            tag if tag == tags::CHAT.as_slice() => {
                let chat = constructed(tlv)?;
                let role = find(chat, &[tags::OBJECT_IDENTIFIER]).ok_or(Error::IncorrectParameters)?;
                let authorization = find(chat, &[0x53]).ok_or(Error::IncorrectParameters)?;
                debug!(
                    role = %hex::encode(primitive(role)?),
                    authorization = %hex::encode(primitive(authorization)?),
                    "Certificate holder authorization"
                );
                self.chat = Some(tlv.to_vec().into());
            }
            tag => {
                trace!(tag = %hex::encode(tag), "Unexpected object in authentication template");
                return Err(Error::ReferenceDataNotUsable);
            }
        }
        Ok(())
    }

    /// The selected mechanism
    pub const fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Advance the mechanism after a completed protocol
    pub(crate) const fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = Some(algorithm);
    }

    /// The protocol object identifier
    pub fn protocol(&self) -> &[u8] {
        &self.protocol
    }

    /// The PACE password, decoded from the public key reference
    pub fn credential(&self) -> Option<CredentialSelector> {
        match (self.algorithm, self.public_key_reference.as_deref()) {
            (Some(Algorithm::Pace), Some([reference])) => {
                CredentialSelector::from_reference(*reference)
            }
            _ => None,
        }
    }

    /// The raw public key reference (a certificate holder reference for TA)
    pub fn public_key_reference(&self) -> Option<&[u8]> {
        self.public_key_reference.as_deref()
    }

    /// The private key reference (the chip authentication key id)
    pub const fn private_key_reference(&self) -> Option<u8> {
        self.private_key_reference
    }

    /// Auxiliary authenticated data, encoded with its 0x67 tag
    pub fn auxiliary_data(&self) -> Option<&[u8]> {
        self.auxiliary_data.as_deref()
    }

    /// The compressed ephemeral public key of the terminal
    pub fn ephemeral_public_key(&self) -> Option<&[u8]> {
        self.ephemeral_public_key.as_deref()
    }

    /// The certificate holder authorization template, encoded with its tag
    pub fn chat(&self) -> Option<&[u8]> {
        self.chat.as_deref()
    }
}

/// Digital signature template (MSE:SET DST)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigitalSignatureTemplate {
    key_reference: Option<Bytes>,
}

impl DigitalSignatureTemplate {
    /// Parse a digital signature template
    pub fn parse(config: &[u8]) -> Result<Self> {
        let mut dst = Self::default();
        for tlv in parse_objects(config)? {
            if has_tag(&tlv, &[tags::PUBLIC_KEY_REFERENCE]) {
                dst.key_reference = Some(Bytes::copy_from_slice(primitive(&tlv)?));
            } else if !has_tag(&tlv, &[tags::CRYPTOGRAPHIC_MECHANISM]) {
                return Err(Error::ReferenceDataNotUsable);
            }
        }
        debug!(
            key_reference = ?dst.key_reference.as_deref().map(String::from_utf8_lossy),
            "Configured digital signature template"
        );
        Ok(dst)
    }

    /// Reference of the public key that verifies the next certificate or signature
    pub fn key_reference(&self) -> Option<&[u8]> {
        self.key_reference.as_deref()
    }
}
