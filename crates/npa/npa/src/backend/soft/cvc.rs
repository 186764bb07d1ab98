//! Card verifiable certificates
//!
//! Only the fields needed to walk a chain are read: the authority and holder
//! references and the holder's public point. Validity dates and authorizations are
//! carried but not enforced.

use bytes::Bytes;
use iso7816_tlv::ber::Tlv;
use p256::ecdsa::{Signature, SigningKey, signature::Signer};

use crate::{
    backend::CryptoError,
    constants::tags,
    tlv::{constructed, find, primitive, wrap},
};

/// Role of an authentication terminal in a CHAT
const ROLE_AUTHENTICATION_TERMINAL: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x02];

/// Fields of a parsed certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CvCertificate {
    pub(crate) car: Bytes,
    pub(crate) chr: Bytes,
    pub(crate) protocol: Bytes,
    pub(crate) public_point: Bytes,
}

impl CvCertificate {
    /// Parse a certificate wrapped in tag 0x7F21
    pub(crate) fn parse(certificate: &[u8]) -> Result<Self, CryptoError> {
        let malformed = |_: crate::Error| CryptoError::Certificate("malformed certificate");

        let tlv = Tlv::from_bytes(certificate)
            .map_err(|_| CryptoError::Certificate("malformed certificate"))?;
        if tlv.tag().to_bytes() != tags::CV_CERTIFICATE.as_slice() {
            return Err(CryptoError::Certificate("not a card verifiable certificate"));
        }
        let objects = constructed(&tlv).map_err(malformed)?;
        let body = find(objects, &tags::CERTIFICATE_BODY)
            .ok_or(CryptoError::Certificate("missing body"))?;
        let fields = constructed(body).map_err(malformed)?;

        let field = |tag: &[u8], name: &'static str| -> Result<Bytes, CryptoError> {
            let tlv = find(fields, tag).ok_or(CryptoError::Certificate(name))?;
            Ok(Bytes::copy_from_slice(primitive(tlv).map_err(malformed)?))
        };
        let car = field(&[tags::CERTIFICATE_AUTHORITY_REFERENCE], "missing authority reference")?;
        let chr = field(&tags::CERTIFICATE_HOLDER_REFERENCE, "missing holder reference")?;

        let key = find(fields, &tags::PUBLIC_KEY)
            .ok_or(CryptoError::Certificate("missing public key"))?;
        let key = constructed(key).map_err(malformed)?;
        let key_field = |tag: u8, name: &'static str| -> Result<Bytes, CryptoError> {
            let tlv = find(key, &[tag]).ok_or(CryptoError::Certificate(name))?;
            Ok(Bytes::copy_from_slice(primitive(tlv).map_err(malformed)?))
        };

        Ok(Self {
            car,
            chr,
            protocol: key_field(tags::OBJECT_IDENTIFIER, "missing key protocol")?,
            public_point: key_field(tags::EC_PUBLIC_POINT, "missing public point")?,
        })
    }

    /// Build and sign a certificate for an authentication terminal or its issuers
    ///
    /// Returns body and signature, the content of the 0x7F21 object.
    pub(crate) fn issue(&self, issuer: &SigningKey) -> Vec<u8> {
        let mut key = wrap(&[tags::OBJECT_IDENTIFIER], &self.protocol);
        key.extend(wrap(&[tags::EC_PUBLIC_POINT], &self.public_point));

        let mut chat = wrap(&[tags::OBJECT_IDENTIFIER], ROLE_AUTHENTICATION_TERMINAL);
        chat.extend(wrap(&[0x53], &[0x00, 0x00, 0x00, 0x00, 0x10]));

        let mut body = wrap(&tags::CERTIFICATE_PROFILE_IDENTIFIER, &[0x00]);
        body.extend(wrap(&[tags::CERTIFICATE_AUTHORITY_REFERENCE], &self.car));
        body.extend(wrap(&tags::PUBLIC_KEY, &key));
        body.extend(wrap(&tags::CERTIFICATE_HOLDER_REFERENCE, &self.chr));
        body.extend(wrap(&tags::CHAT, &chat));
        // effective and expiration date, YYMMDD as unpacked BCD
        body.extend(wrap(&[0x5F, 0x25], &[2, 4, 0, 1, 0, 1]));
        body.extend(wrap(&[0x5F, 0x24], &[3, 4, 1, 2, 3, 1]));
        let body = wrap(&tags::CERTIFICATE_BODY, &body);

        let signature: Signature = issuer.sign(&body);
        let mut certificate = body;
        certificate.extend(wrap(&tags::SIGNATURE, &signature.to_bytes()));
        certificate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::oid;

    fn certificate() -> CvCertificate {
        CvCertificate {
            car: Bytes::from_static(b"DECVCAeID00102"),
            chr: Bytes::from_static(b"DEDVeIDDTR00001"),
            protocol: Bytes::from_static(oid::TA_ECDSA_SHA_256),
            public_point: Bytes::from(vec![0x04; 65]),
        }
    }

    #[test]
    fn test_issue_and_parse() {
        let issuer = SigningKey::random(&mut rand_v8::thread_rng());
        let content = certificate().issue(&issuer);
        assert_eq!(&content[..2], &tags::CERTIFICATE_BODY);
        let encoded = wrap(&tags::CV_CERTIFICATE, &content);
        assert_eq!(CvCertificate::parse(&encoded).unwrap(), certificate());
    }

    #[test]
    fn test_parse_rejects_other_objects() {
        assert!(matches!(
            CvCertificate::parse(&[0x7F, 0x4E, 0x00]),
            Err(CryptoError::Certificate(_))
        ));
        assert!(matches!(
            CvCertificate::parse(&[0x7F, 0x21, 0x02, 0x42, 0x00]),
            Err(CryptoError::Certificate("missing body"))
        ));
        assert!(CvCertificate::parse(&[0x7F, 0x21]).is_err());
    }
}
