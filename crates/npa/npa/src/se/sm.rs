//! Secure messaging primitives of the security environment

use bytes::Bytes;
use cipher::block_padding::{Iso7816, RawPadding};
use sha2::{Digest, Sha256};
use tracing::trace;
use vnpa_apdu_core::StatusWord;

use super::SecurityEnvironment;
use crate::{
    Error, Result,
    backend::{EacContext, EacProvider},
    constants::{SM_BLOCK_LENGTH, sm},
    tlv::wrap,
};

/// How protected responses are authenticated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseAuthentication {
    /// Cryptographic checksum (tag 0x8E)
    #[default]
    Checksum,
    /// Digital signature over the SHA-256 of the response objects (tag 0x9E)
    Signature,
    /// Responses cannot be protected
    None,
}

/// ISO/IEC 7816-4 padding to a multiple of `block_length`, always adding at least one byte
pub(crate) fn pad(data: &[u8], block_length: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize((data.len() / block_length + 1) * block_length, 0);
    let last = padded.len() - block_length;
    Iso7816::raw_pad(&mut padded[last..], data.len() - last);
    padded
}

/// Strip ISO/IEC 7816-4 padding
pub(crate) fn unpad(data: &[u8]) -> Result<&[u8]> {
    Iso7816::raw_unpad(data).map_err(|_| Error::SmObjectsIncorrect)
}

impl<P: EacProvider> SecurityEnvironment<P> {
    /// Checksum over already padded data under the current counter
    pub fn compute_checksum(&self, data: &[u8]) -> Result<Bytes> {
        Ok(self.context()?.authenticate(self.ssc, data)?)
    }

    /// Pad and encrypt under the current counter
    pub fn encipher(&self, data: &[u8]) -> Result<Bytes> {
        let padded = pad(data, SM_BLOCK_LENGTH);
        Ok(self.context()?.encrypt(self.ssc, &padded)?)
    }

    /// Decrypt under the current counter, leaving the padding in place
    pub fn decipher(&self, data: &[u8]) -> Result<Bytes> {
        Ok(self.context()?.decrypt(self.ssc, data)?)
    }

    /// Build the protected response body for a status word and a plain result
    ///
    /// The counter must already be advanced for this response.
    pub fn protect_response(&self, status: StatusWord, result: &[u8]) -> Result<Bytes> {
        if self.response_authentication == ResponseAuthentication::None {
            return Err(Error::ConditionsNotSatisfied);
        }

        let mut objects = Vec::new();
        if !result.is_empty() {
            let mut cryptogram = vec![sm::PADDING_INDICATOR];
            cryptogram.extend_from_slice(&self.encipher(result)?);
            objects.extend(wrap(&[sm::CRYPTOGRAM], &cryptogram));
        }
        objects.extend(wrap(&[sm::PROCESSING_STATUS], &status.to_minimal_bytes()));

        match self.response_authentication {
            ResponseAuthentication::Checksum => {
                let checksum = self.compute_checksum(&pad(&objects, SM_BLOCK_LENGTH))?;
                objects.extend(wrap(&[sm::CHECKSUM], &checksum));
            }
            ResponseAuthentication::Signature => {
                let signature = self.context()?.sign(&Sha256::digest(&objects))?;
                objects.extend(wrap(&[sm::SIGNATURE], &signature));
            }
            ResponseAuthentication::None => return Err(Error::ConditionsNotSatisfied),
        }

        trace!(ssc = self.ssc, sw = %status, "Protected response");
        Ok(objects.into())
    }
}
