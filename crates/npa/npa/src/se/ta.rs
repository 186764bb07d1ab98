//! Terminal authentication

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{SecurityEnvironment, Step};
use crate::{
    Error, Result,
    backend::{EacContext, EacId, EacProvider},
    constants::{PSO_VERIFY_CERTIFICATE, tags},
    crt::Algorithm,
    tlv::wrap,
};

impl<P: EacProvider> SecurityEnvironment<P> {
    /// PSO:VERIFY CERTIFICATE
    ///
    /// The command carries the content of a card verifiable certificate. A certificate
    /// signed by the current trust anchor becomes the next trust anchor.
    pub fn verify_certificate(&mut self, p1: u8, p2: u8, data: &[u8]) -> Result<Bytes> {
        if (p1, p2) != PSO_VERIFY_CERTIFICATE {
            return Err(Error::IncorrectParameters);
        }
        let certificate = wrap(&tags::CV_CERTIFICATE, data);
        self.context_mut()?
            .ta_import_certificate(&certificate)
            .map_err(|error| {
                warn!(%error, "Certificate rejected");
                Error::Crypto(error)
            })?;
        Ok(Bytes::new())
    }

    /// Challenge for the terminal's signature (GET CHALLENGE at step 4)
    pub fn ta_nonce(&mut self) -> Result<Bytes> {
        Ok(self.context_mut()?.ta_nonce()?)
    }

    /// EXTERNAL AUTHENTICATE
    ///
    /// Verifies the terminal's signature over the chip's compressed PACE key, the
    /// challenge, the terminal's compressed CA key and the auxiliary data.
    pub fn external_authenticate(&mut self, _p1: u8, _p2: u8, data: &[u8]) -> Result<Bytes> {
        if self.dst.key_reference().is_none() {
            debug!("No certificate verified for terminal authentication");
            return Err(Error::ConditionsNotSatisfied);
        }
        if self.step != Step::PaceEstablished || self.at.algorithm() != Some(Algorithm::Ta) {
            debug!(step = self.step.number(), "Terminal authentication not selected");
            return Err(Error::ConditionsNotSatisfied);
        }
        let terminal_key = self
            .at
            .ephemeral_public_key()
            .ok_or(Error::ConditionsNotSatisfied)?;
        let chip_key = self
            .chip_ephemeral_key
            .as_ref()
            .ok_or(Error::ConditionsNotSatisfied)?;
        let context = self.context.as_mut().ok_or(Error::ConditionsNotSatisfied)?;

        let id_picc = context.compressed_key(EacId::Pace, chip_key)?;
        if !context.ta_verify(terminal_key, &id_picc, self.at.auxiliary_data(), data) {
            warn!("Terminal signature rejected");
            return Err(Error::ConditionsNotSatisfied);
        }

        self.step = Step::TerminalAuthenticated;
        info!(
            terminal = ?self.at.public_key_reference().map(String::from_utf8_lossy),
            "Terminal authenticated"
        );
        Ok(Bytes::new())
    }
}
