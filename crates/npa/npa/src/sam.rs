//! Secure access module: the card's secrets, its security environment and the
//! command dispatcher in front of both
//!
//! Commands enter through [`Sam::process_command`] (or [`Sam::process_apdu`] for raw
//! bytes). A command with the secure messaging bits set in its class byte is
//! verified and decrypted first; whatever the handler answers is then protected
//! under the same session. Failures of the secure messaging layer itself are
//! answered in plain.

use bytes::Bytes;
use rand::RngCore;
use tracing::{Level, debug, info, trace, warn};
use vnpa_apdu_core::{Command, Response, StatusWord, status};

use crate::{
    Error, Result,
    backend::EacProvider,
    config::CardConfig,
    constants::{SM_BLOCK_LENGTH, cla, ins, reset_retry_counter, sm},
    crt::CredentialSelector,
    se::{
        SecurityEnvironment, Step,
        sm::{pad, unpad},
    },
    secrets::Secrets,
    tlv::{parse_raw_objects, primitive},
};

/// Length of the challenge returned by GET CHALLENGE outside terminal authentication
const CHALLENGE_LENGTH: usize = 8;

/// Decode Ne from a 0x97 object
fn decode_le(value: &[u8]) -> Result<u32> {
    match value {
        [0x00] => Ok(256),
        [byte] => Ok(u32::from(*byte)),
        [0x00, 0x00] => Ok(65536),
        [msb, lsb] => Ok(u32::from(u16::from_be_bytes([*msb, *lsb]))),
        _ => Err(Error::SmObjectsIncorrect),
    }
}

fn success(data: Bytes) -> (StatusWord, Bytes) {
    (status::SUCCESS, data)
}

/// Secure access module of a virtual card
#[derive(Debug)]
pub struct Sam<P: EacProvider> {
    secrets: Secrets,
    se: SecurityEnvironment<P>,
}

impl<P: EacProvider> Sam<P> {
    /// SAM with the default EF.CardAccess and CA reference
    pub fn new(provider: P, secrets: Secrets) -> Self {
        Self {
            secrets,
            se: SecurityEnvironment::new(provider),
        }
    }

    /// SAM for a card profile
    pub fn from_config(provider: P, config: &CardConfig) -> Self {
        let se = SecurityEnvironment::with_files(
            provider,
            Bytes::from(config.ef_card_access.clone()),
            Bytes::from(config.ca_reference.clone().into_bytes()),
        );
        Self {
            secrets: Secrets::from_config(config),
            se,
        }
    }

    /// Secrets and retry counters
    pub const fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    /// The security environment
    pub const fn security_environment(&self) -> &SecurityEnvironment<P> {
        &self.se
    }

    /// The security environment, e.g. to choose the response authentication
    pub const fn security_environment_mut(&mut self) -> &mut SecurityEnvironment<P> {
        &mut self.se
    }

    /// Process a raw command APDU into a raw response APDU
    pub fn process_apdu(&mut self, apdu: &[u8]) -> Bytes {
        match Command::from_bytes(apdu) {
            Ok(command) => self.process_command(&command).to_bytes(),
            Err(error) => {
                debug!(%error, apdu = %hex::encode(apdu), "Malformed command");
                Response::status_only(Error::from(error).status()).to_bytes()
            }
        }
    }

    /// Process one command
    ///
    /// Never fails: every error is answered with its status word.
    pub fn process_command(&mut self, command: &Command) -> Response {
        let response = self.respond(command);

        // CA keys take over once the response under the PACE keys is built
        if let Err(error) = self.se.activate_pending_keys() {
            warn!(%error, "Chip authentication keys not activated");
        }

        let sw = response.status();
        let level = sw.tracing_level();
        if level == Level::DEBUG {
            debug!(ins = command.ins, %sw, ssc = self.se.ssc(), "Command processed");
        } else if level == Level::INFO {
            info!(ins = command.ins, %sw, "Command processed: {}", sw.description());
        } else {
            warn!(ins = command.ins, %sw, "Command failed: {}", sw.description());
        }
        response
    }

    fn respond(&mut self, command: &Command) -> Response {
        if !matches!(
            command.cla,
            cla::PLAIN | cla::SECURE_MESSAGING | cla::CHAINING | cla::CHAINING_SECURE_MESSAGING
        ) {
            return Response::status_only(Error::ClassNotSupported.status());
        }

        if !command.is_secure_messaging() {
            return match self.dispatch(command) {
                Ok((sw, data)) => Response::new(data, sw),
                Err(error) => Response::status_only(error.status()),
            };
        }

        let plain = match self.unprotect_command(command) {
            Ok(plain) => plain,
            Err(error) => {
                debug!(%error, "Secure messaging rejected the command");
                return Response::status_only(error.status());
            }
        };
        let (sw, data) = match self.dispatch(&plain) {
            Ok(result) => result,
            Err(error) => (error.status(), Bytes::new()),
        };

        // a restarted PACE run drops the session
        if !self.se.has_session() {
            return Response::new(data, sw);
        }
        match self.protect_result(sw, &data) {
            Ok(body) => Response::new(body, sw),
            Err(error) => {
                warn!(%error, "Response protection failed");
                Response::status_only(error.status())
            }
        }
    }

    fn dispatch(&mut self, command: &Command) -> Result<(StatusWord, Bytes)> {
        let (p1, p2, data) = (command.p1, command.p2, command.data());
        trace!(
            ins = command.ins,
            p1,
            p2,
            data = %hex::encode(data),
            step = self.se.step().number(),
            "Dispatching command"
        );
        match command.ins {
            ins::MANAGE_SECURITY_ENVIRONMENT => {
                let sw = self
                    .se
                    .manage_security_environment(p1, p2, data, &self.secrets)?;
                Ok((sw, Bytes::new()))
            }
            ins::GENERAL_AUTHENTICATE => self
                .se
                .general_authenticate(p1, p2, data, &mut self.secrets)
                .map(success),
            ins::PERFORM_SECURITY_OPERATION => self.se.verify_certificate(p1, p2, data).map(success),
            ins::EXTERNAL_AUTHENTICATE => self.se.external_authenticate(p1, p2, data).map(success),
            ins::GET_CHALLENGE => self.get_challenge(p1, p2).map(success),
            ins::RESET_RETRY_COUNTER => {
                self.reset_retry_counter(p1, p2, data)?;
                Ok(success(Bytes::new()))
            }
            _ => Err(Error::InstructionNotSupported),
        }
    }

    /// RESET RETRY COUNTER
    ///
    /// P1 0x02 changes the CAN or the PIN to the command data, P1 0x03 resumes or
    /// unblocks the PIN depending on the credential of the PACE run.
    pub fn reset_retry_counter(&mut self, p1: u8, p2: u8, data: &[u8]) -> Result<()> {
        if self.se.step() < Step::PaceEstablished {
            return Err(Error::SecurityStatusNotSatisfied);
        }
        let pace_credential = self.se.pace_credential();

        match (p1, CredentialSelector::from_reference(p2)) {
            (reset_retry_counter::CHANGE, Some(CredentialSelector::Can)) => {
                if data.is_empty() {
                    return Err(Error::IncorrectParameters);
                }
                self.secrets.change_can(data);
                Ok(())
            }
            (reset_retry_counter::CHANGE, Some(CredentialSelector::Pin)) => {
                if pace_credential != Some(CredentialSelector::Pin) {
                    debug!(?pace_credential, "PIN change needs PACE with the PIN");
                    return Err(Error::ConditionsNotSatisfied);
                }
                if data.is_empty() {
                    return Err(Error::IncorrectParameters);
                }
                self.secrets.change_pin(data);
                Ok(())
            }
            (reset_retry_counter::RESUME, Some(CredentialSelector::Can)) => Ok(()),
            (reset_retry_counter::RESUME, Some(CredentialSelector::Pin)) => match pace_credential {
                Some(CredentialSelector::Can) => {
                    self.secrets.resume_pin();
                    Ok(())
                }
                Some(CredentialSelector::Pin) => Ok(()),
                Some(CredentialSelector::Puk) => {
                    self.secrets.unblock_pin();
                    Ok(())
                }
                _ => Err(Error::ConditionsNotSatisfied),
            },
            (reset_retry_counter::CHANGE | reset_retry_counter::RESUME, _) => {
                Err(Error::DataNotFound)
            }
            _ => Err(Error::IncorrectP1P2),
        }
    }

    /// GET CHALLENGE
    ///
    /// Right after PACE the challenge is the one terminal authentication signs.
    pub fn get_challenge(&mut self, p1: u8, p2: u8) -> Result<Bytes> {
        if (p1, p2) != (0x00, 0x00) {
            return Err(Error::IncorrectP1P2);
        }
        if self.se.step() == Step::PaceEstablished {
            return self.se.ta_nonce();
        }
        let mut challenge = [0u8; CHALLENGE_LENGTH];
        rand::rng().fill_bytes(&mut challenge);
        Ok(Bytes::copy_from_slice(&challenge))
    }

    /// Verify and decrypt a command protected by secure messaging
    ///
    /// Advances the send sequence counter once a session exists, even when the
    /// command is then rejected.
    pub fn unprotect_command(&mut self, command: &Command) -> Result<Command> {
        if !self.se.has_session() {
            debug!("Protected command without secure messaging session");
            return Err(Error::SecurityStatusNotSatisfied);
        }
        self.se.increment_ssc();

        let mut authenticated = Vec::new();
        let mut cryptogram = None;
        let mut le = None;
        let mut checksum = None;
        let objects =
            parse_raw_objects(command.data()).map_err(|_: Error| Error::SmObjectsIncorrect)?;
        for (tlv, raw) in objects {
            match tlv.tag().to_bytes() {
                [sm::CRYPTOGRAM] => {
                    cryptogram = Some(Bytes::copy_from_slice(primitive(&tlv)?));
                    authenticated.extend_from_slice(raw);
                }
                [sm::LE] => {
                    le = Some(decode_le(primitive(&tlv)?)?);
                    authenticated.extend_from_slice(raw);
                }
                [sm::CHECKSUM] => checksum = Some(Bytes::copy_from_slice(primitive(&tlv)?)),
                _ => return Err(Error::SmObjectsIncorrect),
            }
        }
        let checksum = checksum.ok_or(Error::SmObjectsMissing)?;

        let header = [
            command.cla | cla::SECURE_MESSAGING,
            command.ins,
            command.p1,
            command.p2,
        ];
        let mut mac_input = pad(&header, SM_BLOCK_LENGTH);
        mac_input.extend_from_slice(&authenticated);
        if self.se.compute_checksum(&pad(&mac_input, SM_BLOCK_LENGTH))? != checksum {
            debug!(ssc = self.se.ssc(), "Command checksum mismatch");
            return Err(Error::SmObjectsIncorrect);
        }

        let data = match cryptogram.as_deref() {
            Some([sm::PADDING_INDICATOR, encrypted @ ..]) => {
                let padded = self
                    .se
                    .decipher(encrypted)
                    .map_err(|_: Error| Error::SmObjectsIncorrect)?;
                Bytes::copy_from_slice(unpad(&padded)?)
            }
            Some(_) => return Err(Error::SmObjectsIncorrect),
            None => Bytes::new(),
        };

        let mut plain = Command::new(
            command.cla & !cla::SECURE_MESSAGING,
            command.ins,
            command.p1,
            command.p2,
        )
        .with_data(data);
        if let Some(le) = le {
            plain = plain.with_le(le);
        }
        trace!(ssc = self.se.ssc(), ins = plain.ins, "Unprotected command");
        Ok(plain)
    }

    /// Advance the send sequence counter and protect a result
    pub fn protect_result(&mut self, sw: StatusWord, data: &[u8]) -> Result<Bytes> {
        self.se.increment_ssc();
        self.se.protect_response(sw, data)
    }
}

impl<P: EacProvider + Default> Default for Sam<P> {
    fn default() -> Self {
        Self::new(P::default(), Secrets::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            EacId,
            mock::{self, MockProvider},
        },
        constants::oid,
        se::tests::pace_template,
        tlv::{pack_dynamic_authentication_data, parse_objects, wrap},
    };

    fn ga(objects: &[(u8, &[u8])]) -> Command {
        Command::new_with_data(
            0x00,
            ins::GENERAL_AUTHENTICATE,
            0x00,
            0x00,
            pack_dynamic_authentication_data(objects).unwrap(),
        )
    }

    fn mse(p1: u8, p2: u8, data: Vec<u8>) -> Command {
        Command::new_with_data(0x00, ins::MANAGE_SECURITY_ENVIRONMENT, p1, p2, data)
    }

    fn run_pace(sam: &mut Sam<MockProvider>, credential: CredentialSelector) -> Response {
        sam.process_command(&mse(0xC1, 0xA4, pace_template(credential)));
        sam.process_command(&ga(&[]));
        sam.process_command(&ga(&[(0x81, &[0x04, 0x09])]));
        sam.process_command(&ga(&[(0x83, &[0x04, 0x0A])]));
        sam.process_command(&ga(&[(0x85, &mock::TERMINAL_TOKEN)]))
    }

    /// Protect a command the way the mock backend expects, with the counter already advanced
    fn protect(sam: &Sam<MockProvider>, command: &Command) -> Command {
        let se = sam.security_environment();
        let class = command.cla | cla::SECURE_MESSAGING;
        let mut objects = Vec::new();
        if !command.data().is_empty() {
            let mut cryptogram = vec![sm::PADDING_INDICATOR];
            cryptogram.extend_from_slice(&se.encipher(command.data()).unwrap());
            objects.extend(wrap(&[sm::CRYPTOGRAM], &cryptogram));
        }
        if let Some(le) = command.le {
            objects.extend(wrap(&[sm::LE], &[le as u8]));
        }
        let mut mac_input = pad(&[class, command.ins, command.p1, command.p2], SM_BLOCK_LENGTH);
        mac_input.extend_from_slice(&objects);
        let checksum = se
            .compute_checksum(&pad(&mac_input, SM_BLOCK_LENGTH))
            .unwrap();
        objects.extend(wrap(&[sm::CHECKSUM], &checksum));
        Command::new_with_data(class, command.ins, command.p1, command.p2, objects)
    }

    fn send_protected(sam: &mut Sam<MockProvider>, command: &Command) -> Response {
        let ssc = sam.se.ssc();
        sam.se.set_ssc(ssc + 1);
        let protected = protect(sam, command);
        sam.se.set_ssc(ssc);
        sam.process_command(&protected)
    }

    #[test]
    fn test_class_and_instruction() {
        let mut sam = Sam::<MockProvider>::default();
        let response = sam.process_command(&Command::new(0x80, 0x84, 0x00, 0x00));
        assert_eq!(response.status().to_u16(), 0x6E00);
        let response = sam.process_command(&Command::new(0x00, 0xB0, 0x00, 0x00));
        assert_eq!(response.status().to_u16(), 0x6D00);
    }

    #[test]
    fn test_malformed_apdu() {
        let mut sam = Sam::<MockProvider>::default();
        assert_eq!(sam.process_apdu(&[0x00, 0x84]).as_ref(), &[0x67, 0x00]);
    }

    #[test]
    fn test_pace_over_apdus() {
        let mut sam = Sam::<MockProvider>::default();
        let response = run_pace(&mut sam, CredentialSelector::Can);
        assert!(response.is_success());
        assert_eq!(sam.security_environment().step(), Step::PaceEstablished);
    }

    #[test]
    fn test_pin_status_on_mse() {
        let mut sam = Sam::new(MockProvider::default(), Secrets::default().with_retries(2, 10));
        let response = sam.process_command(&mse(0xC1, 0xA4, pace_template(CredentialSelector::Pin)));
        assert_eq!(response.status().to_u16(), 0x63C2);
    }

    #[test]
    fn test_protected_command_without_session() {
        let mut sam = Sam::<MockProvider>::default();
        let command = Command::new_with_data(0x0C, 0x84, 0x00, 0x00, vec![0x8E, 0x01, 0x00]);
        assert_eq!(sam.process_command(&command).status().to_u16(), 0x6982);
        assert_eq!(sam.security_environment().ssc(), 0);
    }

    #[test]
    fn test_protected_round_trip() {
        let mut sam = Sam::<MockProvider>::default();
        run_pace(&mut sam, CredentialSelector::Can);

        let response = send_protected(&mut sam, &Command::new(0x00, 0x84, 0x00, 0x00).with_le(8));
        assert!(response.is_success());
        assert_eq!(sam.security_environment().ssc(), 2);

        let objects = parse_objects(response.payload()).unwrap();
        let tags: Vec<_> = objects.iter().map(|tlv| tlv.tag().to_bytes().to_vec()).collect();
        assert_eq!(tags, vec![vec![0x87], vec![0x99], vec![0x8E]]);
    }

    #[test]
    fn test_protected_error_is_protected() {
        let mut sam = Sam::<MockProvider>::default();
        run_pace(&mut sam, CredentialSelector::Can);

        let response = send_protected(&mut sam, &Command::new(0x00, 0x84, 0x01, 0x00));
        assert_eq!(response.status().to_u16(), 0x6A86);
        assert_eq!(&response.payload()[..4], &[0x99, 0x02, 0x6A, 0x86]);
        assert_eq!(sam.security_environment().ssc(), 2);
    }

    #[test]
    fn test_sm_failures_are_plain() {
        let mut sam = Sam::<MockProvider>::default();
        run_pace(&mut sam, CredentialSelector::Can);

        // no checksum
        let command = Command::new_with_data(0x0C, 0x84, 0x00, 0x00, vec![0x97, 0x01, 0x08]);
        let response = sam.process_command(&command);
        assert_eq!(response.status().to_u16(), 0x6987);
        assert!(response.payload().is_empty());

        // wrong checksum
        let command = Command::new_with_data(
            0x0C,
            0x84,
            0x00,
            0x00,
            [&[0x97, 0x01, 0x08, 0x8E, 0x08][..], &[0u8; 8]].concat(),
        );
        let response = sam.process_command(&command);
        assert_eq!(response.status().to_u16(), 0x6988);
        assert_eq!(sam.security_environment().ssc(), 2);
    }

    #[test]
    fn test_reset_retry_counter_needs_pace() {
        let mut sam = Sam::<MockProvider>::default();
        assert!(matches!(
            sam.reset_retry_counter(0x02, 0x02, b"123456"),
            Err(Error::SecurityStatusNotSatisfied)
        ));
    }

    #[test]
    fn test_change_secrets() {
        let mut sam = Sam::<MockProvider>::default();
        run_pace(&mut sam, CredentialSelector::Can);

        sam.reset_retry_counter(0x02, 0x02, b"123123").unwrap();
        assert_eq!(sam.secrets().password(CredentialSelector::Can), b"123123");
        assert!(matches!(
            sam.reset_retry_counter(0x02, 0x03, b"654321"),
            Err(Error::ConditionsNotSatisfied)
        ));
        assert!(matches!(
            sam.reset_retry_counter(0x02, 0x02, &[]),
            Err(Error::IncorrectParameters)
        ));
        assert!(matches!(
            sam.reset_retry_counter(0x02, 0x04, b"1"),
            Err(Error::DataNotFound)
        ));
        assert!(matches!(
            sam.reset_retry_counter(0x05, 0x03, &[]),
            Err(Error::IncorrectP1P2)
        ));

        run_pace(&mut sam, CredentialSelector::Pin);
        sam.reset_retry_counter(0x02, 0x03, b"654321").unwrap();
        assert_eq!(sam.secrets().password(CredentialSelector::Pin), b"654321");
    }

    #[test]
    fn test_resume_and_unblock() {
        let secrets = Secrets::default().with_retries(1, 10);
        let mut sam = Sam::new(MockProvider::default(), secrets);

        run_pace(&mut sam, CredentialSelector::Mrz);
        assert!(matches!(
            sam.reset_retry_counter(0x03, 0x03, &[]),
            Err(Error::ConditionsNotSatisfied)
        ));
        assert!(!sam.secrets().pin_active());

        run_pace(&mut sam, CredentialSelector::Can);
        sam.reset_retry_counter(0x03, 0x03, &[]).unwrap();
        assert!(sam.secrets().pin_active());
        assert_eq!(sam.secrets().pin_retries(), 1);

        let mut sam = Sam::new(MockProvider::default(), Secrets::default().with_retries(0, 10));
        run_pace(&mut sam, CredentialSelector::Puk);
        sam.reset_retry_counter(0x03, 0x03, &[]).unwrap();
        assert_eq!(sam.secrets().pin_retries(), 3);
        assert_eq!(sam.secrets().puk_retries(), 9);
        assert!(sam.secrets().pin_active());
    }

    #[test]
    fn test_get_challenge() {
        let mut sam = Sam::<MockProvider>::default();
        assert_eq!(sam.get_challenge(0, 0).unwrap().len(), 8);
        assert!(matches!(sam.get_challenge(0, 1), Err(Error::IncorrectP1P2)));

        run_pace(&mut sam, CredentialSelector::Can);
        assert_eq!(sam.get_challenge(0, 0).unwrap().as_ref(), &mock::TA_NONCE);
    }

    #[test]
    fn test_ca_keys_switch_after_response() {
        let mut sam = Sam::<MockProvider>::default();
        run_pace(&mut sam, CredentialSelector::Can);
        sam.se.set_step(Step::TerminalAuthenticated);

        let mut template = wrap(&[0x80], oid::CA_ECDH_AES_CBC_CMAC_128);
        template.extend(wrap(&[0x84], &[13]));
        let response = send_protected(&mut sam, &mse(0x41, 0xA4, template));
        assert!(response.is_success());

        let request = ga(&[(0x80, &[0x04, 0x05])]);
        let response = send_protected(&mut sam, &request);
        assert!(response.is_success());
        assert_eq!(sam.security_environment().encryption(), Some(EacId::Ca));
        assert_eq!(sam.security_environment().ssc(), 0);
        assert!(!sam.security_environment().ca_keys_pending());
    }

    #[test]
    fn test_decode_le() {
        assert_eq!(decode_le(&[0x08]).unwrap(), 8);
        assert_eq!(decode_le(&[0x00]).unwrap(), 256);
        assert_eq!(decode_le(&[0x00, 0x00]).unwrap(), 65536);
        assert_eq!(decode_le(&[0x01, 0x00]).unwrap(), 256);
        assert!(decode_le(&[]).is_err());
    }
}
