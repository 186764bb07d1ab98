//! Helpers shared by the integration tests
#![allow(dead_code)]

use vnpa::{CredentialSelector, Sam, Secrets, SoftProvider, Terminal};
use vnpa_apdu_core::{Command, Response};

/// Test card secrets
pub const PIN: &[u8] = b"111111";
pub const CAN: &[u8] = b"500540";
pub const PUK: &[u8] = b"987654321";
pub const MRZ: &[u8] = b"T220001293690806462208054";

/// Card with the default profile and a random chip authentication key
pub fn card() -> Sam<SoftProvider> {
    card_with(Secrets::default())
}

pub fn card_with(secrets: Secrets) -> Sam<SoftProvider> {
    Sam::new(SoftProvider::new(), secrets)
}

pub fn password(credential: CredentialSelector) -> &'static [u8] {
    match credential {
        CredentialSelector::Mrz => MRZ,
        CredentialSelector::Can => CAN,
        CredentialSelector::Pin => PIN,
        CredentialSelector::Puk => PUK,
    }
}

/// Send a command as raw bytes and parse the raw answer
pub fn transmit(sam: &mut Sam<SoftProvider>, command: &Command) -> Response {
    let apdu = command.to_bytes().unwrap();
    Response::from_bytes(&sam.process_apdu(&apdu)).unwrap()
}

/// Send a command under secure messaging and unwrap the answer
pub fn transmit_protected(
    sam: &mut Sam<SoftProvider>,
    terminal: &mut Terminal,
    command: &Command,
) -> Response {
    let protected = terminal.protect(command).unwrap();
    let response = transmit(sam, &protected);
    terminal.unprotect(&response).unwrap()
}

/// Run PACE, returning the answer to the last GENERAL AUTHENTICATE
pub fn try_pace(sam: &mut Sam<SoftProvider>, terminal: &mut Terminal) -> Response {
    let response = transmit(sam, &terminal.set_pace_template());
    assert!(response.status().is_success() || response.status().is_warning());

    let response = transmit(sam, &terminal.pace_start().unwrap());
    if !response.is_success() {
        return response;
    }
    let response = transmit(sam, &terminal.pace_map(response.payload()).unwrap());
    assert!(response.is_success(), "mapping failed: {}", response.status());
    let response = transmit(sam, &terminal.pace_key_agreement(response.payload()).unwrap());
    assert!(response.is_success(), "key agreement failed: {}", response.status());
    transmit(sam, &terminal.pace_mutual_authentication(response.payload()).unwrap())
}

/// Run PACE with the correct password and start secure messaging
pub fn pace(sam: &mut Sam<SoftProvider>, credential: CredentialSelector) -> Terminal {
    let mut terminal = Terminal::new(credential, password(credential));
    let response = try_pace(sam, &mut terminal);
    assert!(response.is_success(), "PACE failed: {}", response.status());
    terminal.pace_finish(response.payload()).unwrap();
    terminal
}

/// Run terminal authentication under secure messaging
pub fn terminal_authentication(sam: &mut Sam<SoftProvider>, terminal: &mut Terminal) {
    for (car, certificate) in terminal.certificate_chain().unwrap() {
        let command = terminal.set_signature_template(&car);
        let response = transmit_protected(sam, terminal, &command);
        assert!(response.is_success(), "MSE:SET DST failed: {}", response.status());
        let command = terminal.verify_certificate(&certificate);
        let response = transmit_protected(sam, terminal, &command);
        assert!(response.is_success(), "certificate rejected: {}", response.status());
    }

    let command = terminal.set_ta_template().unwrap();
    let response = transmit_protected(sam, terminal, &command);
    assert!(response.is_success(), "MSE:SET AT failed: {}", response.status());
    let command = terminal.get_challenge();
    let challenge = transmit_protected(sam, terminal, &command);
    assert_eq!(challenge.payload().len(), 8);
    let command = terminal.external_authenticate(challenge.payload()).unwrap();
    let response = transmit_protected(sam, terminal, &command);
    assert!(response.is_success(), "EXTERNAL AUTHENTICATE failed: {}", response.status());
}

/// Run chip authentication under secure messaging and switch the terminal's keys
pub fn chip_authentication(sam: &mut Sam<SoftProvider>, terminal: &mut Terminal, chip_key: &[u8]) {
    let command = terminal.set_ca_template();
    let response = transmit_protected(sam, terminal, &command);
    assert!(response.is_success(), "MSE:SET AT failed: {}", response.status());
    let command = terminal.chip_authentication().unwrap();
    let response = transmit_protected(sam, terminal, &command);
    assert!(response.is_success(), "chip authentication failed: {}", response.status());
    terminal.ca_finish(response.payload(), chip_key).unwrap();
}
