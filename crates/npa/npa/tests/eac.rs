//! Terminal and chip authentication after PACE

mod common;

use common::{card, chip_authentication, pace, terminal_authentication, transmit_protected};
use vnpa::{CardConfig, CredentialSelector, EacId, Sam, SoftProvider, Step, Terminal, constants::ins};
use vnpa_apdu_core::Command;

/// Auxiliary data asking for an age verification against 2026-10-18
const AUXILIARY_DATA: &str = "67177315060904007F00070301040253083230323631303138";

#[test]
fn test_full_eac() {
    let provider = SoftProvider::new();
    let chip_key = provider.chip_authentication_public_key();
    let mut sam = Sam::new(provider, Default::default());
    let mut terminal = pace(&mut sam, CredentialSelector::Pin);

    terminal_authentication(&mut sam, &mut terminal);
    assert_eq!(sam.security_environment().step(), Step::TerminalAuthenticated);

    chip_authentication(&mut sam, &mut terminal, &chip_key);
    let se = sam.security_environment();
    assert_eq!(se.encryption(), Some(EacId::Ca));
    assert_eq!(se.ssc(), 0);
    assert_eq!(terminal.ssc(), 0);

    // the channel now runs on the chip authentication keys
    for round in 1..=3u64 {
        let command = terminal.get_challenge();
        let response = transmit_protected(&mut sam, &mut terminal, &command);
        assert!(response.is_success());
        assert_eq!(sam.security_environment().ssc(), 2 * round);
    }
}

#[test]
fn test_eac_with_auxiliary_data() {
    let config = CardConfig {
        chip_authentication_key: Some(
            "C9AFA9D845BA75166B5C215767B1D6934E50C3DB36E89B127B8A622B120F6721".to_string(),
        ),
        ..Default::default()
    };
    let provider = SoftProvider::from_config(&config).unwrap();
    let chip_key = provider.chip_authentication_public_key();
    let mut sam = Sam::from_config(provider, &config);

    let mut terminal = Terminal::new(CredentialSelector::Can, config.can.as_bytes())
        .with_auxiliary_data(hex::decode(AUXILIARY_DATA).unwrap());
    let response = common::try_pace(&mut sam, &mut terminal);
    terminal.pace_finish(response.payload()).unwrap();

    terminal_authentication(&mut sam, &mut terminal);
    assert_eq!(
        sam.security_environment().authentication_template().auxiliary_data(),
        Some(hex::decode(AUXILIARY_DATA).unwrap().as_slice())
    );
    chip_authentication(&mut sam, &mut terminal, &chip_key);
    assert_eq!(sam.security_environment().encryption(), Some(EacId::Ca));
}

#[test]
fn test_untrusted_certificate() {
    let mut sam = card();
    let mut terminal = pace(&mut sam, CredentialSelector::Can);

    let chain = terminal.certificate_chain().unwrap();
    let (_, terminal_certificate) = &chain[1];
    // the terminal certificate is not signed by the trust anchor
    let command = terminal.verify_certificate(terminal_certificate);
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6900);
}

#[test]
fn test_external_authenticate_needs_certificate() {
    let mut sam = card();
    let mut terminal = pace(&mut sam, CredentialSelector::Can);

    let command = terminal.set_ta_template().unwrap();
    assert!(transmit_protected(&mut sam, &mut terminal, &command).is_success());
    let command = terminal.get_challenge();
    let challenge = transmit_protected(&mut sam, &mut terminal, &command);
    let command = terminal.external_authenticate(challenge.payload()).unwrap();
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6985);
    assert_eq!(sam.security_environment().step(), Step::PaceEstablished);
}

#[test]
fn test_wrong_signature() {
    let mut sam = card();
    let mut terminal = pace(&mut sam, CredentialSelector::Can);

    for (car, certificate) in terminal.certificate_chain().unwrap() {
        let command = terminal.set_signature_template(&car);
        transmit_protected(&mut sam, &mut terminal, &command);
        let command = terminal.verify_certificate(&certificate);
        assert!(transmit_protected(&mut sam, &mut terminal, &command).is_success());
    }
    let command = terminal.set_ta_template().unwrap();
    transmit_protected(&mut sam, &mut terminal, &command);
    let command = terminal.get_challenge();
    transmit_protected(&mut sam, &mut terminal, &command);

    // signed over another challenge
    let command = terminal.external_authenticate(&[0u8; 8]).unwrap();
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6985);
}

#[test]
fn test_protocol_order() {
    let mut sam = card();
    let mut terminal = pace(&mut sam, CredentialSelector::Can);

    // chip authentication before terminal authentication
    let command = terminal.set_ca_template();
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6983);

    let command = terminal.chip_authentication().unwrap();
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6A80);

    terminal_authentication(&mut sam, &mut terminal);

    // terminal authentication runs once
    let command = terminal.set_ta_template().unwrap();
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert_eq!(response.status().to_u16(), 0x6983);
}

#[test]
fn test_resume_pin_after_terminal_authentication() {
    let secrets = vnpa::Secrets::default().with_retries(1, 10);
    let mut sam = Sam::new(SoftProvider::new(), secrets);
    let mut terminal = pace(&mut sam, CredentialSelector::Can);
    terminal_authentication(&mut sam, &mut terminal);

    let command = Command::new(0x00, ins::RESET_RETRY_COUNTER, 0x03, 0x03);
    let response = transmit_protected(&mut sam, &mut terminal, &command);
    assert!(response.is_success());
    assert!(sam.secrets().pin_active());
    assert_eq!(sam.secrets().pin_retries(), 1);
}
