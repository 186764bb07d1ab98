use std::path::Path;

use eyre::{Context, bail, eyre};
use tracing::{debug, info};
use vnpa::{CardConfig, CredentialSelector, Sam, SoftProvider, Terminal};
use vnpa_apdu_core::{Command, Response};

use super::CredentialArg;

/// Options of the `simulate` subcommand
#[derive(Debug)]
pub(crate) struct SimulateArgs {
    pub(crate) credential: CredentialArg,
    pub(crate) secret: Option<String>,
    pub(crate) rounds: u32,
    pub(crate) ta: bool,
    pub(crate) ca: bool,
}

/// Terminal and card connected by a loopback "reader"
struct Session {
    sam: Sam<SoftProvider>,
    terminal: Terminal,
}

impl Session {
    /// Exchange raw APDUs with the card
    fn transmit(&mut self, command: &Command) -> eyre::Result<Response> {
        let apdu = command.to_bytes()?;
        debug!(command = %hex::encode_upper(&apdu), "> ");
        let answer = self.sam.process_apdu(&apdu);
        debug!(response = %hex::encode_upper(&answer), "< ");
        Ok(Response::from_bytes(&answer)?)
    }

    fn transmit_protected(&mut self, command: &Command) -> eyre::Result<Response> {
        let protected = self.terminal.protect(command)?;
        let response = self.transmit(&protected)?;
        Ok(self.terminal.unprotect(&response)?)
    }

    fn pace(&mut self) -> eyre::Result<()> {
        let command = self.terminal.set_pace_template();
        let response = self.transmit(&command)?;
        if let Some(tries) = response.status().retries_remaining() {
            info!(tries, "PIN retry counter");
        }
        ensure_not_error(&response, "MSE:SET AT")?;

        let command = self.terminal.pace_start()?;
        let response = expect_success(self.transmit(&command)?, "PACE nonce")?;
        let command = self.terminal.pace_map(response.payload())?;
        let response = expect_success(self.transmit(&command)?, "PACE mapping")?;
        let command = self.terminal.pace_key_agreement(response.payload())?;
        let response = expect_success(self.transmit(&command)?, "PACE key agreement")?;
        let command = self.terminal.pace_mutual_authentication(response.payload())?;
        let response = expect_success(self.transmit(&command)?, "PACE mutual authentication")?;
        self.terminal.pace_finish(response.payload())?;
        info!("PACE established");
        Ok(())
    }

    fn terminal_authentication(&mut self) -> eyre::Result<()> {
        for (car, certificate) in self.terminal.certificate_chain()? {
            let command = self.terminal.set_signature_template(&car);
            expect_success(self.transmit_protected(&command)?, "MSE:SET DST")?;
            let command = self.terminal.verify_certificate(&certificate);
            expect_success(self.transmit_protected(&command)?, "PSO:VERIFY CERTIFICATE")?;
        }

        let command = self.terminal.set_ta_template()?;
        expect_success(self.transmit_protected(&command)?, "MSE:SET AT")?;
        let command = self.terminal.get_challenge();
        let challenge = expect_success(self.transmit_protected(&command)?, "GET CHALLENGE")?;
        let command = self.terminal.external_authenticate(challenge.payload())?;
        expect_success(self.transmit_protected(&command)?, "EXTERNAL AUTHENTICATE")?;
        info!("Terminal authenticated");
        Ok(())
    }

    fn chip_authentication(&mut self, chip_public_key: &[u8]) -> eyre::Result<()> {
        let command = self.terminal.set_ca_template();
        expect_success(self.transmit_protected(&command)?, "MSE:SET AT")?;
        let command = self.terminal.chip_authentication()?;
        let response = expect_success(self.transmit_protected(&command)?, "chip authentication")?;
        self.terminal.ca_finish(response.payload(), chip_public_key)?;
        info!("Chip authenticated");
        Ok(())
    }
}

fn expect_success(response: Response, what: &str) -> eyre::Result<Response> {
    let sw = response.status();
    if !sw.is_success() {
        bail!("{what} failed: {sw} ({})", sw.description());
    }
    Ok(response)
}

fn ensure_not_error(response: &Response, what: &str) -> eyre::Result<()> {
    let sw = response.status();
    if !sw.is_success() && !sw.is_warning() {
        bail!("{what} failed: {sw} ({})", sw.description());
    }
    Ok(())
}

fn profile_secret(config: &CardConfig, credential: CredentialSelector) -> &str {
    match credential {
        CredentialSelector::Mrz => &config.mrz,
        CredentialSelector::Can => &config.can,
        CredentialSelector::Pin => &config.pin,
        CredentialSelector::Puk => &config.puk,
    }
}

/// Run the handshakes and the protected round trips
pub(crate) fn simulate_command(path: Option<&Path>, args: SimulateArgs) -> eyre::Result<()> {
    let config = CardConfig::load(path).wrap_err("loading card profile")?;
    let provider = SoftProvider::from_config(&config)?;
    let chip_public_key = provider.chip_authentication_public_key();

    let credential = CredentialSelector::from(args.credential);
    let secret = args
        .secret
        .as_deref()
        .unwrap_or_else(|| profile_secret(&config, credential));
    let mut session = Session {
        sam: Sam::from_config(provider, &config),
        terminal: Terminal::new(credential, secret.as_bytes()),
    };

    session.pace()?;
    if args.ta {
        session.terminal_authentication()?;
    }
    if args.ca {
        session.chip_authentication(&chip_public_key)?;
    }

    for round in 1..=args.rounds {
        let command = session.terminal.get_challenge();
        let response = expect_success(session.transmit_protected(&command)?, "GET CHALLENGE")?;
        info!(round, challenge = %hex::encode_upper(response.payload()), "Protected round trip");
    }

    let se = session.sam.security_environment();
    let secrets = session.sam.secrets();
    println!("Credential:  {credential}");
    println!("Step:        {}", se.step().number());
    println!(
        "Algorithm:   {}",
        se.authentication_template()
            .algorithm()
            .map_or_else(|| "none".to_string(), |algorithm| format!("{algorithm:?}"))
    );
    println!(
        "Keys:        {}",
        se.encryption()
            .ok_or_else(|| eyre!("secure messaging not established"))?
    );
    println!("SSC:         {}", se.ssc());
    println!(
        "PIN:         {} tries, {}",
        secrets.pin_retries(),
        if secrets.pin_active() { "active" } else { "suspended" }
    );
    println!("PUK:         {} tries", secrets.puk_retries());
    Ok(())
}
