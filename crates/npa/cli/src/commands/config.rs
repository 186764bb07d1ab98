use std::path::Path;

use vnpa::CardConfig;

/// Print the effective card profile
pub(crate) fn config_command(path: Option<&Path>) -> eyre::Result<()> {
    let config = CardConfig::load(path)?.masked();

    println!("PIN:            {} ({} tries)", config.pin, config.pin_retries);
    println!("CAN:            {}", config.can);
    println!("PUK:            {} ({} tries)", config.puk, config.puk_retries);
    println!("MRZ:            {}", config.mrz);
    println!("CA reference:   {}", config.ca_reference);
    println!("EF.CardAccess:  {}", hex::encode_upper(&config.ef_card_access));
    println!(
        "CA key:         {}",
        config.chip_authentication_key.as_deref().unwrap_or("random")
    );
    Ok(())
}
