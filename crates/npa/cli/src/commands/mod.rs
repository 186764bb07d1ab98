//! Subcommands of the simulator

mod config;
mod simulate;

use clap::ValueEnum;
use vnpa::CredentialSelector;

pub(crate) use config::config_command;
pub(crate) use simulate::{SimulateArgs, simulate_command};

/// PACE credential as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CredentialArg {
    Mrz,
    Can,
    Pin,
    Puk,
}

impl From<CredentialArg> for CredentialSelector {
    fn from(credential: CredentialArg) -> Self {
        match credential {
            CredentialArg::Mrz => Self::Mrz,
            CredentialArg::Can => Self::Can,
            CredentialArg::Pin => Self::Pin,
            CredentialArg::Puk => Self::Puk,
        }
    }
}
