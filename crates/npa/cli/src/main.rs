use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{CredentialArg, SimulateArgs, config_command, simulate_command};

#[derive(Parser)]
#[command(version, about = "Simulator for the EAC protocols of a virtual German eID card")]
struct Cli {
    /// Card profile (TOML); VNPA_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run PACE (and optionally TA and CA) against the virtual card
    Simulate {
        /// Credential the terminal uses for PACE
        #[arg(long, value_enum, default_value_t = CredentialArg::Can)]
        credential: CredentialArg,

        /// Password to try instead of the one in the card profile
        #[arg(long)]
        secret: Option<String>,

        /// Protected GET CHALLENGE round trips after the handshake
        #[arg(long, default_value_t = 1)]
        rounds: u32,

        /// Run terminal authentication after PACE
        #[arg(long)]
        ta: bool,

        /// Run chip authentication after terminal authentication
        #[arg(long, requires = "ta")]
        ca: bool,
    },

    /// Print the effective card profile with secrets masked
    Config,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Simulate {
            credential,
            secret,
            rounds,
            ta,
            ca,
        } => simulate_command(
            cli.config.as_deref(),
            SimulateArgs {
                credential,
                secret,
                rounds,
                ta,
                ca,
            },
        ),
        Commands::Config => config_command(cli.config.as_deref()),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();
}
