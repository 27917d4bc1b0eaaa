use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroize;

use tpmtools::commands::{self, ChangePinRequest, Command, InitRequest, SoPinSource};
use tpmtools::config::LogLevel;
use tpmtools::console::TerminalConsole;
use tpmtools::secret::{Encoding, Secret};
use tpmtools::token::{Pkcs11Provider, UserRole};
use tpmtools::ToolConfig;

#[derive(Parser)]
#[command(name = "tpmtools")]
#[command(about = "Manage the PINs of the PKCS#11 TPM token", version)]
struct Cli {
    /// Log level: none, error, info or debug
    #[arg(long, global = true, value_name = "LEVEL")]
    log: Option<LogLevel>,

    /// Pass PINs to the token as UTF-16LE
    #[arg(short, long, global = true)]
    unicode: bool,

    /// PKCS#11 module to load
    #[arg(long, global = true, value_name = "PATH")]
    module: Option<PathBuf>,

    /// Token slot id
    #[arg(long, global = true, value_name = "ID")]
    slot: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear the token and set new SO and user PINs
    TokenInit {
        /// Clear an initialized token without asking
        #[arg(short, long)]
        yes: bool,

        /// Current SO PIN of an initialized token (visible to other local users)
        #[arg(long, value_name = "PIN", conflicts_with = "so_well_known")]
        so_pin: Option<String>,

        /// The initialized token still has the well-known SO PIN
        #[arg(long)]
        so_well_known: bool,
    },
    /// Change the user PIN, or the SO PIN with --security-officer
    ChangePin {
        #[arg(long)]
        security_officer: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ToolConfig::load()?;
    if let Some(module) = cli.module {
        config.pkcs11.module = module;
    }
    if cli.slot.is_some() {
        config.pkcs11.slot = cli.slot;
    }

    // --log wins over RUST_LOG, which wins over the config file.
    let filter = match cli.log {
        Some(level) => EnvFilter::new(level.as_filter()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_filter())),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!(module = %config.pkcs11.module.display(), slot = ?config.pkcs11.slot, "Configuration loaded");

    let encoding = if cli.unicode {
        Encoding::Wide
    } else {
        Encoding::Native
    };
    let max_pin_attempts = config.pin.max_attempts;

    let command = match cli.command {
        Commands::TokenInit {
            yes,
            so_pin,
            so_well_known,
        } => {
            let so_pin = match so_pin {
                Some(mut text) => {
                    let secret = Secret::from_slice(text.as_bytes());
                    text.zeroize();
                    SoPinSource::Supplied(secret)
                }
                None if so_well_known => SoPinSource::WellKnown,
                None => SoPinSource::Prompt,
            };
            Command::TokenInit(InitRequest {
                assume_yes: yes,
                so_pin,
                encoding,
                max_pin_attempts,
            })
        }
        Commands::ChangePin { security_officer } => Command::ChangePin(ChangePinRequest {
            role: if security_officer {
                UserRole::SecurityOfficer
            } else {
                UserRole::User
            },
            encoding,
            max_pin_attempts,
        }),
    };

    let mut console = TerminalConsole::new();
    let mut provider = Pkcs11Provider::new(config.pkcs11);
    let status = commands::execute(&command, &mut console, &mut provider);

    Ok(ExitCode::from(status.exit_code()))
}
