//! `brolinkctl`: operator entry point for the delivery state machine.
//!
//! Exit codes: 0 ok, 1 other failure, 2 configuration error, 3 registry
//! unreachable for the whole pass, 4 at least one message rejected.

mod commands;

use std::{path::PathBuf, process::ExitCode};

use brolink_config::{ConfigLoadError, ConfigLoaderOptions};
use brolink_core::{DeliveryError, ErrorClass};
use brolink_model::{DeliveryLogId, DeliveryPhase, DossierId, MessageKind, WellId};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "brolinkctl", version)]
#[command(about = "Deliver groundwater level dossiers to the BRO registry")]
struct Cli {
    /// Path to a brolink.toml (defaults to BROLINK_CONFIG_PATH, then ./brolink.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file to seed the environment from
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one delivery pass limited to start registrations
    SyncStarts,
    /// Run one delivery pass limited to observation additions
    SyncAdditions,
    /// Poll every non-terminal delivery log without selecting new work
    CheckStatus,
    /// Give a rejected or abandoned log a fresh queued attempt
    Requeue {
        /// Id of the delivery log to requeue
        log_id: DeliveryLogId,
    },
    /// Run one full delivery pass over all message kinds
    Tick,
    /// List delivery journal rows with attempt history
    Logs {
        /// Only rows of this dossier
        #[arg(long)]
        dossier: Option<DossierId>,
        /// Only rows in this phase (queued, submitted, pending, accepted, rejected, failed, abandoned)
        #[arg(long)]
        phase: Option<DeliveryPhase>,
        /// Only rows of this message kind (start, addition, correction, close)
        #[arg(long)]
        kind: Option<MessageKind>,
        /// Print rows as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load wells, nets, dossiers, observations and measurements from a JSON snapshot
    Import {
        /// Snapshot file to import
        snapshot: PathBuf,
    },
    /// Render registry documents without submitting them
    #[command(subcommand)]
    Render(RenderCommand),
}

#[derive(Debug, Subcommand)]
enum RenderCommand {
    /// Render the GMW construction document of a well
    Construction {
        /// Id of the well
        well_id: WellId,
        /// Write the document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
    };

    match commands::run(cli.command, options).await {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigLoadError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<DeliveryError>() {
        Some(delivery) if delivery.classification() == ErrorClass::Configuration => 2,
        _ => 1,
    }
}

/// What a successful command reports back to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ok,
    RegistryUnreachable,
    Rejections,
}

impl Outcome {
    fn code(self) -> u8 {
        match self {
            Outcome::Ok => 0,
            Outcome::RegistryUnreachable => 3,
            Outcome::Rejections => 4,
        }
    }
}
