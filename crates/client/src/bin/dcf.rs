//! DCF command-line tool
//!
//! Runs one command against a client built from the configuration file and
//! prints the result as text or JSON.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use dcf_client::{render_error, Command, CommandInterface, DcfClient};
use dcf_core::logging::{self, LogLevel};
use dcf_core::{DcfConfig, DcfError, LifecycleState, Mode};

#[derive(Parser)]
#[command(name = "dcf")]
#[command(about = "DCF - redundancy-aware messaging client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, or TOML by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Initial log level (0 = debug, 1 = info, 2 = error)
    #[arg(long, global = true)]
    log_level: Option<u8>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the client from the configuration
    Init,
    /// Start the client; in server mode, serve until interrupted
    Start,
    /// Stop the client
    Stop,
    /// Show lifecycle state, mode and peer count
    Status,
    /// Send a message
    Send {
        /// Message text
        data: String,
        /// Logical recipient
        recipient: String,
    },
    /// Wait for the next inbound message
    Receive,
    /// Probe one peer and print its RTT
    HealthCheck {
        /// Peer id
        peer: String,
    },
    /// List peers with their last RTT and group
    ListPeers,
    /// Reset a peer and regroup
    Heal {
        /// Peer id
        peer: String,
    },
    /// Print the SDK version
    Version,
    /// Time one health probe
    Benchmark {
        /// Peer id
        peer: String,
    },
    /// Probe every peer and reclassify them
    GroupPeers,
    /// Mark a peer unreachable
    SimulateFailure {
        /// Peer id
        peer: String,
    },
    /// Change the log level (0 = debug, 1 = info, 2 = error)
    LogLevel {
        level: u8,
    },
    /// Load a transport plugin artifact
    LoadPlugin {
        /// Artifact path
        path: String,
    },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Init => Command::Init,
            Commands::Start => Command::Start,
            Commands::Stop => Command::Stop,
            Commands::Status => Command::Status,
            Commands::Send { data, recipient } => Command::Send { data, recipient },
            Commands::Receive => Command::Receive,
            Commands::HealthCheck { peer } => Command::HealthCheck { peer },
            Commands::ListPeers => Command::ListPeers,
            Commands::Heal { peer } => Command::Heal { peer },
            Commands::Version => Command::Version,
            Commands::Benchmark { peer } => Command::Benchmark { peer },
            Commands::GroupPeers => Command::GroupPeers,
            Commands::SimulateFailure { peer } => Command::SimulateFailure { peer },
            Commands::LogLevel { level } => Command::LogLevel { level },
            Commands::LoadPlugin { path } => Command::LoadPlugin { path },
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DcfConfig, DcfError> {
    match path {
        Some(path) => Ok(DcfConfig::from_file(path)?),
        None => Ok(DcfConfig::default()),
    }
}

async fn run(cli: Cli) -> Result<(), DcfError> {
    let initial_level = cli.log_level.map(LogLevel::try_from).transpose()?;
    let handle = if cli.json_logs {
        logging::init_json(initial_level)
    } else {
        logging::init(initial_level)
    };

    let config = load_config(cli.config.as_ref())?;
    let mut client = DcfClient::default();
    if let Some(handle) = handle {
        client = client.with_log_handle(handle);
    }

    let command = Command::from(cli.command);
    let serve = command == Command::Start;
    let mut iface = CommandInterface::new(client, config);

    let result = async {
        iface.prepare(&command).await?;
        iface.execute(command).await
    }
    .await;
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let _ = iface.finish().await;
            return Err(e);
        }
    };
    println!("{}", output.render(cli.json));

    if serve
        && iface.mode() == Mode::Server
        && iface.client().state() == LifecycleState::Running
    {
        tracing::info!("serving until interrupted");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to wait for interrupt");
        }
    }

    iface.finish().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(&e, json));
            ExitCode::FAILURE
        }
    }
}
