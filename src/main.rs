/// localmeta command line
///
/// One binary for both sides: the user-facing commands (`start`, `stop`, `status`,
/// `url`, `run`) talk to the supervisor, and the hidden `serve` command is the
/// daemon itself.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use localmeta::{
    config::Config,
    daemon::{StartOptions, Supervisor},
    server::{init_tracing, start_server},
};
use std::{path::PathBuf, process::ExitCode};

#[derive(Debug, Parser)]
#[command(name = "localmeta", version, about = "Local metadata service for workflow runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the background service (no-op if it is already running)
    Start(ServiceArgs),
    /// Stop the background service
    Stop,
    /// Show whether the service is running
    Status,
    /// Print the service URL
    Url,
    /// Run a command with the service started and its URL exported
    Run {
        #[command(flatten)]
        service: ServiceArgs,
        /// Command and arguments to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Serve in the foreground (used by `start`)
    #[command(hide = true)]
    Serve {
        #[command(flatten)]
        service: ServiceArgs,
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct ServiceArgs {
    /// Port to listen on (0 picks a free port)
    #[arg(long)]
    port: Option<u16>,
    /// Directory that holds (or will hold) `.metaflow/`
    #[arg(long)]
    root: Option<PathBuf>,
    /// Seconds without heartbeats before the service exits
    #[arg(long)]
    idle_timeout: Option<u64>,
}

impl ServiceArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.root {
            config.store.root_path = root.clone();
        }
        if let Some(secs) = self.idle_timeout {
            config.daemon.idle_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = Config::default();
    init_tracing(config.daemon.debug);

    match cli.command {
        Command::Serve { service, state_dir } => {
            service.apply(&mut config);
            if let Some(dir) = state_dir {
                config.daemon.state_dir = dir;
            }
            start_server(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Start(service) => {
            service.apply(&mut config);
            let state = Supervisor::from_config(&config)?
                .start(&StartOptions::from_config(&config))
                .await?;
            println!("Metadata service running at {} (pid {})", state.url(), state.pid);
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop => {
            if Supervisor::from_config(&config)?.stop() {
                println!("Metadata service stopped");
            } else {
                println!("Metadata service is not running");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => match Supervisor::from_config(&config)?.status() {
            Some(state) => {
                println!("Metadata service is running");
                println!("  pid:     {}", state.pid);
                println!("  url:     {}", state.url());
                println!("  root:    {}", state.root_path.display());
                println!("  started: {}", state.started_at.to_rfc3339());
                Ok(ExitCode::SUCCESS)
            }
            None => {
                println!("Metadata service is not running");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Url => match Supervisor::from_config(&config)?.status() {
            Some(state) => {
                println!("{}", state.url());
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Metadata service is not running");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Run { service, command } => {
            service.apply(&mut config);
            run_with_service(&config, &command).await
        }
    }
}

/// Ensure the daemon, then run `command` pointed at it and mirror its exit status
async fn run_with_service(config: &Config, command: &[String]) -> Result<ExitCode> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };

    let state = Supervisor::from_config(config)?
        .ensure_running(&StartOptions::from_config(config))
        .await?;
    tracing::info!("Running {:?} against {}", command, state.url());

    let status = tokio::process::Command::new(program)
        .args(args)
        .env("METAFLOW_SERVICE_URL", state.url())
        .env("METAFLOW_DEFAULT_METADATA", "service")
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program))?;

    Ok(match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}
