//! Command-line interface.

use crate::daemon;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use std::io::Read;
use std::path::PathBuf;
use vigil_common_config::{expand_home, ConfigLoader, VigilConfig, CONFIG_FILE_NAME};
use vigil_common_log::{LogConfig, LogLevel};
use vigil_event_bus::send_payload;

/// Vigil - host-local security telemetry bus
#[derive(Debug, Parser)]
#[command(name = "vigil", author, version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the event bus until interrupted
    Run(ConfigArgs),

    /// Send one event to a running daemon's ingress socket
    Submit(SubmitArgs),

    /// Load and validate the configuration, then print it
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file (defaults to ~/.vigil/vigil.yaml)
    #[arg(short, long, env = "VIGIL_CONFIG_PATH", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn loader(&self) -> ConfigLoader {
        match &self.config {
            Some(path) => ConfigLoader::new(path),
            None => ConfigLoader::new(expand_home("~/.vigil").join(CONFIG_FILE_NAME)),
        }
    }

    /// An explicitly named file must exist; the default location may not.
    pub fn load(&self) -> Result<VigilConfig> {
        let loader = self.loader();
        let config = if self.config.is_some() {
            loader.load_required()
        } else {
            loader.load()
        };
        Ok(config?)
    }
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Ingress socket path
    #[arg(short, long, env = "VIGIL_SOCKET_PATH", default_value = "/tmp/vigil.sock", value_hint = ValueHint::FilePath)]
    pub socket: PathBuf,

    /// Event as a JSON object, or `-` to read it from stdin
    pub event: String,
}

impl Cli {
    /// Logging settings from the environment, raised by `-v`.
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env();
        match self.verbose {
            0 => {}
            1 => config.level = LogLevel::Debug,
            _ => config.level = LogLevel::Trace,
        }
        config
    }

    pub async fn execute(self) -> Result<()> {
        match self.command {
            Command::Run(args) => {
                let config = args.load()?;
                daemon::run(config, daemon::shutdown_signal()).await?;
                Ok(())
            }
            Command::Submit(args) => submit(args).await,
            Command::CheckConfig(args) => check_config(args),
        }
    }
}

async fn submit(args: SubmitArgs) -> Result<()> {
    let payload = if args.event == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read event from stdin")?;
        input
    } else {
        args.event
    };

    let value: serde_json::Value =
        serde_json::from_str(payload.trim()).context("event is not valid JSON")?;
    if !value.is_object() {
        bail!("event must be a JSON object");
    }

    send_payload(&args.socket, value.to_string().as_bytes())
        .await
        .with_context(|| format!("failed to submit to {}", args.socket.display()))?;
    Ok(())
}

fn check_config(args: ConfigArgs) -> Result<()> {
    let loader = args.loader();
    let config = args.load()?;
    println!("# {} (valid)", loader.path().display());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
