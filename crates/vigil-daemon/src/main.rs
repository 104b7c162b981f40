//! Entry point for the `vigil` binary.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use vigil_common_config::{ConfigError, Environment};
use vigil_daemon::Cli;

/// Process exit codes.
#[repr(u8)]
enum Exit {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

fn main() -> ExitCode {
    // .env files feed both clap's env fallbacks and the config overrides.
    Environment::init();
    let cli = Cli::parse();

    if let Err(e) = vigil_common_log::init(cli.log_config()) {
        eprintln!("vigil: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("vigil: failed to start runtime: {e}");
            return Exit::GeneralError.into();
        }
    };

    match runtime.block_on(cli.execute()) {
        Ok(()) => Exit::Success.into(),
        Err(e) => {
            error!("{e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                Exit::ConfigError.into()
            } else {
                Exit::GeneralError.into()
            }
        }
    }
}
