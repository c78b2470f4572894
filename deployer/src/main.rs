//! Deployer - Entry Point
//!
//! Receives signed webhooks and rolls Docker Compose stacks forward.

use std::env;
use std::process::ExitCode;

use deployer::app::options::AppOptions;
use deployer::app::run::run;
use deployer::logs::{init_logging, LogOptions};
use deployer::storage::settings::Settings;
use deployer::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let version = version_info();
    if env::args().skip(1).any(|arg| arg == "--version" || arg == "-V") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Configuration is read once; missing secrets refuse startup
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        format: settings.log_format,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::from_settings(settings);
    info!("Running deployer with options: {:?}", options);

    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the deployer: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
