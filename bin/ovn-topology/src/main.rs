use std::process::ExitCode;

use clap::Parser;
use topology_core::TopologyError;
use tracing::{debug, info_span, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod cli;
mod commands;
mod settings;

use cli::Cli;
use settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let run_id = Uuid::new_v4();
    let span = info_span!("ovn_topology", run_id = %run_id);
    let result = async {
        let settings = Settings::load(cli.config.as_deref())?;
        debug!(?settings, "Effective settings");
        commands::run(cli.command, settings).await
    }
    .instrument(span)
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Logs go to stderr so stdout carries only the diagram. `RUST_LOG` wins
/// over the verbosity flag.
fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<TopologyError>()
        .map(|e| e.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}
