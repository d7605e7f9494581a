//! `trellis` binary entrypoint: parses CLI arguments, builds a session from
//! them, and maps the session result onto the process exit code.

mod cli_args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use trellis_client::{
    ConfigChange, Credentials, NetworkProfile, Session, SessionConfig, SinkSelection, WsTransport,
    FAILURE_RESULT, SUCCESS_RESULT,
};
use trellis_protocol::decode_hex;

use crate::cli_args::Cli;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn session_config(cli: &Cli) -> Result<SessionConfig> {
    let payload = decode_hex(&cli.config_data)
        .with_context(|| format!("invalid --config-data payload '{}'", cli.config_data))?;
    let sinks = if cli.sink.is_empty() {
        SinkSelection::AllSinks
    } else {
        SinkSelection::Sinks(cli.sink.clone())
    };
    Ok(SessionConfig {
        endpoint: cli.endpoint.clone(),
        credentials: Credentials {
            username: cli.username.clone(),
            password: cli.password.clone(),
        },
        network: NetworkProfile {
            network_id: cli.network_id,
            name: cli.network_name.clone(),
            renamed: cli.network_rename.clone(),
            force_delete: cli.force_delete,
        },
        change: ConfigChange {
            network_id: cli.network_id,
            interval_seconds: cli.interval_seconds,
            payload,
            override_existing: cli.override_existing,
            sinks,
        },
        completion_timeout: Duration::from_secs(cli.completion_timeout_seconds),
    })
}

async fn run(cli: Cli) -> Result<i32> {
    let config = session_config(&cli)?;
    let session = Session::new(config, cli.flow.plan(), Arc::new(WsTransport::new()));
    let code = tokio::select! {
        code = session.run() => code,
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => warn!("interrupted; abandoning the session"),
                Err(error) => warn!("ctrl-c handler failed: {error}"),
            }
            FAILURE_RESULT
        }
    };
    info!(code, "session finished");
    Ok(code)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let code = run(cli).await?;
    if code != SUCCESS_RESULT {
        std::process::exit(1);
    }
    Ok(())
}
