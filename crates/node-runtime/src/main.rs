//! # Ferrite Node
//!
//! The node daemon entry point: load configuration, start the runtime,
//! run until interrupted, shut down cleanly.
//!
//! Exit codes: 0 clean, 1 configuration error, 2 storage error,
//! 3 network bind error.

use std::path::PathBuf;
use std::process::ExitCode;

use node_runtime::{Node, NodeConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var("FERRITE_CONFIG").ok().map(PathBuf::from)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = config_path_from_args();
    let config = match NodeConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "Configuration error");
            return ExitCode::from(1);
        }
    };

    let node = match Node::start(config).await {
        Ok(node) => node,
        Err(error) => {
            let code = error.exit_code();
            error!(%error, code, "Node failed to start");
            return ExitCode::from(code as u8);
        }
    };

    info!("Node is running; Ctrl+C to stop");
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "Signal handler failed");
    }

    node.shutdown().await;
    ExitCode::SUCCESS
}
