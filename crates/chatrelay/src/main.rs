//! chatrelay server process.
//!
//! Reads `HOST_IP`, `TCP_PORT` and `API_PORT` from the environment, starts
//! the relay, and shuts it down on a `q` line on stdin or Ctrl-C.
//! Log verbosity follows `RUST_LOG` (default `info`).

use chatrelay::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env()
        .inspect_err(|e| tracing::error!(error = %e, "invalid configuration"))?;
    tracing::info!(
        bind = %config.bind_addr(),
        api_port = config.api_port,
        "starting chatrelay"
    );

    let relay = Wrapper::bind(config).await?;
    tracing::info!(addr = %relay.local_addr(), "type q and press enter to stop");

    wait_for_stop().await;
    relay.shutdown().await
}

/// Resolves on a `q` line on stdin or on Ctrl-C, whichever comes first.
async fn wait_for_stop() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == "q" => {
                    tracing::info!("stop requested on stdin");
                    return;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    // No console; only a signal can stop us now.
                    wait_for_ctrl_c().await;
                    return;
                }
            },
            () = wait_for_ctrl_c() => return,
        }
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("interrupt received"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}
