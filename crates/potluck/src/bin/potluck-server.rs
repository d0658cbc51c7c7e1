//! Potluck chat server.
//!
//! Serves the chat protocol over WebSocket until interrupted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use potluck::prelude::*;
use potluck::{DEFAULT_PORT, telemetry};
use tokio::signal;

#[derive(Debug, Parser)]
#[command(name = "potluck-server", version, about = "Owner/guest chat server for listings")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// JSON file mapping listing ids to owner ids: `{ "<listing>": "<owner>" }`.
    #[arg(long)]
    listings: Option<PathBuf>,

    /// Milliseconds between queue status reports.
    #[arg(long, default_value_t = 500)]
    watch_interval_ms: u64,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep message history in memory and replay it to joining participants.
    #[arg(long)]
    history: bool,
}

#[tokio::main]
async fn main() -> Result<(), PotluckError> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    let owners = match &args.listings {
        Some(path) => load_listings(path)?,
        None => {
            tracing::warn!("no --listings file given, every join will fail with NotFound");
            ListingOwners::new()
        }
    };
    tracing::info!(listings = owners.len(), "listings loaded");

    let builder = PotluckServer::builder()
        .bind(format!("{}:{}", args.address, args.port))
        .watch_interval(Duration::from_millis(args.watch_interval_ms));

    if args.history {
        serve(builder.history(MemoryHistory::new()), owners).await
    } else {
        serve(builder, owners).await
    }
}

async fn serve<H: ChatHistory>(
    builder: PotluckServerBuilder<H>,
    owners: ListingOwners,
) -> Result<(), PotluckError> {
    let server = builder.build(owners).await?;
    server.run_until(shutdown_signal()).await?;
    tracing::info!("Potluck server stopped");
    Ok(())
}

fn load_listings(path: &Path) -> Result<ListingOwners, PotluckError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PotluckError::Config(format!("reading {}: {e}", path.display())))?;
    let listings: HashMap<RoomId, ParticipantId> = serde_json::from_str(&raw)
        .map_err(|e| PotluckError::Config(format!("parsing {}: {e}", path.display())))?;
    Ok(listings.into_iter().collect())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("received SIGINT, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("received SIGTERM, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
