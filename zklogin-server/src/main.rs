//! `zklogin-server` entry point.

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr as _;
use tokio::net::TcpListener;
use tracing::{info, warn};
use zklogin_core::{EphemeralKeyStore, InMemoryKeyStore, ProofOrchestrator};
use zklogin_server::{router, spawn_sweeper, telemetry, AppState, Args};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    let config = args.prover_config()?;
    let key_store: Arc<dyn EphemeralKeyStore> = Arc::new(InMemoryKeyStore::new());
    let orchestrator = Arc::new(
        ProofOrchestrator::from_config(&config, key_store)
            .wrap_err("failed to build the proof orchestrator")?,
    );
    if config.enable_mock {
        warn!("mock backend enabled: its proofs will not verify on chain");
    }

    let sweeper = spawn_sweeper(Arc::clone(&orchestrator), args.sweep_interval());
    let app = router(AppState { orchestrator }, &args.allowed_origins);

    let listener = TcpListener::bind(args.listen_addr)
        .await
        .wrap_err_with(|| format!("failed to bind {}", args.listen_addr))?;
    info!(
        addr = %args.listen_addr,
        backend = %config.default_backend,
        "zklogin server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server error")?;

    sweeper.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
