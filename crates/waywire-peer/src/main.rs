//! waywire peer entry point.
//!
//! Loads the TOML config, initialises logging and runs either the demo
//! server or the demo client over a Unix socket.
//!
//! ```text
//! main()
//!  └─ load_config()            -- $WAYWIRE_CONFIG or XDG config dir
//!  └─ mode = "server"
//!  │    └─ server::run()       -- accept loop, one blocking task per client
//!  └─ mode = "client"
//!       └─ client::run()       -- registry listing + wl_requests exercise
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::info;
use tracing_subscriber::EnvFilter;

use waywire_peer::{client, load_config, server, PeerMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.peer.log_level)),
        )
        .init();

    info!(mode = ?config.peer.mode, socket = %config.peer.socket_path.display(), "waywire peer starting");

    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    match config.peer.mode {
        PeerMode::Server => server::run(config, running).await?,
        PeerMode::Client => {
            let report = tokio::task::spawn_blocking(move || client::run(&config)).await??;
            info!(
                globals = report.globals.len(),
                bound_version = ?report.bound_version,
                "client finished"
            );
        }
    }

    info!("waywire peer stopped");
    Ok(())
}
