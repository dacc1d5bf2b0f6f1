//! Demo server: accepts clients on a Unix socket and serves the globals
//! listed in the config.
//!
//! The accept loop is async; each client connection is a blocking loop on
//! tokio's blocking pool, since the core's [`Connection`] is synchronous.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};
use waywire_core::protocols::scanner_test::{self, wl_core, wl_requests};
use waywire_core::{ArgValue, Connection, Dispatcher, InterfaceCatalog, WireError};

use crate::config::PeerConfig;
use crate::transport::UnixSocketTransport;
use crate::PeerError;

/// How often blocked loops look at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Listens on the configured socket until `running` is cleared.
///
/// # Errors
///
/// [`PeerError::Socket`] if the socket cannot be bound.
pub async fn run(config: PeerConfig, running: Arc<AtomicBool>) -> Result<(), PeerError> {
    let catalog = Arc::new(scanner_test::catalog()?);
    let path = config.peer.socket_path.clone();
    let listener = bind(&path)?;
    info!(path = %path.display(), "listening");

    let mut next_client: u64 = 0;
    while running.load(Ordering::Relaxed) {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tokio::time::sleep(POLL_INTERVAL) => continue,
        };
        let stream = match accepted.and_then(|(stream, _)| stream.into_std()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        next_client += 1;
        let client_id = next_client;
        let catalog = Arc::clone(&catalog);
        let config = config.clone();
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = serve_client(client_id, stream, catalog, &config, &running) {
                error!(client_id, "client connection failed: {e}");
            }
        });
    }

    std::fs::remove_file(&path).ok();
    info!("server stopped");
    Ok(())
}

fn bind(path: &Path) -> Result<UnixListener, PeerError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|source| PeerError::Socket {
            path: path.to_path_buf(),
            source,
        })?;
    }
    UnixListener::bind(path).map_err(|source| PeerError::Socket {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs one client connection to completion.  Returns `Ok` when the client
/// hangs up or `running` is cleared.
///
/// # Errors
///
/// [`PeerError::Wire`] for a fatal protocol error (the client has been told
/// already), [`PeerError::Io`] if the socket cannot be configured.
pub fn serve_client(
    client_id: u64,
    stream: UnixStream,
    catalog: Arc<InterfaceCatalog>,
    config: &PeerConfig,
    running: &AtomicBool,
) -> Result<(), PeerError> {
    stream.set_nonblocking(false)?;
    let transport = UnixSocketTransport::new(stream);
    transport.set_read_timeout(Some(POLL_INTERVAL))?;

    let mut conn = Connection::server(transport, catalog, config.connection.clone())?;
    for global in &config.globals {
        conn.session_mut()
            .create_global(&global.interface, global.version)?;
    }
    install_handlers(conn.dispatcher_mut(), client_id);
    info!(client_id, globals = config.globals.len(), "client connected");

    while running.load(Ordering::Relaxed) {
        match conn.dispatch() {
            Ok(0) => {}
            Ok(n) => debug!(client_id, dispatched = n, "dispatched"),
            Err(WireError::ConnectionClosed) => {
                info!(client_id, "client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
    conn.flush()?;
    conn.close();
    Ok(())
}

/// Logs every `wl_requests` request; `wl_core.destroy` needs no action
/// beyond the destruction the runtime performs.
pub fn install_handlers(dispatcher: &mut Dispatcher, client_id: u64) {
    for opcode in 0..=wl_requests::NEW_ID_NO_INTERFACE {
        dispatcher.on(wl_requests::NAME, opcode, move |_session, incoming| {
            let created = incoming.created.as_ref().map(|object| object.to_string());
            let fds = incoming
                .args
                .iter()
                .filter(|arg| matches!(arg, ArgValue::Fd(_)))
                .count();
            info!(
                client_id,
                target = %incoming.target,
                request = incoming.name(),
                created = ?created,
                fds,
                "request"
            );
            Ok(())
        });
    }
    dispatcher.on(wl_core::NAME, wl_core::DESTROY, move |_session, incoming| {
        debug!(client_id, object = %incoming.target, "wl_core destroyed");
        Ok(())
    });
}
