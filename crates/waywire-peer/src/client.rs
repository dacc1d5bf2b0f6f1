//! Demo client: lists the server's globals and exercises `wl_requests`.

use std::sync::Arc;

use tracing::info;
use waywire_core::display;
use waywire_core::protocols::scanner_test::{self, requests_descriptor, wl_requests};
use waywire_core::{Connection, Global};

use crate::config::PeerConfig;
use crate::transport::UnixSocketTransport;
use crate::PeerError;

/// What the client saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    pub globals: Vec<Global>,
    /// Version `wl_requests` was bound at, if the server offers it.
    pub bound_version: Option<u32>,
}

/// Connects to the configured socket and runs [`run_on`].
///
/// # Errors
///
/// [`PeerError::Socket`] if nobody listens at the socket path.
pub fn run(config: &PeerConfig) -> Result<ClientReport, PeerError> {
    let path = &config.peer.socket_path;
    let transport = UnixSocketTransport::connect(path).map_err(|source| PeerError::Socket {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "connected");
    run_on(transport, config)
}

/// Talks to a server over `transport`: fetches the globals, binds
/// `wl_requests` when offered and sends a few requests through it.
///
/// # Errors
///
/// [`PeerError::Wire`] for protocol errors, including one reported by the
/// server.
pub fn run_on(transport: UnixSocketTransport, config: &PeerConfig) -> Result<ClientReport, PeerError> {
    let catalog = Arc::new(scanner_test::catalog()?);
    let mut conn = Connection::client(transport, catalog, config.connection.clone())?;

    let registry = display::get_registry(conn.session_mut())?;
    conn.roundtrip()?;
    let globals: Vec<Global> = conn.session().globals().cloned().collect();
    for global in &globals {
        info!(
            name = global.name,
            interface = %global.interface,
            version = global.version,
            "global"
        );
    }

    let Some(offered) = conn.session().find_global(wl_requests::NAME).cloned() else {
        info!("server does not offer {}", wl_requests::NAME);
        conn.close();
        return Ok(ClientReport {
            globals,
            bound_version: None,
        });
    };

    let version = offered.version.min(wl_requests::VERSION);
    let proxy = display::bind(
        conn.session_mut(),
        &registry,
        offered.name,
        wl_requests::NAME,
        version,
    )?;
    let requests = requests_descriptor()?.proxy(proxy)?;

    requests.no_args(conn.session_mut())?;
    requests.allow_null(conn.session_mut(), 1, None)?;
    requests.allow_null(conn.session_mut(), 2, Some("text/plain"))?;
    let core = requests.create_id(conn.session_mut())?;
    requests.make_import(conn.session_mut(), Some(&core))?;
    core.destroy(conn.session_mut())?;
    if version >= 2 {
        requests.versioned(conn.session_mut())?;
    }
    conn.roundtrip()?;
    info!(version, "exercised {}", wl_requests::NAME);

    conn.close();
    Ok(ClientReport {
        globals,
        bound_version: Some(version),
    })
}
