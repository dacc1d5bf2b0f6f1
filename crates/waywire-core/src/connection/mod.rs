//! A [`Session`] wired to a [`Transport`].
//!
//! [`Connection`] owns the inbound byte buffer and descriptor queue, frames
//! messages out of them and runs each through decode, registration, core
//! handling, user dispatch and destructor completion in order.  Errors are
//! classified with [`WireError::is_fatal`]: fatal ones close the connection
//! (a server first reports them with `wl_display.error`), the rest are
//! logged and the offending message skipped.

pub mod config;
pub mod memory;
pub mod transport;

pub use config::{ConnectionConfig, Strictness};
pub use memory::MemoryTransport;
pub use transport::Transport;

#[cfg(test)]
pub use transport::MockTransport;

use std::collections::{HashSet, VecDeque};
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, info, warn};

use crate::display::{self, wl_callback, DisplayError, DISPLAY_ID};
use crate::error::{Result, WireError};
use crate::object::Side;
use crate::protocol::{decode_message, discard_message, MessageHeader};
use crate::runtime::{Dispatcher, Proxy, Session};
use crate::schema::InterfaceCatalog;

pub struct Connection<T: Transport> {
    transport: T,
    session: Session,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
    inbound: BytesMut,
    fds: VecDeque<OwnedFd>,
    /// Target of the message being processed, for error reports.
    current_target: Option<u32>,
    /// Client side: callbacks whose `done` event has arrived.
    completed_callbacks: HashSet<u32>,
    closed: bool,
}

impl<T: Transport> Connection<T> {
    /// Creates the client end.  The display proxy exists immediately.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] if `catalog` lacks a core interface.
    pub fn client(transport: T, catalog: Arc<InterfaceCatalog>, config: ConnectionConfig) -> Result<Self> {
        Self::new(Side::Client, transport, catalog, config)
    }

    /// Creates the server end.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] if `catalog` lacks a core interface.
    pub fn server(transport: T, catalog: Arc<InterfaceCatalog>, config: ConnectionConfig) -> Result<Self> {
        Self::new(Side::Server, transport, catalog, config)
    }

    fn new(
        side: Side,
        transport: T,
        catalog: Arc<InterfaceCatalog>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let session = Session::new(side, catalog)?;
        info!(%side, strictness = ?config.strictness, "connection opened");
        Ok(Self {
            transport,
            session,
            dispatcher: Dispatcher::new(),
            inbound: BytesMut::with_capacity(config.read_chunk_size),
            config,
            fds: VecDeque::new(),
            current_target: None,
            completed_callbacks: HashSet::new(),
            closed: false,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Client-side display proxy.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] once the connection is closed.
    pub fn display(&self) -> Result<Proxy> {
        self.session.display()
    }

    // ── I/O ───────────────────────────────────────────────────────────────────

    /// Writes every queued message to the transport.  Returns the bytes sent.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionClosed`] if closed, [`WireError::Io`] (fatal)
    /// if the transport fails.
    pub fn flush(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let mut sent = 0;
        while let Some(message) = self.session.pop_outgoing() {
            let len = message.bytes.len();
            if let Err(err) = self.transport.send(&message.bytes, message.fds) {
                return Err(self.fail(err.into()));
            }
            sent += len;
        }
        Ok(sent)
    }

    /// Reads what the transport has available into the inbound buffer.
    /// Returns the bytes read; `0` means nothing was available.
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionClosed`] at end of stream, [`WireError::Io`] if
    /// the transport fails.  Both close the connection.
    pub fn read(&mut self) -> Result<usize> {
        self.ensure_open()?;
        // Receive straight into the tail of the inbound buffer; consumed
        // messages are advanced past, so its allocation is reused.
        let start = self.inbound.len();
        self.inbound.resize(start + self.config.read_chunk_size.max(1), 0);
        let received = self.transport.recv(&mut self.inbound[start..], &mut self.fds);
        self.inbound.truncate(start + received.as_ref().map_or(0, |&n| n));
        match received {
            Ok(0) => {
                info!(side = %self.session.side(), "peer closed the connection");
                self.shut_down();
                Err(WireError::ConnectionClosed)
            }
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Processes every complete message in the inbound buffer.  Returns the
    /// number handed to handlers.
    ///
    /// # Errors
    ///
    /// The first fatal error; the connection is closed by then.
    pub fn dispatch_pending(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let mut dispatched = 0;
        loop {
            self.current_target = None;
            match self.process_one() {
                Ok(Some(true)) => dispatched += 1,
                Ok(Some(false)) => {}
                Ok(None) => break,
                Err(err) if err.is_fatal(self.config.strictness) => return Err(self.fail(err)),
                Err(err) => warn!(%err, "skipping message"),
            }
        }
        Ok(dispatched)
    }

    /// Flushes, reads once and dispatches what arrived.
    ///
    /// # Errors
    ///
    /// As [`Connection::flush`], [`Connection::read`] and
    /// [`Connection::dispatch_pending`].
    pub fn dispatch(&mut self) -> Result<usize> {
        self.flush()?;
        self.read()?;
        self.dispatch_pending()
    }

    // ── Round trips ───────────────────────────────────────────────────────────

    /// Client side: queues `wl_display.sync` and returns the callback id to
    /// poll with [`Connection::sync_done`].
    ///
    /// # Errors
    ///
    /// [`WireError::ConnectionClosed`] if closed.
    pub fn sync(&mut self) -> Result<u32> {
        self.ensure_open()?;
        Ok(display::sync(&mut self.session)?.id())
    }

    /// Returns `true` once, when the `done` event of `callback` has been
    /// dispatched.
    pub fn sync_done(&mut self, callback: u32) -> bool {
        self.completed_callbacks.remove(&callback)
    }

    /// Client side: blocks until the server has processed every request sent
    /// so far.  Returns the number of messages dispatched meanwhile.
    ///
    /// # Errors
    ///
    /// A fatal connection error, or [`WireError::Io`] with
    /// [`io::ErrorKind::WouldBlock`] if the transport runs dry first (only
    /// possible with a non-blocking transport; the connection stays open).
    pub fn roundtrip(&mut self) -> Result<usize> {
        let callback = self.sync()?;
        let mut dispatched = 0;
        loop {
            self.flush()?;
            dispatched += self.dispatch_pending()?;
            if self.sync_done(callback) {
                return Ok(dispatched);
            }
            if self.read()? == 0 {
                return Err(WireError::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "no reply from the server yet",
                )));
            }
        }
    }

    /// Closes the connection and invalidates every object.
    pub fn close(&mut self) {
        if !self.closed {
            info!(side = %self.session.side(), "closing connection");
            self.shut_down();
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Handles the message at the front of the buffer.  `None` when no
    /// complete message is buffered, `Some(false)` when it was discarded.
    fn process_one(&mut self) -> Result<Option<bool>> {
        let Some(header) = MessageHeader::parse(&self.inbound)? else {
            return Ok(None);
        };
        let size = usize::from(header.size);
        if self.inbound.len() < size {
            return Ok(None);
        }
        self.current_target = Some(header.object_id);
        let direction = self.session.inbound_direction();

        let registry = self.session.registry();
        let zombie = registry.zombie(header.object_id).cloned();
        // Descriptors may trail the bytes that reference them.
        let fds_needed = zombie
            .as_deref()
            .or_else(|| registry.get(header.object_id).map(|target| Arc::as_ref(target.interface())))
            .and_then(|interface| interface.message(direction, header.opcode).ok())
            .map_or(0, |sig| sig.fd_count());
        if self.fds.len() < fds_needed {
            return Ok(None);
        }

        if let Some(interface) = zombie {
            let discarded = discard_message(&self.inbound[..size], &interface, direction, &mut self.fds);
            self.inbound.advance(size);
            discarded?;
            return Ok(Some(false));
        }

        let decoded = decode_message(
            &self.inbound[..size],
            direction,
            self.session.registry(),
            self.session.catalog(),
            &mut self.fds,
        );
        self.inbound.advance(size);
        let (decoded, _) = decoded?;

        let target_id = decoded.target.id();
        let destructor = decoded.signature().destructor;
        let incoming = self.session.accept(decoded)?;

        if self.session.side() == Side::Client
            && incoming.interface_name() == wl_callback::NAME
            && incoming.opcode == wl_callback::EVT_DONE
        {
            self.completed_callbacks.insert(target_id);
        }

        let core = display::handle_core(&mut self.session, &incoming)?;
        let handled = if core && !self.dispatcher.has_handler(incoming.interface_name(), incoming.opcode) {
            Ok(())
        } else {
            self.dispatcher.dispatch(&mut self.session, incoming)
        };
        // A destructor ends the target even when nobody handled it.
        self.session.finish(target_id, destructor)?;
        handled?;
        Ok(Some(true))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(WireError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Closes after a fatal error and hands the error back.  A server tells
    /// the client what went wrong first.
    fn fail(&mut self, err: WireError) -> WireError {
        if self.session.side() == Side::Server && reportable(&err) {
            let object_id = match err {
                WireError::UnknownObject(_) => DISPLAY_ID,
                _ => self.current_target.unwrap_or(DISPLAY_ID),
            };
            let code = DisplayError::for_error(&err).code();
            match self.session.post_error(object_id, code, &err.to_string()) {
                Ok(()) => self.flush_best_effort(),
                Err(post_err) => warn!(%post_err, "could not report protocol error"),
            }
        }
        warn!(side = %self.session.side(), %err, "closing connection after fatal error");
        self.shut_down();
        err
    }

    fn flush_best_effort(&mut self) {
        while let Some(message) = self.session.pop_outgoing() {
            if let Err(err) = self.transport.send(&message.bytes, message.fds) {
                debug!(%err, "dropping remaining output");
                break;
            }
        }
    }

    fn shut_down(&mut self) {
        self.closed = true;
        self.inbound.clear();
        self.fds.clear();
        self.completed_callbacks.clear();
        self.session.teardown();
    }
}

/// Errors that describe something the client sent.
fn reportable(err: &WireError) -> bool {
    !matches!(
        err,
        WireError::Io(_) | WireError::ConnectionClosed | WireError::PeerError { .. }
    )
}
