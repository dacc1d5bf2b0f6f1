//! In-process transport pair.
//!
//! Both ends are non-blocking: `recv` on an empty, open channel returns
//! `WouldBlock`, so a single thread can drive a client and a server in turn.

use std::collections::VecDeque;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};

use crate::connection::transport::Transport;

#[derive(Debug, Default)]
struct Channel {
    bytes: VecDeque<u8>,
    fds: VecDeque<OwnedFd>,
    closed: bool,
}

type Shared = Arc<Mutex<Channel>>;

/// One end of an in-memory stream.  Dropping it closes the stream for the
/// peer once the peer has drained what was sent.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: Shared,
    outbound: Shared,
    bytes_sent: usize,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let a_to_b: Shared = Arc::default();
        let b_to_a: Shared = Arc::default();
        (
            MemoryTransport {
                inbound: Arc::clone(&b_to_a),
                outbound: Arc::clone(&a_to_b),
                bytes_sent: 0,
            },
            MemoryTransport {
                inbound: a_to_b,
                outbound: b_to_a,
                bytes_sent: 0,
            },
        )
    }

    /// Total bytes written by this end.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Bytes sent by the peer and not yet read by this end.
    pub fn pending(&self) -> usize {
        self.inbound.lock().map(|c| c.bytes.len()).unwrap_or_default()
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "memory transport lock poisoned")
}

impl Transport for MemoryTransport {
    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> io::Result<()> {
        let mut channel = self.outbound.lock().map_err(|_| poisoned())?;
        if channel.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        channel.bytes.extend(bytes);
        channel.fds.extend(fds);
        self.bytes_sent += bytes.len();
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let mut channel = self.inbound.lock().map_err(|_| poisoned())?;
        if channel.bytes.is_empty() {
            if channel.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(channel.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(channel.bytes.drain(..n)) {
            *slot = byte;
        }
        fds.extend(channel.fds.drain(..));
        Ok(n)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        for shared in [&self.outbound, &self.inbound] {
            if let Ok(mut channel) = shared.lock() {
                channel.closed = true;
            }
        }
    }
}
