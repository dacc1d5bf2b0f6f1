//! Byte stream plus fd side-channel abstraction.
//!
//! The core never touches sockets.  `waywire-peer` implements [`Transport`]
//! over a Unix stream socket with `SCM_RIGHTS`; tests use
//! [`crate::connection::MemoryTransport`] or the generated `MockTransport`.

use std::collections::VecDeque;
use std::io;
use std::os::fd::OwnedFd;

/// A reliable ordered byte stream that can carry file descriptors.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Writes all of `bytes`, passing `fds` alongside.  The descriptors are
    /// closed locally once sent.
    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> io::Result<()>;

    /// Reads into `buf`, appending any received descriptors to `fds`.
    ///
    /// `Ok(0)` is end of stream; [`io::ErrorKind::WouldBlock`] means no data
    /// is available yet.
    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> io::Result<()> {
        (**self).send(bytes, fds)
    }

    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        (**self).recv(buf, fds)
    }
}
