//! [`Transport`] over a Unix stream socket.
//!
//! Bytes go through `sendmsg`/`recvmsg`; descriptors ride along as
//! `SCM_RIGHTS` control messages, at most [`MAX_FDS_PER_MESSAGE`] per call.
//! A larger batch is spread over several calls, each carrying at least one
//! byte of the message.

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::ptr;
use std::time::Duration;

use waywire_core::Transport;

/// Descriptors carried by a single `sendmsg`.
pub const MAX_FDS_PER_MESSAGE: usize = 28;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

#[derive(Debug)]
pub struct UnixSocketTransport {
    stream: UnixStream,
}

impl UnixSocketTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Connects to a listening peer at `path`.
    ///
    /// # Errors
    ///
    /// Whatever `connect(2)` reports.
    pub fn connect(path: &Path) -> io::Result<Self> {
        UnixStream::connect(path).map(Self::new)
    }

    /// Bounds how long a read blocks; an expired read reports no data.
    ///
    /// # Errors
    ///
    /// Whatever `setsockopt(2)` reports.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    fn send_chunk(&self, bytes: &[u8], fds: &[OwnedFd]) -> io::Result<usize> {
        let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        let payload_len = mem::size_of_val(raw.as_slice());
        let mut control = control_buffer(raw.len());

        let mut iov = libc::iovec {
            iov_base: bytes.as_ptr() as *mut libc::c_void,
            iov_len: bytes.len(),
        };
        // SAFETY: msghdr is plain data; all-zero is a valid empty header.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if !raw.is_empty() {
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = (control.len() * mem::size_of::<u64>()) as _;
            // SAFETY: the control buffer holds CMSG_SPACE(payload_len) aligned
            // bytes, so the first header and its data fit.
            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(payload_len as u32) as _;
                ptr::copy_nonoverlapping(
                    raw.as_ptr().cast::<u8>(),
                    libc::CMSG_DATA(cmsg),
                    payload_len,
                );
            }
        }

        loop {
            // SAFETY: msg points at live buffers for the duration of the call.
            let sent = unsafe { libc::sendmsg(self.stream.as_raw_fd(), &msg, SEND_FLAGS) };
            if sent >= 0 {
                return Ok(sent as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

/// An 8-byte aligned buffer large enough for `count` descriptors.
fn control_buffer(count: usize) -> Vec<u64> {
    // SAFETY: CMSG_SPACE is a pure size computation.
    let space = unsafe { libc::CMSG_SPACE((count * mem::size_of::<RawFd>()) as u32) } as usize;
    vec![0u64; space.div_ceil(mem::size_of::<u64>())]
}

impl Transport for UnixSocketTransport {
    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> io::Result<()> {
        let batches: Vec<&[OwnedFd]> = fds.chunks(MAX_FDS_PER_MESSAGE).collect();
        if batches.len() > bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "more descriptor batches than message bytes",
            ));
        }

        let mut offset = 0;
        for (i, batch) in batches.iter().enumerate() {
            let end = if i + 1 == batches.len() {
                bytes.len()
            } else {
                offset + 1
            };
            let sent = self.send_chunk(&bytes[offset..end], batch)?;
            if sent == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += sent;
        }
        while offset < bytes.len() {
            let sent = self.send_chunk(&bytes[offset..], &[])?;
            if sent == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            offset += sent;
        }
        // The kernel holds its own references now; `fds` closes ours.
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let mut control = control_buffer(MAX_FDS_PER_MESSAGE);
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        // SAFETY: msghdr is plain data; all-zero is a valid empty header.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = (control.len() * mem::size_of::<u64>()) as _;

        let received = loop {
            // SAFETY: msg points at live buffers for the duration of the call.
            let n = unsafe { libc::recvmsg(self.stream.as_raw_fd(), &mut msg, RECV_FLAGS) };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        // SAFETY: the kernel filled `control` with well-formed headers up to
        // msg_controllen; CMSG_NXTHDR stops at its end.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                    let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                    for i in 0..payload / mem::size_of::<RawFd>() {
                        let fd = ptr::read_unaligned(data.add(i));
                        fds.push_back(adopt(fd));
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file descriptors were truncated",
            ));
        }
        Ok(received)
    }
}

/// Takes ownership of a received descriptor.
///
/// # Safety
///
/// `fd` must be open and owned by nobody else.
unsafe fn adopt(fd: RawFd) -> OwnedFd {
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
    }
    OwnedFd::from_raw_fd(fd)
}
