//! OS transports for [`waywire_core::Connection`].

pub mod unix;

pub use unix::{UnixSocketTransport, MAX_FDS_PER_MESSAGE};
