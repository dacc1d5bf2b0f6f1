//! # waywire-core
//!
//! Schema model and runtime for a Wayland-style object protocol.
//!
//! This crate has no OS socket code; it moves bytes through the
//! [`Transport`] trait.  `waywire-peer` supplies a Unix-socket transport.
//!
//! # Architecture overview
//!
//! Two peers share a set of *interfaces*.  Each interface is a versioned
//! table of requests (client to server) and events (server to client).  Every
//! message is addressed to an *object*, a numeric id bound to one interface
//! at one version, and its arguments are laid out according to the
//! signature at its opcode.
//!
//! - **`schema`**: argument types, interfaces and the catalog that resolves
//!   interface names.  What a protocol scanner would emit.
//!
//! - **`protocol`**: framing (8-byte header, 4-byte aligned arguments) and
//!   the schema-driven codec.  File descriptors travel out of band.
//!
//! - **`object`**: client and server id ranges, the live object table and
//!   the two-phase reuse of ids destroyed by the client.
//!
//! - **`runtime`**: [`Proxy`] and [`Resource`] handles, the [`Session`]
//!   that owns per-connection state, and the [`Dispatcher`] that routes
//!   received messages to handlers.
//!
//! - **`connection`**: a [`Session`] driven over a [`Transport`], with the
//!   strict/lenient error policy.
//!
//! - **`display`** and **`protocols`**: the built-in `wl_display`,
//!   `wl_registry` and `wl_callback` interfaces, and bundled protocol
//!   bindings.

pub mod connection;
pub mod display;
pub mod error;
pub mod object;
pub mod protocol;
pub mod protocols;
pub mod runtime;
pub mod schema;

pub use connection::{Connection, ConnectionConfig, MemoryTransport, Strictness, Transport};
pub use error::{Result, Severity, WireError};
pub use object::{DestroyOutcome, ObjectRegistry, ProtocolObject, Side};
pub use protocol::{decode_message, encode_message, DecodedMessage, EncodedMessage};
pub use runtime::{Dispatcher, Global, Incoming, InterfaceDescriptor, Proxy, ProxyImpl, Resource, ResourceImpl, Session};
pub use schema::{ArgValue, Argument, ArgumentType, Direction, Fixed, Interface, InterfaceCatalog, MessageSpec};
