//! Schema model: argument descriptors, interfaces and the interface catalog.
//!
//! This is what a protocol scanner produces from an XML description.  The
//! runtime never inspects Rust types to learn a message layout; it always
//! goes through these tables.

pub mod argument;
pub mod catalog;
pub mod interface;

pub use argument::{ArgValue, Argument, ArgumentType, Fixed};
pub use catalog::InterfaceCatalog;
pub use interface::{BoundInterface, Direction, Interface, InterfaceBuilder, MessageSpec, Signature};
