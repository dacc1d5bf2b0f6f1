//! The core protocol every connection speaks.
//!
//! `wl_display` is object 1 on both ends from the start.  It carries the
//! connection-level traffic: round-trip callbacks, the registry of globals,
//! protocol errors and the `delete_id` acknowledgments that complete
//! two-phase id reuse.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, WireError};
use crate::object::Side;
use crate::runtime::{Global, Incoming, Proxy, Session};
use crate::schema::{ArgValue, Argument, ArgumentType, Interface, InterfaceCatalog, MessageSpec};

/// Id of the display object.
pub const DISPLAY_ID: u32 = 1;

/// Interfaces a catalog must contain before a session can start.
pub const CORE_INTERFACES: [&str; 3] = [wl_display::NAME, wl_registry::NAME, wl_callback::NAME];

pub mod wl_display {
    pub const NAME: &str = "wl_display";
    pub const SYNC: u16 = 0;
    pub const GET_REGISTRY: u16 = 1;
    pub const EVT_ERROR: u16 = 0;
    pub const EVT_DELETE_ID: u16 = 1;
}

pub mod wl_registry {
    pub const NAME: &str = "wl_registry";
    pub const BIND: u16 = 0;
    pub const EVT_GLOBAL: u16 = 0;
    pub const EVT_GLOBAL_REMOVE: u16 = 1;
}

pub mod wl_callback {
    pub const NAME: &str = "wl_callback";
    pub const EVT_DONE: u16 = 0;
}

/// Error codes of `wl_display.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisplayError {
    /// Server couldn't find the object.
    InvalidObject = 0,
    /// Method doesn't exist on the specified interface or malformed request.
    InvalidMethod = 1,
    NoMemory = 2,
    /// Implementation error in the compositor.
    Implementation = 3,
}

impl DisplayError {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Code reported to a client whose message caused `err`.
    pub fn for_error(err: &WireError) -> Self {
        match err {
            WireError::UnknownObject(_) | WireError::WrongInterface { .. } => {
                DisplayError::InvalidObject
            }
            WireError::UnknownOpcode { .. }
            | WireError::UnhandledRequest { .. }
            | WireError::ArgumentMismatch { .. }
            | WireError::TruncatedMessage { .. }
            | WireError::MissingDescriptor { .. }
            | WireError::NullNotAllowed { .. }
            | WireError::DuplicateId(_)
            | WireError::IdOutOfRange { .. }
            | WireError::InvalidMessage(_)
            | WireError::MessageNotInVersion { .. }
            | WireError::UnknownInterface(_)
            | WireError::VersionMismatch { .. } => DisplayError::InvalidMethod,
            WireError::IdSpaceExhausted(_) => DisplayError::NoMemory,
            _ => DisplayError::Implementation,
        }
    }
}

// ── Schemas ───────────────────────────────────────────────────────────────────

/// # Errors
///
/// Never in practice; schema construction is fallible in general.
pub fn display_interface() -> Result<Arc<Interface>> {
    Interface::builder(wl_display::NAME, 1)
        .request(
            wl_display::SYNC,
            MessageSpec::new("sync").arg(Argument::new_id(wl_callback::NAME)),
        )?
        .request(
            wl_display::GET_REGISTRY,
            MessageSpec::new("get_registry").arg(Argument::new_id(wl_registry::NAME)),
        )?
        .event(
            wl_display::EVT_ERROR,
            MessageSpec::new("error").args([
                Argument::new(ArgumentType::Object),
                Argument::uint(),
                Argument::string(),
            ]),
        )?
        .event(
            wl_display::EVT_DELETE_ID,
            MessageSpec::new("delete_id").arg(Argument::uint()),
        )?
        .build()
}

/// # Errors
///
/// Never in practice; schema construction is fallible in general.
pub fn registry_interface() -> Result<Arc<Interface>> {
    Interface::builder(wl_registry::NAME, 1)
        .request(
            wl_registry::BIND,
            MessageSpec::new("bind").args([Argument::uint(), Argument::untyped_new_id()]),
        )?
        .event(
            wl_registry::EVT_GLOBAL,
            MessageSpec::new("global").args([
                Argument::uint(),
                Argument::string(),
                Argument::uint(),
            ]),
        )?
        .event(
            wl_registry::EVT_GLOBAL_REMOVE,
            MessageSpec::new("global_remove").arg(Argument::uint()),
        )?
        .build()
}

/// # Errors
///
/// Never in practice; schema construction is fallible in general.
pub fn callback_interface() -> Result<Arc<Interface>> {
    Interface::builder(wl_callback::NAME, 1)
        .event(
            wl_callback::EVT_DONE,
            MessageSpec::new("done").arg(Argument::uint()).destructor(),
        )?
        .build()
}

/// A catalog holding just the core interfaces; add protocol interfaces with
/// [`InterfaceCatalog::with`].
///
/// # Errors
///
/// Never in practice; schema construction is fallible in general.
pub fn core_catalog() -> Result<InterfaceCatalog> {
    InterfaceCatalog::new()
        .with(display_interface()?)?
        .with(registry_interface()?)?
        .with(callback_interface()?)
}

// ── Client requests ───────────────────────────────────────────────────────────

/// Sends `wl_display.sync`; the returned callback fires once the server has
/// processed every earlier request.
///
/// # Errors
///
/// [`WireError::UnknownObject`] after teardown.
pub fn sync(session: &mut Session) -> Result<Proxy> {
    let display = session.display()?;
    display.send_constructor(session, wl_display::SYNC, Vec::new())
}

/// Sends `wl_display.get_registry`.
///
/// # Errors
///
/// [`WireError::UnknownObject`] after teardown.
pub fn get_registry(session: &mut Session) -> Result<Proxy> {
    let display = session.display()?;
    display.send_constructor(session, wl_display::GET_REGISTRY, Vec::new())
}

/// Binds global `name` as `interface` at `version` through `registry`.
///
/// # Errors
///
/// [`WireError::UnknownInterface`] if the catalog lacks `interface`,
/// [`WireError::VersionMismatch`] if `version` is outside its range.
pub fn bind(
    session: &mut Session,
    registry: &Proxy,
    name: u32,
    interface: &str,
    version: u32,
) -> Result<Proxy> {
    registry.send_untyped_constructor(
        session,
        wl_registry::BIND,
        interface,
        version,
        vec![ArgValue::Uint(name)],
    )
}

// ── Built-in handling ─────────────────────────────────────────────────────────

/// Applies the connection-level effects of a core message.  Returns `true`
/// if the message belongs to a core interface, in which case a missing user
/// handler is not an error.
pub(crate) fn handle_core(session: &mut Session, incoming: &Incoming) -> Result<bool> {
    let interface = incoming.interface_name();
    if !CORE_INTERFACES.contains(&interface) {
        return Ok(false);
    }
    match (session.side(), interface, incoming.opcode) {
        (Side::Client, wl_display::NAME, wl_display::EVT_ERROR) => {
            let object_id = arg_object(incoming, 0);
            let code = arg_uint(incoming, 1);
            let message = incoming.arg(2).and_then(ArgValue::as_str).unwrap_or_default();
            return Err(WireError::PeerError {
                object_id,
                code,
                message: message.to_string(),
            });
        }
        (Side::Client, wl_display::NAME, wl_display::EVT_DELETE_ID) => {
            session.acknowledge_id(arg_uint(incoming, 0));
        }
        (Side::Client, wl_registry::NAME, wl_registry::EVT_GLOBAL) => {
            let global = Global {
                name: arg_uint(incoming, 0),
                interface: incoming
                    .arg(1)
                    .and_then(ArgValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
                version: arg_uint(incoming, 2),
            };
            debug!(
                name = global.name,
                interface = %global.interface,
                version = global.version,
                "global advertised"
            );
            session.record_global(global);
        }
        (Side::Client, wl_registry::NAME, wl_registry::EVT_GLOBAL_REMOVE) => {
            session.forget_global(arg_uint(incoming, 0));
        }
        (Side::Server, wl_display::NAME, wl_display::SYNC) => {
            if let Some(callback) = incoming.created_resource() {
                let serial = session.next_serial();
                let done = vec![ArgValue::Uint(serial)];
                callback.post_event(session, wl_callback::EVT_DONE, done)?;
            }
        }
        (Side::Server, wl_display::NAME, wl_display::GET_REGISTRY) => {
            if let Some(registry) = &incoming.created {
                session.attach_registry(registry.id())?;
            }
        }
        (Side::Server, wl_registry::NAME, wl_registry::BIND) => check_bind(session, incoming)?,
        _ => {}
    }
    Ok(true)
}

/// A bind must name a live global, with its interface, at a version it offers.
fn check_bind(session: &Session, incoming: &Incoming) -> Result<()> {
    let name = arg_uint(incoming, 0);
    let Some(ArgValue::UntypedNewId {
        interface,
        version,
        id,
    }) = incoming.arg(1)
    else {
        return Err(WireError::InvalidMessage("bind without a new id".into()));
    };
    let global = session
        .global(name)
        .ok_or_else(|| WireError::InvalidMessage(format!("invalid global {name}")))?;
    if &global.interface != interface {
        return Err(WireError::InvalidMessage(format!(
            "invalid interface for global {name}: have {interface}, wanted {}",
            global.interface
        )));
    }
    if *version > global.version {
        return Err(WireError::InvalidMessage(format!(
            "invalid version for global {name} ({interface}): have {version}, wanted {}",
            global.version
        )));
    }
    info!(name, interface = %interface, version, id, "client bound global");
    Ok(())
}

fn arg_uint(incoming: &Incoming, index: usize) -> u32 {
    incoming.arg(index).and_then(ArgValue::as_uint).unwrap_or_default()
}

fn arg_object(incoming: &Incoming, index: usize) -> u32 {
    incoming.arg(index).and_then(ArgValue::as_object).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_opcodes_follow_declaration_order() {
        let display = display_interface().expect("display");
        assert_eq!(display.request_by_name("sync").map(|s| s.opcode), Some(wl_display::SYNC));
        assert_eq!(
            display.request_by_name("get_registry").map(|s| s.opcode),
            Some(wl_display::GET_REGISTRY)
        );
        assert_eq!(
            display.event_by_name("delete_id").map(|s| s.opcode),
            Some(wl_display::EVT_DELETE_ID)
        );
        let registry = registry_interface().expect("registry");
        assert_eq!(registry.requests()[0].wire_signature(), "usun");
    }

    #[test]
    fn test_callback_done_is_destructor() {
        let callback = callback_interface().expect("callback");
        assert!(callback.events()[0].destructor);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DisplayError::for_error(&WireError::UnknownObject(3)).code(), 0);
        assert_eq!(
            DisplayError::for_error(&WireError::UnknownOpcode {
                interface: "wl_core".into(),
                opcode: 4,
            }),
            DisplayError::InvalidMethod
        );
        assert_eq!(
            DisplayError::for_error(&WireError::IdSpaceExhausted("server")),
            DisplayError::NoMemory
        );
        assert_eq!(DisplayError::Implementation.code(), 3);
    }

    #[test]
    fn test_core_catalog_is_complete() {
        let catalog = core_catalog().expect("catalog");
        for name in CORE_INTERFACES {
            assert!(catalog.contains(name), "{name} missing");
        }
        assert!(catalog.validate().is_ok());
    }
}
