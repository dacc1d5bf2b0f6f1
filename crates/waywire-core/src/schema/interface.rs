//! Interfaces: named, versioned tables of request and event signatures.
//!
//! A signature's opcode is its position in the table and is part of the wire
//! contract, so the builder only accepts signatures in declaration order:
//!
//! ```rust
//! use waywire_core::schema::{Argument, Interface, MessageSpec};
//!
//! let iface = Interface::builder("wl_example", 2)
//!     .request(0, MessageSpec::new("ping").arg(Argument::uint()))?
//!     .request(1, MessageSpec::new("shiny").since(2))?
//!     .build()?;
//!
//! assert_eq!(iface.request_by_name("shiny").map(|s| s.opcode), Some(1));
//! # Ok::<(), waywire_core::WireError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::schema::argument::{Argument, ArgumentType};

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Event,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Event => f.write_str("event"),
        }
    }
}

/// Declaration of a message before it is given an opcode.
#[derive(Debug, Clone, Default)]
pub struct MessageSpec {
    name: String,
    args: Vec<Argument>,
    since: Option<u32>,
    destructor: bool,
}

impl MessageSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = Argument>) -> Self {
        self.args.extend(args);
        self
    }

    /// Minimum object version that may use this message.
    pub fn since(mut self, version: u32) -> Self {
        self.since = Some(version);
        self
    }

    /// Marks the message as ending the object's life.
    pub fn destructor(mut self) -> Self {
        self.destructor = true;
        self
    }
}

/// A request or event with its opcode fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub opcode: u16,
    pub since: u32,
    pub args: Vec<Argument>,
    pub destructor: bool,
    fd_count: usize,
}

impl Signature {
    /// Number of FileDescriptor arguments, i.e. fds consumed from the side-channel.
    pub fn fd_count(&self) -> usize {
        self.fd_count
    }

    /// Position of the NewId argument, if the message creates an object.
    pub fn new_id_index(&self) -> Option<usize> {
        self.args.iter().position(|a| a.kind == ArgumentType::NewId)
    }

    /// libwayland-style signature string, e.g. `"2?su"` or `"nsun"`.
    pub fn wire_signature(&self) -> String {
        let mut sig = String::new();
        if self.since > 1 {
            sig.push_str(&self.since.to_string());
        }
        for arg in &self.args {
            if arg.nullable {
                sig.push('?');
            }
            if arg.is_untyped_new_id() {
                sig.push_str("su");
            }
            sig.push(arg.kind.signature_char());
        }
        sig
    }
}

/// An immutable interface schema.
#[derive(Debug, PartialEq, Eq)]
pub struct Interface {
    name: String,
    version: u32,
    requests: Vec<Signature>,
    events: Vec<Signature>,
}

impl Interface {
    pub fn builder(name: &str, version: u32) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.to_string(),
            version,
            requests: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn requests(&self) -> &[Signature] {
        &self.requests
    }

    pub fn events(&self) -> &[Signature] {
        &self.events
    }

    pub fn request(&self, opcode: u16) -> Option<&Signature> {
        self.requests.get(usize::from(opcode))
    }

    pub fn event(&self, opcode: u16) -> Option<&Signature> {
        self.events.get(usize::from(opcode))
    }

    pub fn request_by_name(&self, name: &str) -> Option<&Signature> {
        self.requests.iter().find(|s| s.name == name)
    }

    pub fn event_by_name(&self, name: &str) -> Option<&Signature> {
        self.events.iter().find(|s| s.name == name)
    }

    /// Signature table for messages travelling in `direction`.
    pub fn messages(&self, direction: Direction) -> &[Signature] {
        match direction {
            Direction::Request => &self.requests,
            Direction::Event => &self.events,
        }
    }

    /// Looks up `opcode` in the `direction` table.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownOpcode`] if the table has no such entry.
    pub fn message(&self, direction: Direction, opcode: u16) -> Result<&Signature> {
        self.messages(direction)
            .get(usize::from(opcode))
            .ok_or_else(|| WireError::UnknownOpcode {
                interface: self.name.clone(),
                opcode,
            })
    }

    /// Produces a view of this interface limited to `version`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::VersionMismatch`] if `version` is 0 or above the
    /// interface's declared version.
    pub fn bind(self: &Arc<Self>, version: u32) -> Result<BoundInterface> {
        if version == 0 || version > self.version {
            return Err(WireError::VersionMismatch {
                interface: self.name.clone(),
                message: "bind".to_string(),
                required: version,
                available: self.version,
            });
        }
        Ok(BoundInterface {
            interface: Arc::clone(self),
            version,
        })
    }
}

/// Builds an [`Interface`], enforcing sequential opcodes.
#[derive(Debug)]
pub struct InterfaceBuilder {
    name: String,
    version: u32,
    requests: Vec<Signature>,
    events: Vec<Signature>,
}

impl InterfaceBuilder {
    /// Registers a request at `opcode`, which must be the next free one.
    ///
    /// # Errors
    ///
    /// [`WireError::OpcodeConflict`] for an out-of-order opcode,
    /// [`WireError::InvalidSchema`] for an inconsistent argument list.
    pub fn request(mut self, opcode: u16, spec: MessageSpec) -> Result<Self> {
        let sig = self.signature(Direction::Request, opcode, spec)?;
        self.requests.push(sig);
        Ok(self)
    }

    /// Registers an event at `opcode`, which must be the next free one.
    ///
    /// # Errors
    ///
    /// Same as [`InterfaceBuilder::request`]; additionally an event may not
    /// carry a NewId without a bound interface.
    pub fn event(mut self, opcode: u16, spec: MessageSpec) -> Result<Self> {
        let sig = self.signature(Direction::Event, opcode, spec)?;
        self.events.push(sig);
        Ok(self)
    }

    /// # Errors
    ///
    /// [`WireError::InvalidSchema`] if the declared version is 0.
    pub fn build(self) -> Result<Arc<Interface>> {
        if self.version == 0 {
            return Err(self.invalid("interface version must be at least 1"));
        }
        Ok(Arc::new(Interface {
            name: self.name,
            version: self.version,
            requests: self.requests,
            events: self.events,
        }))
    }

    fn signature(&self, direction: Direction, opcode: u16, spec: MessageSpec) -> Result<Signature> {
        let table = match direction {
            Direction::Request => &self.requests,
            Direction::Event => &self.events,
        };
        let expected = u16::try_from(table.len())
            .map_err(|_| self.invalid(format!("more than {} {direction}s", u16::MAX)))?;
        if opcode != expected {
            return Err(WireError::OpcodeConflict {
                interface: self.name.clone(),
                expected,
                got: opcode,
            });
        }

        let since = spec.since.unwrap_or(self.version);
        if since == 0 || since > self.version {
            return Err(self.invalid(format!(
                "{} declares since {since}, interface is version {}",
                spec.name, self.version
            )));
        }

        let mut new_ids = 0;
        for arg in &spec.args {
            if arg.nullable && !arg.kind.supports_null() {
                return Err(self.invalid(format!("{}: {} cannot be nullable", spec.name, arg.kind)));
            }
            if arg.interface.is_some()
                && !matches!(arg.kind, ArgumentType::Object | ArgumentType::NewId)
            {
                return Err(self.invalid(format!(
                    "{}: only object and new_id arguments name an interface",
                    spec.name
                )));
            }
            if arg.kind == ArgumentType::NewId {
                new_ids += 1;
                if direction == Direction::Event && arg.interface.is_none() {
                    return Err(self.invalid(format!(
                        "event {} creates an object without naming its interface",
                        spec.name
                    )));
                }
            }
        }
        if new_ids > 1 {
            return Err(self.invalid(format!("{} creates more than one object", spec.name)));
        }

        let fd_count = spec
            .args
            .iter()
            .filter(|a| a.kind == ArgumentType::FileDescriptor)
            .count();
        Ok(Signature {
            name: spec.name,
            opcode,
            since,
            args: spec.args,
            destructor: spec.destructor,
            fd_count,
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> WireError {
        WireError::InvalidSchema {
            interface: self.name.clone(),
            reason: reason.into(),
        }
    }
}

/// An interface viewed at a negotiated version.
#[derive(Debug, Clone)]
pub struct BoundInterface {
    interface: Arc<Interface>,
    version: u32,
}

impl BoundInterface {
    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Looks up a request usable at the bound version.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownOpcode`] or [`WireError::VersionMismatch`].
    pub fn request(&self, opcode: u16) -> Result<&Signature> {
        self.checked(Direction::Request, opcode)
    }

    /// Looks up an event usable at the bound version.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownOpcode`] or [`WireError::VersionMismatch`].
    pub fn event(&self, opcode: u16) -> Result<&Signature> {
        self.checked(Direction::Event, opcode)
    }

    /// Looks up a message by name, then checks it against the bound version.
    ///
    /// # Errors
    ///
    /// [`WireError::InvalidSchema`] if no message has that name, otherwise as
    /// [`BoundInterface::request`].
    pub fn by_name(&self, direction: Direction, name: &str) -> Result<&Signature> {
        let sig = self
            .interface
            .messages(direction)
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| WireError::InvalidSchema {
                interface: self.interface.name.clone(),
                reason: format!("no {direction} named {name}"),
            })?;
        self.check_version(sig)?;
        Ok(sig)
    }

    /// Looks up a message in either direction and checks its since-version.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownOpcode`] or [`WireError::VersionMismatch`].
    pub fn checked(&self, direction: Direction, opcode: u16) -> Result<&Signature> {
        let sig = self.interface.message(direction, opcode)?;
        self.check_version(sig)?;
        Ok(sig)
    }

    fn check_version(&self, sig: &Signature) -> Result<()> {
        if sig.since > self.version {
            return Err(WireError::VersionMismatch {
                interface: self.interface.name.clone(),
                message: sig.name.clone(),
                required: sig.since,
                available: self.version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<Interface> {
        Interface::builder("wl_sample", 2)
            .request(0, MessageSpec::new("first").since(1))
            .and_then(|b| b.request(1, MessageSpec::new("second").arg(Argument::uint())))
            .and_then(|b| b.request(2, MessageSpec::new("third").since(2)))
            .and_then(|b| b.event(0, MessageSpec::new("done").since(1).destructor()))
            .and_then(|b| b.build())
            .expect("sample schema must build")
    }

    #[test]
    fn test_opcodes_follow_declaration_order() {
        let iface = sample();
        for (index, sig) in iface.requests().iter().enumerate() {
            assert_eq!(usize::from(sig.opcode), index);
        }
        for (index, sig) in iface.events().iter().enumerate() {
            assert_eq!(usize::from(sig.opcode), index);
        }
    }

    #[test]
    fn test_out_of_order_opcode_is_conflict() {
        let result = Interface::builder("wl_bad", 1).request(1, MessageSpec::new("skip"));
        assert!(matches!(
            result,
            Err(WireError::OpcodeConflict {
                expected: 0,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_reused_opcode_is_conflict() {
        let result = Interface::builder("wl_bad", 1)
            .event(0, MessageSpec::new("a"))
            .and_then(|b| b.event(0, MessageSpec::new("b")));
        assert!(matches!(
            result,
            Err(WireError::OpcodeConflict {
                expected: 1,
                got: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_since_defaults_to_interface_version() {
        let iface = sample();
        assert_eq!(iface.request_by_name("second").map(|s| s.since), Some(2));
        assert_eq!(iface.request_by_name("first").map(|s| s.since), Some(1));
    }

    #[test]
    fn test_since_above_interface_version_is_rejected() {
        let result = Interface::builder("wl_bad", 1).request(0, MessageSpec::new("future").since(3));
        assert!(matches!(result, Err(WireError::InvalidSchema { .. })));
    }

    #[test]
    fn test_nullable_int_is_rejected() {
        let result = Interface::builder("wl_bad", 1)
            .request(0, MessageSpec::new("m").arg(Argument::int().nullable()));
        assert!(matches!(result, Err(WireError::InvalidSchema { .. })));
    }

    #[test]
    fn test_event_with_untyped_new_id_is_rejected() {
        let result = Interface::builder("wl_bad", 1)
            .event(0, MessageSpec::new("spawn").arg(Argument::untyped_new_id()));
        assert!(matches!(result, Err(WireError::InvalidSchema { .. })));
    }

    #[test]
    fn test_bind_rejects_versions_outside_range() {
        let iface = sample();
        assert!(matches!(iface.bind(0), Err(WireError::VersionMismatch { .. })));
        assert!(matches!(iface.bind(3), Err(WireError::VersionMismatch { .. })));
        assert_eq!(iface.bind(2).map(|b| b.version()).ok(), Some(2));
    }

    #[test]
    fn test_bound_view_checks_since_version() {
        let bound = sample().bind(1).expect("bind v1");
        assert!(bound.request(0).is_ok());
        assert!(matches!(
            bound.request(2),
            Err(WireError::VersionMismatch {
                required: 2,
                available: 1,
                ..
            })
        ));
        assert!(matches!(
            bound.request(9),
            Err(WireError::UnknownOpcode { opcode: 9, .. })
        ));
        assert!(bound.by_name(Direction::Event, "done").is_ok());
    }

    #[test]
    fn test_wire_signature_string() {
        let iface = Interface::builder("wl_sig", 2)
            .request(
                0,
                MessageSpec::new("m")
                    .arg(Argument::uint())
                    .arg(Argument::string().nullable())
                    .arg(Argument::untyped_new_id()),
            )
            .and_then(|b| b.build())
            .expect("build");
        assert_eq!(iface.requests()[0].wire_signature(), "2u?ssun");
    }

    #[test]
    fn test_fd_count_and_new_id_index() {
        let iface = Interface::builder("wl_fd", 1)
            .request(
                0,
                MessageSpec::new("m")
                    .arg(Argument::new_id("wl_fd"))
                    .arg(Argument::fd())
                    .arg(Argument::fd()),
            )
            .and_then(|b| b.build())
            .expect("build");
        let sig = &iface.requests()[0];
        assert_eq!(sig.fd_count(), 2);
        assert_eq!(sig.new_id_index(), Some(0));
    }
}
