//! Client-side object handles.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::object::ProtocolObject;
use crate::runtime::session::{Creates, Session};
use crate::schema::{ArgValue, Interface};

/// Client-side stub for a protocol object.
///
/// A `Proxy` is a cheap handle; the object's state lives in the [`Session`]
/// it came from.  Handles stay valid until the object is destroyed, after
/// which every send fails with [`crate::WireError::UnknownObject`].
#[derive(Debug, Clone)]
pub struct Proxy {
    object: ProtocolObject,
}

impl Proxy {
    pub(crate) fn new(object: ProtocolObject) -> Self {
        Self { object }
    }

    pub fn id(&self) -> u32 {
        self.object.id()
    }

    pub fn interface(&self) -> &Arc<Interface> {
        self.object.interface()
    }

    /// Version negotiated for this object.
    pub fn version(&self) -> u32 {
        self.object.version()
    }

    pub fn object(&self) -> &ProtocolObject {
        &self.object
    }

    /// Returns `true` while the object is live in `session`.
    pub fn is_alive(&self, session: &Session) -> bool {
        session.registry().get(self.id()).is_some()
    }

    /// Sends a request that creates no object.
    ///
    /// A destructor request destroys the proxy after queueing.
    ///
    /// # Errors
    ///
    /// [`crate::WireError::VersionMismatch`] if the request is newer than
    /// the proxy, in which case nothing is queued.
    /// [`crate::WireError::ArgumentMismatch`] for bad arguments or a
    /// request that creates an object.
    pub fn send(&self, session: &mut Session, opcode: u16, args: Vec<ArgValue>) -> Result<()> {
        session.marshal(&self.object, opcode, args, Creates::Nothing)?;
        Ok(())
    }

    /// Sends a request whose NewId argument names its interface, returning
    /// the new object.
    ///
    /// `args` omits the NewId; its id is allocated from the client range and
    /// the object is usable before the server has seen it.
    ///
    /// # Errors
    ///
    /// As [`Proxy::send`], plus [`crate::WireError::UnknownInterface`] if the
    /// child interface is missing from the catalog.
    pub fn send_constructor(
        &self,
        session: &mut Session,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<Proxy> {
        let child = session.marshal(&self.object, opcode, args, Creates::Typed)?;
        child.map(Proxy::new).ok_or_else(|| no_child(opcode))
    }

    /// Sends a request whose NewId has no fixed interface, such as
    /// `wl_registry.bind`.  `interface` and `version` travel inline.
    ///
    /// # Errors
    ///
    /// As [`Proxy::send_constructor`], plus
    /// [`crate::WireError::VersionMismatch`] if `version` is outside the
    /// interface's range.
    pub fn send_untyped_constructor(
        &self,
        session: &mut Session,
        opcode: u16,
        interface: &str,
        version: u32,
        args: Vec<ArgValue>,
    ) -> Result<Proxy> {
        let creates = Creates::Untyped { interface, version };
        let child = session.marshal(&self.object, opcode, args, creates)?;
        child.map(Proxy::new).ok_or_else(|| no_child(opcode))
    }
}

pub(crate) fn no_child(opcode: u16) -> crate::WireError {
    crate::WireError::InvalidMessage(format!("opcode {opcode} produced no object"))
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && Arc::ptr_eq(self.interface(), other.interface())
    }
}

impl Eq for Proxy {}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.object, f)
    }
}
