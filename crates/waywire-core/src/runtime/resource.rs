//! Server-side object handles.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::object::ProtocolObject;
use crate::runtime::proxy::no_child;
use crate::runtime::session::{Creates, Session};
use crate::schema::{ArgValue, Interface};

/// Server-side stub for a protocol object; the mirror of [`crate::Proxy`].
#[derive(Debug, Clone)]
pub struct Resource {
    object: ProtocolObject,
}

impl Resource {
    pub(crate) fn new(object: ProtocolObject) -> Self {
        Self { object }
    }

    pub fn id(&self) -> u32 {
        self.object.id()
    }

    pub fn interface(&self) -> &Arc<Interface> {
        self.object.interface()
    }

    pub fn version(&self) -> u32 {
        self.object.version()
    }

    pub fn object(&self) -> &ProtocolObject {
        &self.object
    }

    pub fn is_alive(&self, session: &Session) -> bool {
        session.registry().get(self.id()).is_some()
    }

    /// Sends an event.  A destructor event destroys the resource, and the
    /// client is sent `delete_id` if it allocated the id.
    ///
    /// # Errors
    ///
    /// [`crate::WireError::VersionMismatch`] if the event is newer than the
    /// version the client bound; [`crate::WireError::ArgumentMismatch`] for
    /// bad arguments.
    pub fn post_event(&self, session: &mut Session, opcode: u16, args: Vec<ArgValue>) -> Result<()> {
        session.marshal(&self.object, opcode, args, Creates::Nothing)?;
        Ok(())
    }

    /// Sends an event that creates a server-allocated object.
    ///
    /// # Errors
    ///
    /// As [`Resource::post_event`].
    pub fn post_constructor_event(
        &self,
        session: &mut Session,
        opcode: u16,
        args: Vec<ArgValue>,
    ) -> Result<Resource> {
        let child = session.marshal(&self.object, opcode, args, Creates::Typed)?;
        child.map(Resource::new).ok_or_else(|| no_child(opcode))
    }

    /// Reports a protocol error against this object.
    ///
    /// # Errors
    ///
    /// [`crate::WireError::ArgumentMismatch`] if `message` contains a NUL.
    pub fn post_error(&self, session: &mut Session, code: u32, message: &str) -> Result<()> {
        session.post_error(self.id(), code, message)
    }

    /// Destroys the resource without sending an event of its own.
    ///
    /// # Errors
    ///
    /// [`crate::WireError::UnknownObject`] if it is already gone.
    pub fn destroy(&self, session: &mut Session) -> Result<()> {
        session.destroy_object(self.id())?;
        Ok(())
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && Arc::ptr_eq(self.interface(), other.interface())
    }
}

impl Eq for Resource {}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.object, f)
    }
}
