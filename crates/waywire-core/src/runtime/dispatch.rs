//! Handler table for received messages.
//!
//! Handlers are keyed by `(interface name, opcode)` and receive the session
//! mutably, so they can reply or create objects within the same pass.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::{Result, WireError};
use crate::object::ProtocolObject;
use crate::runtime::proxy::Proxy;
use crate::runtime::resource::Resource;
use crate::runtime::session::Session;
use crate::schema::{ArgValue, Direction, Interface, Signature};

/// A received message after its new object (if any) was registered.
#[derive(Debug)]
pub struct Incoming {
    /// Object the message was addressed to.
    pub target: ProtocolObject,
    pub direction: Direction,
    pub opcode: u16,
    /// Decoded arguments, including the NewId and any fds.
    pub args: Vec<ArgValue>,
    /// Object created by this message.
    pub created: Option<ProtocolObject>,
}

impl Incoming {
    pub fn signature(&self) -> &Signature {
        &self.target.interface().messages(self.direction)[usize::from(self.opcode)]
    }

    /// Message name, e.g. `"bind"`.
    pub fn name(&self) -> &str {
        &self.signature().name
    }

    pub fn interface_name(&self) -> &str {
        self.target.interface().name()
    }

    pub fn arg(&self, index: usize) -> Option<&ArgValue> {
        self.args.get(index)
    }

    /// Target as a client-side handle.
    pub fn proxy(&self) -> Proxy {
        Proxy::new(self.target.clone())
    }

    /// Target as a server-side handle.
    pub fn resource(&self) -> Resource {
        Resource::new(self.target.clone())
    }

    pub fn created_proxy(&self) -> Option<Proxy> {
        self.created.clone().map(Proxy::new)
    }

    pub fn created_resource(&self) -> Option<Resource> {
        self.created.clone().map(Resource::new)
    }
}

/// Callback invoked for one kind of message.
pub type Handler = Box<dyn FnMut(&mut Session, Incoming) -> Result<()> + Send>;

/// Routes received messages to handlers.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, HashMap<u16, Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `opcode` of `interface`, replacing any
    /// previous one.
    pub fn on<F>(&mut self, interface: &str, opcode: u16, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session, Incoming) -> Result<()> + Send + 'static,
    {
        self.handlers
            .entry(interface.to_string())
            .or_default()
            .insert(opcode, Box::new(handler));
        self
    }

    /// Registers a handler by message name rather than opcode.
    ///
    /// # Errors
    ///
    /// [`WireError::InvalidSchema`] if `interface` has no such message.
    pub fn on_named<F>(
        &mut self,
        interface: &Interface,
        direction: Direction,
        name: &str,
        handler: F,
    ) -> Result<&mut Self>
    where
        F: FnMut(&mut Session, Incoming) -> Result<()> + Send + 'static,
    {
        let opcode = interface
            .messages(direction)
            .iter()
            .find(|sig| sig.name == name)
            .map(|sig| sig.opcode)
            .ok_or_else(|| WireError::InvalidSchema {
                interface: interface.name().to_string(),
                reason: format!("no {direction} named {name}"),
            })?;
        Ok(self.on(interface.name(), opcode, handler))
    }

    pub fn has_handler(&self, interface: &str, opcode: u16) -> bool {
        self.handlers
            .get(interface)
            .is_some_and(|by_opcode| by_opcode.contains_key(&opcode))
    }

    /// Removes a handler, returning whether one was registered.
    pub fn remove(&mut self, interface: &str, opcode: u16) -> bool {
        self.handlers
            .get_mut(interface)
            .and_then(|by_opcode| by_opcode.remove(&opcode))
            .is_some()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes the handler for `incoming`.
    ///
    /// # Errors
    ///
    /// [`WireError::UnhandledRequest`] if none is registered, otherwise the
    /// handler's own error.
    pub fn dispatch(&mut self, session: &mut Session, incoming: Incoming) -> Result<()> {
        let handler = self
            .handlers
            .get_mut(incoming.interface_name())
            .and_then(|by_opcode| by_opcode.get_mut(&incoming.opcode));
        match handler {
            Some(handler) => {
                debug!(
                    object = %incoming.target,
                    message = incoming.name(),
                    "dispatching"
                );
                handler(session, incoming)
            }
            None => Err(WireError::UnhandledRequest {
                interface: incoming.interface_name().to_string(),
                message: incoming.name().to_string(),
                opcode: incoming.opcode,
            }),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.len())
            .finish()
    }
}
