//! Protocol state of one end of a connection, independent of any transport.
//!
//! A [`Session`] owns the object registry, the outbound message queue and the
//! global list.  Proxies and resources are handles into it; every send goes
//! through [`Session::marshal`], every received message through
//! [`Session::accept`] and [`Session::finish`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::display::{self, wl_display, wl_registry};
use crate::error::{Result, WireError};
use crate::object::{DestroyOutcome, ObjectRegistry, ProtocolObject, Role, Side};
use crate::protocol::{encode_message, DecodedMessage, EncodedMessage};
use crate::runtime::dispatch::Incoming;
use crate::runtime::proxy::Proxy;
use crate::runtime::resource::Resource;
use crate::schema::{ArgValue, Direction, Interface, InterfaceCatalog};

/// A global object advertised through `wl_registry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Numeric name, unique per connection for the global's lifetime.
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// Object created by the message being marshaled.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Creates<'a> {
    Nothing,
    /// The signature names the interface; the child inherits the version.
    Typed,
    /// Interface and version chosen by the caller (`wl_registry.bind`).
    Untyped { interface: &'a str, version: u32 },
}

/// Version a typed child object is created at.
///
/// Children inherit their parent's version, capped at what the child's own
/// interface declares.
pub fn child_version(parent_version: u32, child: &Interface) -> u32 {
    parent_version.min(child.version())
}

#[derive(Debug)]
pub struct Session {
    side: Side,
    registry: ObjectRegistry,
    catalog: Arc<InterfaceCatalog>,
    outgoing: VecDeque<EncodedMessage>,
    globals: BTreeMap<u32, Global>,
    next_global_name: u32,
    /// Server side: `wl_registry` resources to notify about global changes.
    registries: Vec<u32>,
    serial: u32,
}

impl Session {
    /// Creates the state for one end of a connection and registers the
    /// display object at id 1.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] if `catalog` lacks the core
    /// interfaces (see [`display::core_catalog`]).
    pub fn new(side: Side, catalog: Arc<InterfaceCatalog>) -> Result<Self> {
        for name in display::CORE_INTERFACES {
            catalog.resolve(name)?;
        }
        let display_iface = catalog.resolve(wl_display::NAME)?;
        let mut registry = ObjectRegistry::new(side);
        let id = match side {
            Side::Client => registry.allocate_id(Side::Client)?,
            Side::Server => display::DISPLAY_ID,
        };
        registry.register(ProtocolObject::new(
            id,
            &display_iface,
            1,
            Role::for_side(side),
        )?)?;

        Ok(Self {
            side,
            registry,
            catalog,
            outgoing: VecDeque::new(),
            globals: BTreeMap::new(),
            next_global_name: 1,
            registries: Vec::new(),
            serial: 0,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn catalog(&self) -> &Arc<InterfaceCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    /// Direction of the messages this end sends.
    pub fn outbound_direction(&self) -> Direction {
        match self.side {
            Side::Client => Direction::Request,
            Side::Server => Direction::Event,
        }
    }

    /// Direction of the messages this end receives.
    pub fn inbound_direction(&self) -> Direction {
        match self.side {
            Side::Client => Direction::Event,
            Side::Server => Direction::Request,
        }
    }

    /// Client-side handle to the display.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] after teardown.
    pub fn display(&self) -> Result<Proxy> {
        self.proxy(display::DISPLAY_ID)
    }

    /// Handle to a live client-side object.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] if `id` is not live.
    pub fn proxy(&self, id: u32) -> Result<Proxy> {
        Ok(Proxy::new(self.registry.lookup(id)?.clone()))
    }

    /// Handle to a live server-side object.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] if `id` is not live.
    pub fn resource(&self, id: u32) -> Result<Resource> {
        Ok(Resource::new(self.registry.lookup(id)?.clone()))
    }

    /// Returns a fresh serial number for events that need one.
    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    /// Number of messages waiting to be flushed.
    pub fn pending_outgoing(&self) -> usize {
        self.outgoing.len()
    }

    /// Drains the outbound queue.
    pub fn take_outgoing(&mut self) -> Vec<EncodedMessage> {
        self.outgoing.drain(..).collect()
    }

    pub(crate) fn pop_outgoing(&mut self) -> Option<EncodedMessage> {
        self.outgoing.pop_front()
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Encodes and queues a message from `sender`, creating the object a
    /// constructor message announces.
    ///
    /// Nothing is queued when an error is returned, and an id allocated for
    /// the new object is given back.
    pub(crate) fn marshal(
        &mut self,
        sender: &ProtocolObject,
        opcode: u16,
        mut args: Vec<ArgValue>,
        creates: Creates<'_>,
    ) -> Result<Option<ProtocolObject>> {
        let object = self.registry.lookup(sender.id())?.clone();
        if !Arc::ptr_eq(object.interface(), sender.interface()) {
            return Err(WireError::WrongInterface {
                id: sender.id(),
                expected: sender.interface().name().to_string(),
                found: object.interface().name().to_string(),
            });
        }
        let direction = self.outbound_direction();
        let sig = object.bound().checked(direction, opcode)?;
        let destructor = sig.destructor;

        let child = match (sig.new_id_index(), creates) {
            (None, Creates::Nothing) => None,
            (Some(index), Creates::Typed) => {
                let name = sig.args[index].interface.as_deref().ok_or_else(|| {
                    WireError::mismatch(&sig.name, "interface must be supplied by the caller")
                })?;
                let iface = self.catalog.resolve(name)?;
                let version = child_version(object.version(), &iface);
                let child = self.new_object(&iface, version)?;
                insert_arg(&mut args, index, ArgValue::NewId(child.id()));
                Some(child)
            }
            (Some(index), Creates::Untyped { interface, version }) => {
                if !sig.args[index].is_untyped_new_id() {
                    return Err(WireError::mismatch(
                        &sig.name,
                        "interface is fixed by the schema",
                    ));
                }
                let iface = self.catalog.resolve(interface)?;
                let child = self.new_object(&iface, version)?;
                insert_arg(
                    &mut args,
                    index,
                    ArgValue::UntypedNewId {
                        interface: interface.to_string(),
                        version,
                        id: child.id(),
                    },
                );
                Some(child)
            }
            (Some(_), Creates::Nothing) => {
                return Err(WireError::mismatch(&sig.name, "message creates an object"));
            }
            (None, _) => {
                return Err(WireError::mismatch(&sig.name, "message creates no object"));
            }
        };

        let encoded = match encode_message(object.id(), object.interface(), direction, opcode, args)
        {
            Ok(encoded) => encoded,
            Err(err) => {
                if let Some(child) = &child {
                    self.registry.release(child.id());
                }
                return Err(err);
            }
        };
        if let Some(child) = &child {
            self.registry.register(child.clone())?;
        }
        self.outgoing.push_back(encoded);

        if destructor {
            self.destroy_object(object.id())?;
        }
        Ok(child)
    }

    fn new_object(&mut self, interface: &Arc<Interface>, version: u32) -> Result<ProtocolObject> {
        let id = self.registry.allocate_id(self.side)?;
        ProtocolObject::new(id, interface, version, Role::for_side(self.side)).map_err(|err| {
            self.registry.release(id);
            err
        })
    }

    /// Destroys a local object, queueing `delete_id` when a server drops an
    /// id the client allocated.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] if `id` is not live.
    pub fn destroy_object(&mut self, id: u32) -> Result<DestroyOutcome> {
        let outcome = self.registry.destroy(id)?;
        self.registries.retain(|&r| r != id);
        if self.side == Side::Server && outcome == DestroyOutcome::PeerOwned {
            self.queue_display_event(wl_display::EVT_DELETE_ID, vec![ArgValue::Uint(id)])?;
        }
        Ok(outcome)
    }

    /// Server side: sends `wl_display.error`.  The client closes the
    /// connection on receipt.
    ///
    /// # Errors
    ///
    /// [`WireError::ArgumentMismatch`] if `message` contains a NUL.
    pub fn post_error(&mut self, object_id: u32, code: u32, message: &str) -> Result<()> {
        warn!(object_id, code, message, "posting protocol error");
        self.queue_display_event(
            wl_display::EVT_ERROR,
            vec![
                ArgValue::object(object_id),
                ArgValue::Uint(code),
                ArgValue::string(message),
            ],
        )
    }

    fn queue_display_event(&mut self, opcode: u16, args: Vec<ArgValue>) -> Result<()> {
        let display = self.registry.lookup(display::DISPLAY_ID)?.clone();
        let encoded = encode_message(
            display.id(),
            display.interface(),
            Direction::Event,
            opcode,
            args,
        )?;
        self.outgoing.push_back(encoded);
        Ok(())
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Registers the object a decoded message creates and wraps it for
    /// dispatch.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] or [`WireError::DuplicateId`] for a bad
    /// NewId.
    pub fn accept(&mut self, decoded: DecodedMessage) -> Result<Incoming> {
        let sig = decoded.signature();
        let created = match sig.new_id_index() {
            None => None,
            Some(index) => {
                let (iface, version, id) = match (&sig.args[index].interface, &decoded.args[index]) {
                    (Some(name), ArgValue::NewId(id)) => {
                        let iface = self.catalog.resolve(name)?;
                        let version = child_version(decoded.target.version(), &iface);
                        (iface, version, *id)
                    }
                    (
                        None,
                        ArgValue::UntypedNewId {
                            interface,
                            version,
                            id,
                        },
                    ) => (self.catalog.resolve(interface)?, *version, *id),
                    _ => {
                        return Err(WireError::InvalidMessage(format!(
                            "{}: new_id argument has the wrong shape",
                            sig.name
                        )))
                    }
                };
                let object = ProtocolObject::new(id, &iface, version, Role::for_side(self.side))?;
                self.registry.register(object.clone())?;
                Some(object)
            }
        };
        Ok(Incoming {
            target: decoded.target,
            direction: decoded.direction,
            opcode: decoded.opcode,
            args: decoded.args,
            created,
        })
    }

    /// Completes processing of a received message: a destructor message ends
    /// its target's life once handlers have run.
    ///
    /// # Errors
    ///
    /// As [`Session::destroy_object`].
    pub fn finish(&mut self, target_id: u32, destructor: bool) -> Result<()> {
        if destructor && self.registry.get(target_id).is_some() {
            self.destroy_object(target_id)?;
        }
        Ok(())
    }

    /// Client side: completes two-phase reuse after `wl_display.delete_id`.
    pub(crate) fn acknowledge_id(&mut self, id: u32) {
        if let Err(err) = self.registry.acknowledge(id) {
            warn!(id, %err, "delete_id for an id that is not awaiting acknowledgment");
        }
    }

    /// Bulk teardown.  Every proxy and resource becomes invalid.
    pub fn teardown(&mut self) {
        let dropped = self.registry.clear();
        self.outgoing.clear();
        self.registries.clear();
        debug!(side = %self.side, dropped, "session torn down");
    }

    // ── Globals ───────────────────────────────────────────────────────────────

    /// Server side: advertises a global and announces it to every bound
    /// registry.  Returns its name.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] if the catalog lacks `interface`,
    /// [`WireError::VersionMismatch`] if `version` is outside its range.
    pub fn create_global(&mut self, interface: &str, version: u32) -> Result<u32> {
        let iface = self.catalog.resolve(interface)?;
        iface.bind(version)?;
        let name = self.next_global_name;
        self.next_global_name += 1;
        let global = Global {
            name,
            interface: interface.to_string(),
            version,
        };
        for registry in self.registries.clone() {
            self.announce_global(registry, &global)?;
        }
        debug!(name, interface, version, "global created");
        self.globals.insert(name, global);
        Ok(name)
    }

    /// Server side: withdraws a global and tells every bound registry.
    ///
    /// # Errors
    ///
    /// Encoding errors only; an unknown name is `Ok(None)`.
    pub fn remove_global(&mut self, name: u32) -> Result<Option<Global>> {
        let Some(global) = self.globals.remove(&name) else {
            return Ok(None);
        };
        for registry in self.registries.clone() {
            let resource = self.resource(registry)?;
            resource.post_event(self, wl_registry::EVT_GLOBAL_REMOVE, vec![ArgValue::Uint(name)])?;
        }
        debug!(name, interface = %global.interface, "global removed");
        Ok(Some(global))
    }

    /// Globals this end knows about: created ones on a server, advertised
    /// ones on a client.
    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    pub fn global(&self, name: u32) -> Option<&Global> {
        self.globals.get(&name)
    }

    /// First global advertising `interface`.
    pub fn find_global(&self, interface: &str) -> Option<&Global> {
        self.globals.values().find(|g| g.interface == interface)
    }

    pub(crate) fn record_global(&mut self, global: Global) {
        self.globals.insert(global.name, global);
    }

    pub(crate) fn forget_global(&mut self, name: u32) {
        self.globals.remove(&name);
    }

    /// Server side: a client bound a registry; send it every global.
    pub(crate) fn attach_registry(&mut self, registry: u32) -> Result<()> {
        self.registries.push(registry);
        let globals: Vec<Global> = self.globals.values().cloned().collect();
        for global in &globals {
            self.announce_global(registry, global)?;
        }
        Ok(())
    }

    fn announce_global(&mut self, registry: u32, global: &Global) -> Result<()> {
        let resource = self.resource(registry)?;
        resource.post_event(
            self,
            wl_registry::EVT_GLOBAL,
            vec![
                ArgValue::Uint(global.name),
                ArgValue::string(global.interface.as_str()),
                ArgValue::Uint(global.version),
            ],
        )
    }
}

fn insert_arg(args: &mut Vec<ArgValue>, index: usize, value: ArgValue) {
    let index = index.min(args.len());
    args.insert(index, value);
}
