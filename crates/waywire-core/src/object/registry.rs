//! Per-connection table of live protocol objects.
//!
//! Ids come from two disjoint spaces: the client allocates from
//! `1..=0xFEFFFFFF`, the server from `0xFF000000..=0xFFFFFFFF`.  Id 0 is the
//! null object and never allocated.
//!
//! Reuse is two-phase for ids the client allocated.  When a client destroys
//! one of its objects, the server may still have events for it in flight, so
//! the id is parked as a *zombie* until the server's `delete_id` arrives.
//! Only then can it be handed out again.  Without this a new object could
//! receive events meant for the old one.
//!
//! A client that destroys an object the server created leaves a *tombstone*
//! instead: the server may still be sending to it, and only a later new_id
//! from the server reuses the slot.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Result, WireError};
use crate::schema::{BoundInterface, Interface};

pub const CLIENT_ID_MIN: u32 = 0x0000_0001;
pub const CLIENT_ID_MAX: u32 = 0xFEFF_FFFF;
pub const SERVER_ID_MIN: u32 = 0xFF00_0000;
pub const SERVER_ID_MAX: u32 = 0xFFFF_FFFF;

/// One end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }

    /// Returns `true` if `id` lies in this side's allocation range.
    pub fn owns(self, id: u32) -> bool {
        match self {
            Side::Client => (CLIENT_ID_MIN..=CLIENT_ID_MAX).contains(&id),
            Side::Server => id >= SERVER_ID_MIN,
        }
    }

    /// Side whose range contains `id`; `None` for the null id.
    pub fn of(id: u32) -> Option<Side> {
        if id == 0 {
            None
        } else if Side::Client.owns(id) {
            Some(Side::Client)
        } else {
            Some(Side::Server)
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which stub an object is on this end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client-side handle; sends requests, receives events.
    Proxy,
    /// Server-side handle; receives requests, sends events.
    Resource,
}

impl Role {
    pub fn for_side(side: Side) -> Role {
        match side {
            Side::Client => Role::Proxy,
            Side::Server => Role::Resource,
        }
    }
}

/// A live object: an id bound to an interface at a negotiated version.
#[derive(Debug, Clone)]
pub struct ProtocolObject {
    id: u32,
    bound: BoundInterface,
    role: Role,
}

impl ProtocolObject {
    /// # Errors
    ///
    /// [`WireError::VersionMismatch`] if `version` is 0 or above the
    /// interface's declared version.
    pub fn new(id: u32, interface: &Arc<Interface>, version: u32, role: Role) -> Result<Self> {
        Ok(Self {
            id,
            bound: interface.bind(version)?,
            role,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn interface(&self) -> &Arc<Interface> {
        self.bound.interface()
    }

    pub fn version(&self) -> u32 {
        self.bound.version()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn bound(&self) -> &BoundInterface {
        &self.bound
    }
}

impl fmt::Display for ProtocolObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.interface().name(), self.id)
    }
}

/// What [`ObjectRegistry::destroy`] did with the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Client-allocated id parked until the server acknowledges it.
    AwaitingAck,
    /// Our own id, immediately reusable.
    Recycled,
    /// The peer allocated this id; the peer decides when it is reused.
    /// A server must answer with `wl_display.delete_id`.
    PeerOwned,
}

#[derive(Debug)]
enum Slot {
    Live(ProtocolObject),
    /// Destroyed locally, waiting for `delete_id`.  The interface is kept so
    /// late events can be sized and their fds drained.
    Zombie(Arc<Interface>),
    /// Server-created object destroyed by the client.  Messages to it are
    /// dropped until the server announces the id again.
    Tombstone(Arc<Interface>),
}

/// Allocation state of one id range: LIFO free-list plus a counter.
#[derive(Debug)]
struct IdSpace {
    min: u32,
    max: u32,
    // u64 so the counter can step past SERVER_ID_MAX without wrapping.
    next: u64,
    free: Vec<u32>,
}

impl IdSpace {
    fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            next: u64::from(min),
            free: Vec::new(),
        }
    }

    fn take(&mut self) -> Option<u32> {
        if let Some(id) = self.free.pop() {
            return Some(id);
        }
        if self.next > u64::from(self.max) {
            return None;
        }
        let id = self.next as u32;
        self.next += 1;
        Some(id)
    }

    fn give_back(&mut self, id: u32) {
        debug_assert!((self.min..=self.max).contains(&id));
        self.free.push(id);
    }

    fn reset(&mut self) {
        self.next = u64::from(self.min);
        self.free.clear();
    }
}

/// Live objects of one connection, keyed by id.
#[derive(Debug)]
pub struct ObjectRegistry {
    side: Side,
    objects: HashMap<u32, Slot>,
    client_ids: IdSpace,
    server_ids: IdSpace,
}

impl ObjectRegistry {
    /// Creates an empty registry for the `side` end of a connection.
    pub fn new(side: Side) -> Self {
        Self {
            side,
            objects: HashMap::new(),
            client_ids: IdSpace::new(CLIENT_ID_MIN, CLIENT_ID_MAX),
            server_ids: IdSpace::new(SERVER_ID_MIN, SERVER_ID_MAX),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Returns the next unused id of `side`'s range in O(1).
    ///
    /// The id is reserved only once [`ObjectRegistry::register`]ed; an id
    /// that never reaches the wire goes back through [`ObjectRegistry::release`].
    ///
    /// # Errors
    ///
    /// [`WireError::IdSpaceExhausted`] when every id in the range is taken.
    pub fn allocate_id(&mut self, side: Side) -> Result<u32> {
        let space = match side {
            Side::Client => &mut self.client_ids,
            Side::Server => &mut self.server_ids,
        };
        loop {
            let id = space
                .take()
                .ok_or(WireError::IdSpaceExhausted(side.label()))?;
            // Skip ids the peer registered in this range out of band (id 1 on
            // a server is the display, registered without allocation).
            if !self.objects.contains_key(&id) {
                trace!(id, %side, "allocated object id");
                return Ok(id);
            }
        }
    }

    /// Inserts a live object.
    ///
    /// # Errors
    ///
    /// [`WireError::DuplicateId`] if the id is live or still a zombie.  A
    /// tombstone is replaced.
    pub fn register(&mut self, object: ProtocolObject) -> Result<()> {
        let id = object.id();
        if id == 0 || self.is_taken(id) {
            return Err(WireError::DuplicateId(id));
        }
        debug!(object = %object, version = object.version(), "registered object");
        self.objects.insert(id, Slot::Live(object));
        Ok(())
    }

    /// # Errors
    ///
    /// [`WireError::UnknownObject`] unless `id` is live.
    pub fn lookup(&self, id: u32) -> Result<&ProtocolObject> {
        self.get(id).ok_or(WireError::UnknownObject(id))
    }

    pub fn get(&self, id: u32) -> Option<&ProtocolObject> {
        match self.objects.get(&id) {
            Some(Slot::Live(object)) => Some(object),
            _ => None,
        }
    }

    /// Interface of a locally destroyed object the peer may still address:
    /// a client id awaiting acknowledgment or a tombstoned server id.
    pub fn zombie(&self, id: u32) -> Option<&Arc<Interface>> {
        match self.objects.get(&id) {
            Some(Slot::Zombie(interface) | Slot::Tombstone(interface)) => Some(interface),
            _ => None,
        }
    }

    fn is_taken(&self, id: u32) -> bool {
        matches!(
            self.objects.get(&id),
            Some(Slot::Live(_) | Slot::Zombie(_))
        )
    }

    /// Checks that `id`, announced by `sender` in a NewId argument, may be
    /// registered.
    ///
    /// # Errors
    ///
    /// [`WireError::IdOutOfRange`] if it is outside `sender`'s range,
    /// [`WireError::DuplicateId`] if it is live or a zombie.
    pub fn check_incoming_new_id(&self, id: u32, sender: Side) -> Result<()> {
        if !sender.owns(id) {
            return Err(WireError::IdOutOfRange {
                id,
                side: sender.label(),
            });
        }
        if self.is_taken(id) {
            return Err(WireError::DuplicateId(id));
        }
        Ok(())
    }

    /// Ends the life of a live object.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] unless `id` is live.
    pub fn destroy(&mut self, id: u32) -> Result<DestroyOutcome> {
        let object = match self.objects.remove(&id) {
            Some(Slot::Live(object)) => object,
            Some(zombie) => {
                self.objects.insert(id, zombie);
                return Err(WireError::UnknownObject(id));
            }
            None => return Err(WireError::UnknownObject(id)),
        };

        let outcome = match (self.side, Side::of(id)) {
            (Side::Client, Some(Side::Client)) => {
                self.objects
                    .insert(id, Slot::Zombie(Arc::clone(object.interface())));
                DestroyOutcome::AwaitingAck
            }
            (Side::Server, Some(Side::Server)) => {
                self.server_ids.give_back(id);
                DestroyOutcome::Recycled
            }
            (Side::Client, Some(Side::Server)) => {
                self.objects
                    .insert(id, Slot::Tombstone(Arc::clone(object.interface())));
                DestroyOutcome::PeerOwned
            }
            _ => DestroyOutcome::PeerOwned,
        };
        debug!(object = %object, ?outcome, "destroyed object");
        Ok(outcome)
    }

    /// Completes the two-phase reuse of a client id after `delete_id`.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownObject`] if `id` is not a zombie.
    pub fn acknowledge(&mut self, id: u32) -> Result<()> {
        match self.objects.get(&id) {
            Some(Slot::Zombie(_)) => {
                self.objects.remove(&id);
                self.client_ids.give_back(id);
                trace!(id, "id acknowledged, back on the free-list");
                Ok(())
            }
            _ => Err(WireError::UnknownObject(id)),
        }
    }

    /// Rolls back an allocation that never reached the wire, skipping the
    /// acknowledgment phase.  Removes the object if it was registered.
    pub fn release(&mut self, id: u32) {
        self.objects.remove(&id);
        match Side::of(id) {
            Some(Side::Client) => self.client_ids.give_back(id),
            Some(Side::Server) => self.server_ids.give_back(id),
            None => {}
        }
    }

    /// Bulk teardown: drops every object and zombie and resets both ranges.
    /// Returns the number of live objects dropped.
    pub fn clear(&mut self) -> usize {
        let live = self
            .objects
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count();
        self.objects.clear();
        self.client_ids.reset();
        self.server_ids.reset();
        debug!(live, "registry cleared");
        live
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolObject> {
        self.objects.values().filter_map(|slot| match slot {
            Slot::Live(object) => Some(object),
            Slot::Zombie(_) | Slot::Tombstone(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MessageSpec;

    fn iface() -> Arc<Interface> {
        Interface::builder("wl_thing", 2)
            .request(0, MessageSpec::new("destroy").since(1).destructor())
            .and_then(|b| b.build())
            .expect("build")
    }

    fn object(id: u32, role: Role) -> ProtocolObject {
        ProtocolObject::new(id, &iface(), 1, role).expect("object")
    }

    #[test]
    fn test_id_ranges_are_disjoint() {
        assert_eq!(Side::of(0), None);
        assert_eq!(Side::of(1), Some(Side::Client));
        assert_eq!(Side::of(CLIENT_ID_MAX), Some(Side::Client));
        assert_eq!(Side::of(SERVER_ID_MIN), Some(Side::Server));
        assert_eq!(Side::of(SERVER_ID_MAX), Some(Side::Server));
    }

    #[test]
    fn test_allocation_is_sequential_per_side() {
        let mut reg = ObjectRegistry::new(Side::Client);
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), 1);
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), 2);
        assert_eq!(reg.allocate_id(Side::Server).expect("id"), SERVER_ID_MIN);
    }

    #[test]
    fn test_two_phase_reuse_waits_for_acknowledgment() {
        // Arrange
        let mut reg = ObjectRegistry::new(Side::Client);
        let first = reg.allocate_id(Side::Client).expect("id");
        reg.register(object(first, Role::Proxy)).expect("register");

        // Act
        let outcome = reg.destroy(first).expect("destroy");
        let before_ack = reg.allocate_id(Side::Client).expect("id");

        // Assert
        assert_eq!(outcome, DestroyOutcome::AwaitingAck);
        assert_ne!(before_ack, first, "id reused before delete_id arrived");
        assert!(reg.zombie(first).is_some());
        assert!(matches!(reg.lookup(first), Err(WireError::UnknownObject(_))));

        reg.acknowledge(first).expect("ack");
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), first);
    }

    #[test]
    fn test_zombie_blocks_re_registration() {
        let mut reg = ObjectRegistry::new(Side::Client);
        reg.register(object(5, Role::Proxy)).expect("register");
        reg.destroy(5).expect("destroy");
        assert!(matches!(
            reg.register(object(5, Role::Proxy)),
            Err(WireError::DuplicateId(5))
        ));
    }

    #[test]
    fn test_server_recycles_its_own_ids_immediately() {
        let mut reg = ObjectRegistry::new(Side::Server);
        let id = reg.allocate_id(Side::Server).expect("id");
        reg.register(object(id, Role::Resource)).expect("register");
        assert_eq!(reg.destroy(id).expect("destroy"), DestroyOutcome::Recycled);
        assert_eq!(reg.allocate_id(Side::Server).expect("id"), id);
    }

    #[test]
    fn test_peer_owned_ids_are_just_removed() {
        let mut server = ObjectRegistry::new(Side::Server);
        server.register(object(7, Role::Resource)).expect("register");
        assert_eq!(server.destroy(7).expect("destroy"), DestroyOutcome::PeerOwned);
        assert!(server.get(7).is_none());
        assert!(server.zombie(7).is_none());

        let mut client = ObjectRegistry::new(Side::Client);
        client
            .register(object(SERVER_ID_MIN, Role::Proxy))
            .expect("register");
        assert_eq!(
            client.destroy(SERVER_ID_MIN).expect("destroy"),
            DestroyOutcome::PeerOwned
        );
    }

    #[test]
    fn test_client_tombstones_destroyed_server_object() {
        // Arrange
        let mut client = ObjectRegistry::new(Side::Client);
        client
            .register(object(SERVER_ID_MIN, Role::Proxy))
            .expect("register");

        // Act
        client.destroy(SERVER_ID_MIN).expect("destroy");

        // Assert: late messages can still be sized, and the server may reuse the id.
        assert!(client.get(SERVER_ID_MIN).is_none());
        assert!(client.zombie(SERVER_ID_MIN).is_some());
        assert!(client.is_empty());
        assert!(matches!(
            client.acknowledge(SERVER_ID_MIN),
            Err(WireError::UnknownObject(_))
        ));
        assert!(client.check_incoming_new_id(SERVER_ID_MIN, Side::Server).is_ok());
        client
            .register(object(SERVER_ID_MIN, Role::Proxy))
            .expect("reuse");
        assert!(client.get(SERVER_ID_MIN).is_some());
        assert!(client.zombie(SERVER_ID_MIN).is_none());
    }

    #[test]
    fn test_duplicate_live_id_is_rejected() {
        let mut reg = ObjectRegistry::new(Side::Server);
        reg.register(object(3, Role::Resource)).expect("register");
        assert!(matches!(
            reg.register(object(3, Role::Resource)),
            Err(WireError::DuplicateId(3))
        ));
    }

    #[test]
    fn test_destroy_unknown_and_ack_unknown() {
        let mut reg = ObjectRegistry::new(Side::Client);
        assert!(matches!(reg.destroy(9), Err(WireError::UnknownObject(9))));
        assert!(matches!(reg.acknowledge(9), Err(WireError::UnknownObject(9))));
    }

    #[test]
    fn test_check_incoming_new_id() {
        let mut reg = ObjectRegistry::new(Side::Server);
        reg.register(object(4, Role::Resource)).expect("register");
        assert!(reg.check_incoming_new_id(5, Side::Client).is_ok());
        assert!(matches!(
            reg.check_incoming_new_id(4, Side::Client),
            Err(WireError::DuplicateId(4))
        ));
        assert!(matches!(
            reg.check_incoming_new_id(SERVER_ID_MIN, Side::Client),
            Err(WireError::IdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_release_skips_acknowledgment() {
        let mut reg = ObjectRegistry::new(Side::Client);
        let id = reg.allocate_id(Side::Client).expect("id");
        reg.register(object(id, Role::Proxy)).expect("register");
        reg.release(id);
        assert!(reg.is_empty());
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), id);
    }

    #[test]
    fn test_allocation_skips_ids_registered_out_of_band() {
        let mut reg = ObjectRegistry::new(Side::Server);
        reg.register(object(1, Role::Resource)).expect("display");
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), 2);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut reg = ObjectRegistry::new(Side::Client);
        reg.register(object(1, Role::Proxy)).expect("register");
        reg.register(object(2, Role::Proxy)).expect("register");
        reg.destroy(2).expect("destroy");
        assert_eq!(reg.clear(), 1);
        assert!(reg.is_empty());
        assert!(reg.zombie(2).is_none());
        assert_eq!(reg.allocate_id(Side::Client).expect("id"), 1);
    }
}
