//! Object identity: id spaces, live objects and the two-phase id lifecycle.

pub mod registry;

pub use registry::{
    DestroyOutcome, ObjectRegistry, ProtocolObject, Role, Side, CLIENT_ID_MAX, CLIENT_ID_MIN,
    SERVER_ID_MAX, SERVER_ID_MIN,
};
