//! Proxy/resource runtime: turns calls into queued messages and received
//! messages into handler calls.

pub mod binding;
pub mod dispatch;
pub mod proxy;
pub mod resource;
pub mod session;

pub use binding::{finalize, InterfaceDescriptor, ProxyImpl, ResourceImpl};
pub use dispatch::{Dispatcher, Handler, Incoming};
pub use proxy::Proxy;
pub use resource::Resource;
pub use session::{child_version, Global, Session};
