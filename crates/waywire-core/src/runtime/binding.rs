//! Typed wrappers over [`Proxy`] and [`Resource`].
//!
//! Bindings are built in two steps: the schema first, then the behaviour
//! types.  [`finalize`] joins the two into an immutable
//! [`InterfaceDescriptor`] after checking they agree on the interface.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::runtime::proxy::Proxy;
use crate::runtime::resource::Resource;
use crate::schema::Interface;

/// Client-side behaviour for one interface.
pub trait ProxyImpl: Sized {
    /// Name of the interface this type wraps.
    const INTERFACE: &'static str;

    fn from_proxy(proxy: Proxy) -> Self;

    fn proxy(&self) -> &Proxy;
}

/// Server-side behaviour for one interface.
pub trait ResourceImpl: Sized {
    const INTERFACE: &'static str;

    fn from_resource(resource: Resource) -> Self;

    fn resource(&self) -> &Resource;
}

/// An interface schema bound to its proxy and resource types.
pub struct InterfaceDescriptor<P, R> {
    interface: Arc<Interface>,
    _impls: PhantomData<fn() -> (P, R)>,
}

/// Binds `interface` to its behaviour types.
///
/// # Errors
///
/// [`WireError::InvalidSchema`] if either type wraps a different interface.
pub fn finalize<P: ProxyImpl, R: ResourceImpl>(
    interface: Arc<Interface>,
) -> Result<InterfaceDescriptor<P, R>> {
    for (kind, name) in [("proxy", P::INTERFACE), ("resource", R::INTERFACE)] {
        if name != interface.name() {
            return Err(WireError::InvalidSchema {
                interface: interface.name().to_string(),
                reason: format!("{kind} type is bound to {name}"),
            });
        }
    }
    Ok(InterfaceDescriptor {
        interface,
        _impls: PhantomData,
    })
}

impl<P: ProxyImpl, R: ResourceImpl> InterfaceDescriptor<P, R> {
    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn name(&self) -> &str {
        self.interface.name()
    }

    /// Wraps an untyped proxy.
    ///
    /// # Errors
    ///
    /// [`WireError::WrongInterface`] if the proxy is of another interface.
    pub fn proxy(&self, proxy: Proxy) -> Result<P> {
        self.check(proxy.id(), proxy.interface())?;
        Ok(P::from_proxy(proxy))
    }

    /// Wraps an untyped resource.
    ///
    /// # Errors
    ///
    /// [`WireError::WrongInterface`] if the resource is of another interface.
    pub fn resource(&self, resource: Resource) -> Result<R> {
        self.check(resource.id(), resource.interface())?;
        Ok(R::from_resource(resource))
    }

    fn check(&self, id: u32, found: &Interface) -> Result<()> {
        if found.name() != self.interface.name() {
            return Err(WireError::WrongInterface {
                id,
                expected: self.interface.name().to_string(),
                found: found.name().to_string(),
            });
        }
        Ok(())
    }
}

impl<P, R> Clone for InterfaceDescriptor<P, R> {
    fn clone(&self) -> Self {
        Self {
            interface: Arc::clone(&self.interface),
            _impls: PhantomData,
        }
    }
}

impl<P, R> fmt::Debug for InterfaceDescriptor<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDescriptor")
            .field("interface", &self.interface.name())
            .field("version", &self.interface.version())
            .finish()
    }
}
