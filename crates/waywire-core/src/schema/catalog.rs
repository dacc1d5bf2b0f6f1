//! Name-keyed interface registry.
//!
//! Arguments refer to other interfaces by name only, so interfaces can be
//! defined in any order (or refer to each other) and are resolved here when
//! a message is actually built or decoded.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::schema::interface::Interface;

#[derive(Debug, Default, Clone)]
pub struct InterfaceCatalog {
    interfaces: HashMap<String, Arc<Interface>>,
}

impl InterfaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface.
    ///
    /// # Errors
    ///
    /// [`WireError::InvalidSchema`] if a different interface with the same
    /// name is already present.  Re-inserting an identical schema is a no-op.
    pub fn insert(&mut self, interface: Arc<Interface>) -> Result<()> {
        if let Some(existing) = self.interfaces.get(interface.name()) {
            if existing == &interface {
                return Ok(());
            }
            return Err(WireError::InvalidSchema {
                interface: interface.name().to_string(),
                reason: "a different interface with this name is already registered".into(),
            });
        }
        self.interfaces
            .insert(interface.name().to_string(), interface);
        Ok(())
    }

    /// Builder-style [`InterfaceCatalog::insert`].
    ///
    /// # Errors
    ///
    /// Same as [`InterfaceCatalog::insert`].
    pub fn with(mut self, interface: Arc<Interface>) -> Result<Self> {
        self.insert(interface)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Interface>> {
        self.interfaces.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] if `name` is not registered.
    pub fn resolve(&self, name: &str) -> Result<Arc<Interface>> {
        self.interfaces
            .get(name)
            .cloned()
            .ok_or_else(|| WireError::UnknownInterface(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values()
    }

    /// Checks that every interface named by an argument is registered.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownInterface`] naming the first dangling reference.
    pub fn validate(&self) -> Result<()> {
        for iface in self.interfaces.values() {
            let args = iface
                .requests()
                .iter()
                .chain(iface.events())
                .flat_map(|sig| sig.args.iter());
            for arg in args {
                if let Some(name) = &arg.interface {
                    if !self.contains(name) {
                        return Err(WireError::UnknownInterface(name.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}
