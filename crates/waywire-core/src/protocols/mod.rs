//! Protocol bindings shipped with the crate.
//!
//! Each submodule holds the schemas of one protocol file plus typed proxy and
//! resource wrappers, laid out the way a scanner would emit them.
