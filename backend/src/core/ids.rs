//! Opaque identities for the components of a simulation
//!
//! Actor, data manager and report ids are assigned by the engine in the order
//! the components are added, starting at zero. They are plain unsigned
//! integers, so a negative id cannot be constructed. Plugin ids are chosen by
//! plugin authors and compare by their wrapped value.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! component_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            pub const fn new(value: usize) -> Self {
                Self(value)
            }

            pub fn value(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<$name> for usize {
            fn from(id: $name) -> usize {
                id.0
            }
        }
    };
}

component_id!(
    /// Identifies an actor for the lifetime of one simulation
    ActorId,
    "actor#"
);

component_id!(
    /// Identifies a data manager for the lifetime of one simulation
    DataManagerId,
    "data_manager#"
);

component_id!(
    /// Identifies a report for the lifetime of one simulation
    ReportId,
    "report#"
);

/// Identifies a plugin; equality and ordering follow the wrapped value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(value: &str) -> Self {
        PluginId::new(value)
    }
}
