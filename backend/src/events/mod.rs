//! Event bus: typed events, filters and the subscription registry

pub(crate) mod registry;
pub mod types;

pub use types::{Event, EventFilter, EventFilterBuilder, FilterValue, IdentifiableFunction};
