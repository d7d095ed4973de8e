//! Event types, projections and filters
//!
//! Events are plain typed values. Subscriptions are keyed by the exact Rust
//! type of the event: subscribing to one type never delivers another.
//!
//! Actors and reports narrow delivery with an [`EventFilter`], a set of
//! `(projection, expected value)` pairs. A projection is an
//! [`IdentifiableFunction`]: a stable id plus a function from the event to a
//! [`FilterValue`]. Two functions with the same id on the same event type are
//! considered the same projection.
//!
//! # Example
//!
//! ```rust
//! use nucleus_core_rs::events::{Event, EventFilter, IdentifiableFunction};
//!
//! #[derive(Debug)]
//! struct StockChanged {
//!     shelf: u32,
//!     level: i64,
//! }
//!
//! impl Event for StockChanged {}
//!
//! let shelf = IdentifiableFunction::new("shelf", |e: &StockChanged| e.shelf.into());
//! let filter = EventFilter::builder()
//!     .add_function_value_pair(shelf, 7u32)
//!     .build();
//!
//! assert!(filter.matches(&StockChanged { shelf: 7, level: 3 }));
//! assert!(!filter.matches(&StockChanged { shelf: 8, level: 3 }));
//! ```

use crate::core::ids::{ActorId, DataManagerId, PluginId, ReportId};
use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

/// Marker for values that travel on the event bus
pub trait Event: Any + fmt::Debug {}

// ============================================================================
// Filter values
// ============================================================================

/// Projected value compared by filters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterValue {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
}

macro_rules! filter_value_from {
    ($variant:ident, $target:ty, $($source:ty),+) => {
        $(
            impl From<$source> for FilterValue {
                fn from(value: $source) -> Self {
                    FilterValue::$variant(value as $target)
                }
            }
        )+
    };
}

filter_value_from!(Int, i64, i8, i16, i32, i64);
filter_value_from!(UInt, u64, u8, u16, u32, u64, usize);

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<ActorId> for FilterValue {
    fn from(id: ActorId) -> Self {
        FilterValue::UInt(id.value() as u64)
    }
}

impl From<DataManagerId> for FilterValue {
    fn from(id: DataManagerId) -> Self {
        FilterValue::UInt(id.value() as u64)
    }
}

impl From<ReportId> for FilterValue {
    fn from(id: ReportId) -> Self {
        FilterValue::UInt(id.value() as u64)
    }
}

impl From<PluginId> for FilterValue {
    fn from(id: PluginId) -> Self {
        FilterValue::Text(id.as_str().to_string())
    }
}

// ============================================================================
// Identifiable functions
// ============================================================================

pub(crate) type ErasedProjection = Rc<dyn Fn(&dyn Any) -> Option<FilterValue>>;

/// A projection of an event paired with a stable identity
pub struct IdentifiableFunction<E> {
    id: String,
    function: Rc<dyn Fn(&E) -> FilterValue>,
}

impl<E: Event> IdentifiableFunction<E> {
    pub fn new(id: impl Into<String>, function: impl Fn(&E) -> FilterValue + 'static) -> Self {
        Self {
            id: id.into(),
            function: Rc::new(function),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn apply(&self, event: &E) -> FilterValue {
        (self.function)(event)
    }

    /// Type-erased form stored by the registry
    pub(crate) fn erase(&self) -> ErasedProjection {
        let function = Rc::clone(&self.function);
        Rc::new(move |event: &dyn Any| event.downcast_ref::<E>().map(|e| function(e)))
    }
}

impl<E> Clone for IdentifiableFunction<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            function: Rc::clone(&self.function),
        }
    }
}

impl<E> PartialEq for IdentifiableFunction<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> fmt::Debug for IdentifiableFunction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifiableFunction")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Event filters
// ============================================================================

/// Selects events of type `E` whose projections equal the expected values
///
/// Pairs are kept sorted by function id, so the order in which they were
/// added does not matter. Adding a second value for the same function id
/// replaces the first.
pub struct EventFilter<E> {
    pairs: Vec<(IdentifiableFunction<E>, FilterValue)>,
}

impl<E: Event> EventFilter<E> {
    pub fn builder() -> EventFilterBuilder<E> {
        EventFilterBuilder { pairs: Vec::new() }
    }

    /// Filter accepting every event of type `E`
    pub fn of_type() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn event_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    pub fn pairs(&self) -> &[(IdentifiableFunction<E>, FilterValue)] {
        &self.pairs
    }

    pub fn matches(&self, event: &E) -> bool {
        self.pairs
            .iter()
            .all(|(function, value)| function.apply(event) == *value)
    }

    /// `(function id, value)` path identifying this filter
    pub(crate) fn path(&self) -> Vec<(String, FilterValue)> {
        self.pairs
            .iter()
            .map(|(function, value)| (function.id.clone(), value.clone()))
            .collect()
    }
}

impl<E> Clone for EventFilter<E> {
    fn clone(&self) -> Self {
        Self {
            pairs: self.pairs.clone(),
        }
    }
}

impl<E> PartialEq for EventFilter<E> {
    fn eq(&self, other: &Self) -> bool {
        self.pairs == other.pairs
    }
}

impl<E> fmt::Debug for EventFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("event_type", &std::any::type_name::<E>())
            .field("pairs", &self.pairs)
            .finish()
    }
}

/// Builder for [`EventFilter`]; consumed by `build`
pub struct EventFilterBuilder<E> {
    pairs: Vec<(IdentifiableFunction<E>, FilterValue)>,
}

impl<E: Event> EventFilterBuilder<E> {
    pub fn add_function_value_pair(
        mut self,
        function: IdentifiableFunction<E>,
        value: impl Into<FilterValue>,
    ) -> Self {
        self.pairs.retain(|(existing, _)| existing.id != function.id);
        self.pairs.push((function, value.into()));
        self
    }

    pub fn build(mut self) -> EventFilter<E> {
        self.pairs.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        EventFilter { pairs: self.pairs }
    }
}
