//! Plugin data: immutable, shareable configuration carried by plugins
//!
//! Plugin data is compared by value and is `Send + Sync`, so one plugin set
//! can seed several simulations on several threads. To change a value, copy
//! it into its builder with `to_builder()`, mutate the builder, and build a
//! new instance; the original is never touched.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Object-safe helpers implemented for every comparable plugin data type
pub trait DynPluginData: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Any + PartialEq + Send + Sync> DynPluginData for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().map_or(false, |other| self == other)
    }
}

/// Immutable configuration value contributed by a plugin
pub trait PluginData: DynPluginData + fmt::Debug {
    /// A builder holding a copy of this value
    fn to_builder(&self) -> Box<dyn PluginDataBuilder>;
}

/// Mutable copy of a plugin data value
pub trait PluginDataBuilder: AnyBuilder {
    fn build(self: Box<Self>) -> Arc<dyn PluginData>;
}

/// Downcasting support for builders
pub trait AnyBuilder: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AnyBuilder for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Downcast a shared plugin data value to its concrete type
pub(crate) fn downcast_data<T: PluginData>(data: &Arc<dyn PluginData>) -> Option<Arc<T>> {
    Arc::clone(data).into_any_arc().downcast::<T>().ok()
}

/// Multiset equality: same values, ignoring order
pub(crate) fn same_data_multiset(a: &[Arc<dyn PluginData>], b: &[Arc<dyn PluginData>]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut unmatched: Vec<&dyn PluginData> = b.iter().map(|data| data.as_ref()).collect();
    for left in a {
        let position = unmatched
            .iter()
            .position(|right| left.dyn_eq(right.as_any()));
        match position {
            Some(index) => {
                unmatched.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}
