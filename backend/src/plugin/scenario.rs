//! Scenario layer seam
//!
//! An experiment varies a base plugin set by editing plugin data. The
//! [`PluginDataBuilderContext`] holds a builder for every plugin data value;
//! the scenario code looks builders up by type, mutates them, and then
//! builds a fresh plugin set. The base plugins are never modified, so one
//! base can feed many scenarios.

use crate::error::{ErrorKind, NucleusResult};
use crate::plugin::data::{downcast_data, PluginData, PluginDataBuilder};
use crate::plugin::lookup::find_unique;
use crate::plugin::Plugin;
use std::sync::Arc;

struct PluginEntry {
    plugin: Plugin,
    builders: Vec<Box<dyn PluginDataBuilder>>,
}

/// Builders for the plugin data of a plugin set
pub struct PluginDataBuilderContext {
    entries: Vec<PluginEntry>,
}

impl PluginDataBuilderContext {
    pub fn new(plugins: &[Plugin]) -> Self {
        let entries = plugins
            .iter()
            .map(|plugin| PluginEntry {
                plugin: plugin.clone(),
                builders: plugin.plugin_datas().iter().map(|d| d.to_builder()).collect(),
            })
            .collect();
        Self { entries }
    }

    /// The single builder of type `B` across all plugins
    pub fn get_plugin_data_builder<B: PluginDataBuilder>(&mut self) -> NucleusResult<&mut B> {
        let matches = self
            .entries
            .iter_mut()
            .flat_map(|entry| entry.builders.iter_mut())
            .filter_map(|builder| (**builder).as_any_mut().downcast_mut::<B>());
        find_unique(
            matches,
            ErrorKind::UnknownPluginDataBuilderClass,
            ErrorKind::AmbiguousPluginDataBuilderClass,
            std::any::type_name::<B>(),
        )
    }

    /// The single original plugin data of type `T` across all plugins
    pub fn get_plugin_data<T: PluginData>(&self) -> NucleusResult<Arc<T>> {
        let matches = self
            .entries
            .iter()
            .flat_map(|entry| entry.plugin.plugin_datas().iter())
            .filter_map(downcast_data::<T>);
        find_unique(
            matches,
            ErrorKind::UnknownPluginDataClass,
            ErrorKind::AmbiguousPluginDataClass,
            std::any::type_name::<T>(),
        )
    }

    /// Build new plugins carrying the edited plugin data
    pub fn build_plugins(self) -> Vec<Plugin> {
        self.entries
            .into_iter()
            .map(|entry| {
                let datas = entry.builders.into_iter().map(|b| b.build()).collect();
                entry.plugin.with_plugin_datas(datas)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::data::tests::{Capacity, CapacityBuilder, Label};

    fn base() -> Vec<Plugin> {
        vec![
            Plugin::builder()
                .set_plugin_id("beds")
                .add_plugin_data(Capacity { beds: 10 })
                .build()
                .unwrap(),
            Plugin::builder()
                .set_plugin_id("labels")
                .add_plugin_data(Label("a"))
                .add_plugin_data(Label("b"))
                .build()
                .unwrap(),
        ]
    }

    #[test]
    fn test_edit_builder_and_rebuild() {
        let base = base();
        let mut context = PluginDataBuilderContext::new(&base);
        context.get_plugin_data_builder::<CapacityBuilder>().unwrap().beds = 25;
        assert_eq!(context.get_plugin_data::<Capacity>().unwrap().beds, 10);

        let edited = context.build_plugins();
        assert_eq!(edited[0].get_plugin_data::<Capacity>().unwrap().beds, 25);
        assert_eq!(base[0].get_plugin_data::<Capacity>().unwrap().beds, 10);
        assert_eq!(edited[1], base[1]);
    }

    #[test]
    fn test_builder_lookup_outcomes() {
        let mut context = PluginDataBuilderContext::new(&base());
        assert_eq!(
            context.get_plugin_data_builder::<Label>().unwrap_err().kind(),
            ErrorKind::AmbiguousPluginDataBuilderClass
        );
        let empty: Vec<Plugin> = Vec::new();
        let mut context = PluginDataBuilderContext::new(&empty);
        assert_eq!(
            context
                .get_plugin_data_builder::<CapacityBuilder>()
                .unwrap_err()
                .kind(),
            ErrorKind::UnknownPluginDataBuilderClass
        );
        assert_eq!(
            context.get_plugin_data::<Capacity>().unwrap_err().kind(),
            ErrorKind::UnknownPluginDataClass
        );
    }
}
