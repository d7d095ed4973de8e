//! Plugins - units of composition
//!
//! A plugin has an id, the ids of the plugins it depends on, a set of plugin
//! data values, and an optional initializer. During startup the engine runs
//! every initializer once, in dependency order, handing it a
//! [`PluginContext`] through which it contributes data managers, actors and
//! reports.
//!
//! Plugins are `Send + Sync + Clone`: the same plugin set can be cloned into
//! simulations running on different threads.

pub mod data;
pub mod lookup;
pub mod ordering;
pub mod scenario;

pub use data::{AnyBuilder, DynPluginData, PluginData, PluginDataBuilder};
pub use lookup::find_unique;
pub use ordering::order_plugins;
pub use scenario::PluginDataBuilderContext;

use crate::core::ids::PluginId;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::orchestrator::context::PluginContext;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Plugin initialization callback
pub type PluginInitializer = Arc<dyn Fn(&PluginContext) -> NucleusResult<()> + Send + Sync>;

/// A unit of composition contributed to a simulation
#[derive(Clone)]
pub struct Plugin {
    id: PluginId,
    dependencies: BTreeSet<PluginId>,
    plugin_datas: Vec<Arc<dyn PluginData>>,
    initializer: Option<PluginInitializer>,
}

impl Plugin {
    pub fn builder() -> PluginBuilder {
        PluginBuilder::default()
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn dependencies(&self) -> &BTreeSet<PluginId> {
        &self.dependencies
    }

    pub fn plugin_datas(&self) -> &[Arc<dyn PluginData>] {
        &self.plugin_datas
    }

    pub fn initializer(&self) -> Option<&PluginInitializer> {
        self.initializer.as_ref()
    }

    /// The single plugin data of type `T` carried by this plugin
    pub fn get_plugin_data<T: PluginData>(&self) -> NucleusResult<Arc<T>> {
        find_unique(
            self.get_plugin_datas::<T>(),
            ErrorKind::UnknownPluginDataClass,
            ErrorKind::AmbiguousPluginDataClass,
            std::any::type_name::<T>(),
        )
    }

    /// Every plugin data of type `T` carried by this plugin
    pub fn get_plugin_datas<T: PluginData>(&self) -> Vec<Arc<T>> {
        self.plugin_datas
            .iter()
            .filter_map(data::downcast_data::<T>)
            .collect()
    }

    /// Same plugin with its data replaced
    pub(crate) fn with_plugin_datas(&self, plugin_datas: Vec<Arc<dyn PluginData>>) -> Plugin {
        Plugin {
            id: self.id.clone(),
            dependencies: self.dependencies.clone(),
            plugin_datas,
            initializer: self.initializer.clone(),
        }
    }
}

/// Equality covers the id, the dependencies and the plugin data; the
/// initializer is not comparable and is ignored
impl PartialEq for Plugin {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.dependencies == other.dependencies
            && data::same_data_multiset(&self.plugin_datas, &other.plugin_datas)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("plugin_datas", &self.plugin_datas)
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}

/// Builder for [`Plugin`]; consumed by `build`
#[derive(Default)]
pub struct PluginBuilder {
    id: Option<PluginId>,
    dependencies: BTreeSet<PluginId>,
    plugin_datas: Vec<Arc<dyn PluginData>>,
    initializer: Option<PluginInitializer>,
}

impl PluginBuilder {
    pub fn set_plugin_id(mut self, id: impl Into<PluginId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn add_plugin_dependency(mut self, id: impl Into<PluginId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn add_plugin_data(mut self, data: impl PluginData) -> Self {
        self.plugin_datas.push(Arc::new(data));
        self
    }

    /// Add plugin data that is already shared
    pub fn add_shared_plugin_data(mut self, data: Arc<dyn PluginData>) -> Self {
        self.plugin_datas.push(data);
        self
    }

    pub fn set_initializer(
        mut self,
        initializer: impl Fn(&PluginContext) -> NucleusResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    pub fn build(self) -> NucleusResult<Plugin> {
        let id = self.id.ok_or_else(|| ContractError::new(ErrorKind::NullPluginId))?;
        Ok(Plugin {
            id,
            dependencies: self.dependencies,
            plugin_datas: self.plugin_datas,
            initializer: self.initializer,
        })
    }
}
