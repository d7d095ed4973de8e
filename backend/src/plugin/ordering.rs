//! Plugin dependency ordering
//!
//! Plugins are initialized so that every plugin runs after all of its
//! dependencies. Among plugins whose dependencies are satisfied, the one
//! contributed first goes first, which keeps the order deterministic.

use crate::core::ids::PluginId;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::plugin::Plugin;
use std::collections::{BTreeSet, HashMap};

/// Initialization order as indices into `plugins`
///
/// # Errors
///
/// - `DuplicatePlugin` when two plugins share an id
/// - `MissingPlugin` when a dependency names a plugin that was not contributed
/// - `CircularPluginDependencies` when the graph has a cycle (a plugin that
///   depends on itself included)
pub fn order_plugins(plugins: &[Plugin]) -> NucleusResult<Vec<usize>> {
    let mut index_of: HashMap<&PluginId, usize> = HashMap::with_capacity(plugins.len());
    for (index, plugin) in plugins.iter().enumerate() {
        if index_of.insert(plugin.id(), index).is_some() {
            return Err(ContractError::with_details(
                ErrorKind::DuplicatePlugin,
                plugin.id().to_string(),
            ));
        }
    }

    let mut remaining = vec![0usize; plugins.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
    for (index, plugin) in plugins.iter().enumerate() {
        for dependency in plugin.dependencies() {
            let &provider = index_of.get(dependency).ok_or_else(|| {
                ContractError::with_details(
                    ErrorKind::MissingPlugin,
                    format!("{} depends on {}", plugin.id(), dependency),
                )
            })?;
            remaining[index] += 1;
            dependents[provider].push(index);
        }
    }

    let mut ready: BTreeSet<usize> = (0..plugins.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(plugins.len());
    while let Some(index) = ready.pop_first() {
        order.push(index);
        for &dependent in &dependents[index] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != plugins.len() {
        let stuck: Vec<String> = (0..plugins.len())
            .filter(|&i| remaining[i] > 0)
            .map(|i| plugins[i].id().to_string())
            .collect();
        return Err(ContractError::with_details(
            ErrorKind::CircularPluginDependencies,
            stuck.join(", "),
        ));
    }
    Ok(order)
}
