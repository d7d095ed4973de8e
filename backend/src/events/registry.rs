//! Subscription registry
//!
//! Stores who listens to which event type and answers "who receives this
//! event?" without scanning unrelated subscribers.
//!
//! - Data managers subscribe by exact type, one handler per (owner, type).
//! - Actors and reports subscribe through filters. Per event type the filters
//!   form a tree: each level branches on a projection id and then on the
//!   projected value, so delivery only descends into branches whose value
//!   matches the event.
//!
//! Delivery order is deterministic: data managers in subscription order,
//! then filter subscribers in subscription order.
//!
//! The registry is generic over the handler type so that it carries no
//! knowledge of contexts or of the engine.

use crate::core::ids::DataManagerId;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::events::types::{ErasedProjection, FilterValue};
use crate::models::plan_queue::PlanOwner;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

/// Filter path: `(projection id, expected value)` sorted by projection id
pub(crate) type FilterPath = Vec<(String, FilterValue)>;

#[derive(Debug, Clone)]
struct FilterSubscriber<H> {
    owner: PlanOwner,
    sequence: u64,
    handler: H,
}

#[derive(Debug)]
struct FilterNode<H> {
    subscribers: Vec<FilterSubscriber<H>>,
    /// projection id → projected value → subtree
    children: BTreeMap<String, BTreeMap<FilterValue, FilterNode<H>>>,
}

impl<H> FilterNode<H> {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.children.is_empty()
    }

    fn descend_mut(&mut self, path: &[(String, FilterValue)]) -> &mut FilterNode<H> {
        match path.split_first() {
            None => self,
            Some(((id, value), rest)) => self
                .children
                .entry(id.clone())
                .or_default()
                .entry(value.clone())
                .or_insert_with(FilterNode::new)
                .descend_mut(rest),
        }
    }

    #[cfg(test)]
    fn find(&self, path: &[(String, FilterValue)]) -> Option<&FilterNode<H>> {
        match path.split_first() {
            None => Some(self),
            Some(((id, value), rest)) => self.children.get(id)?.get(value)?.find(rest),
        }
    }

    /// Remove a subscriber at `path`, pruning branches left empty
    fn remove_at(&mut self, path: &[(String, FilterValue)], owner: PlanOwner) -> bool {
        match path.split_first() {
            None => {
                let before = self.subscribers.len();
                self.subscribers.retain(|s| s.owner != owner);
                before != self.subscribers.len()
            }
            Some(((id, value), rest)) => {
                let Some(branches) = self.children.get_mut(id) else {
                    return false;
                };
                let Some(child) = branches.get_mut(value) else {
                    return false;
                };
                let removed = child.remove_at(rest, owner);
                if child.is_empty() {
                    branches.remove(value);
                }
                if branches.is_empty() {
                    self.children.remove(id);
                }
                removed
            }
        }
    }

    /// Remove every subscription of `owner` in this subtree
    fn remove_owner(&mut self, owner: PlanOwner) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.owner != owner);
        let mut removed = before - self.subscribers.len();
        for branches in self.children.values_mut() {
            for child in branches.values_mut() {
                removed += child.remove_owner(owner);
            }
            branches.retain(|_, child| !child.is_empty());
        }
        self.children.retain(|_, branches| !branches.is_empty());
        removed
    }
}

impl<H: Clone> FilterNode<H> {
    fn collect(
        &self,
        event: &dyn Any,
        project: &mut dyn FnMut(&str, &dyn Any) -> Option<FilterValue>,
        out: &mut Vec<FilterSubscriber<H>>,
    ) {
        out.extend(self.subscribers.iter().cloned());
        for (id, branches) in &self.children {
            if let Some(value) = project(id, event) {
                if let Some(child) = branches.get(&value) {
                    child.collect(event, project, out);
                }
            }
        }
    }
}

#[derive(Debug)]
struct FilterTree<H> {
    root: FilterNode<H>,
    count: usize,
}

// ============================================================================
// Event Registry
// ============================================================================

/// All subscriptions of one simulation
pub(crate) struct EventRegistry<H> {
    data_managers: HashMap<TypeId, Vec<(DataManagerId, H)>>,
    filters: HashMap<TypeId, FilterTree<H>>,
    projections: HashMap<(TypeId, String), ErasedProjection>,
    next_sequence: u64,
}

impl<H: Clone> EventRegistry<H> {
    pub fn new() -> Self {
        Self {
            data_managers: HashMap::new(),
            filters: HashMap::new(),
            projections: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn subscribe_data_manager(
        &mut self,
        event_type: TypeId,
        type_name: &str,
        owner: DataManagerId,
        handler: H,
    ) -> NucleusResult<()> {
        let handlers = self.data_managers.entry(event_type).or_default();
        if handlers.iter().any(|(id, _)| *id == owner) {
            return Err(ContractError::with_details(
                ErrorKind::DuplicateEventSubscription,
                format!("{} already subscribes to {}", owner, type_name),
            ));
        }
        handlers.push((owner, handler));
        Ok(())
    }

    pub fn unsubscribe_data_manager(
        &mut self,
        event_type: TypeId,
        type_name: &str,
        owner: DataManagerId,
    ) -> NucleusResult<()> {
        let handlers = self.data_managers.entry(event_type).or_default();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != owner);
        let removed = before != handlers.len();
        if handlers.is_empty() {
            self.data_managers.remove(&event_type);
        }
        if removed {
            Ok(())
        } else {
            Err(ContractError::with_details(
                ErrorKind::UnknownEventSubscription,
                format!("{} does not subscribe to {}", owner, type_name),
            ))
        }
    }

    /// Data manager handlers for an event type, in subscription order
    pub fn data_manager_handlers(&self, event_type: TypeId) -> Vec<(DataManagerId, H)> {
        self.data_managers
            .get(&event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Subscribe an actor or report through a filter
    ///
    /// Projections already registered under the same id are kept; the first
    /// registration of an id wins.
    pub fn subscribe_filtered(
        &mut self,
        event_type: TypeId,
        type_name: &str,
        owner: PlanOwner,
        path: FilterPath,
        projections: Vec<(String, ErasedProjection)>,
        handler: H,
    ) -> NucleusResult<()> {
        let tree = self.filters.entry(event_type).or_insert_with(|| FilterTree {
            root: FilterNode::new(),
            count: 0,
        });
        let node = tree.root.descend_mut(&path);
        if node.subscribers.iter().any(|s| s.owner == owner) {
            return Err(ContractError::with_details(
                ErrorKind::DuplicateEventSubscription,
                format!("{} already subscribes to {} with this filter", owner, type_name),
            ));
        }
        node.subscribers.push(FilterSubscriber {
            owner,
            sequence: self.next_sequence,
            handler,
        });
        tree.count += 1;
        self.next_sequence += 1;
        for (id, projection) in projections {
            self.projections
                .entry((event_type, id))
                .or_insert(projection);
        }
        Ok(())
    }

    pub fn unsubscribe_filtered(
        &mut self,
        event_type: TypeId,
        type_name: &str,
        owner: PlanOwner,
        path: &FilterPath,
    ) -> NucleusResult<()> {
        let removed = match self.filters.get_mut(&event_type) {
            Some(tree) => {
                let removed = tree.root.remove_at(path, owner);
                if removed {
                    tree.count -= 1;
                }
                removed
            }
            None => false,
        };
        if removed {
            Ok(())
        } else {
            Err(ContractError::with_details(
                ErrorKind::UnknownEventSubscription,
                format!("{} has no such subscription to {}", owner, type_name),
            ))
        }
    }

    /// Is `owner` subscribed with exactly this filter path?
    #[cfg(test)]
    pub fn has_filtered(&self, event_type: TypeId, owner: PlanOwner, path: &FilterPath) -> bool {
        self.filters
            .get(&event_type)
            .and_then(|tree| tree.root.find(path))
            .map(|node| node.subscribers.iter().any(|s| s.owner == owner))
            .unwrap_or(false)
    }

    /// Filter subscribers that accept `event`, in subscription order
    pub fn filtered_handlers(&self, event_type: TypeId, event: &dyn Any) -> Vec<(PlanOwner, H)> {
        let Some(tree) = self.filters.get(&event_type) else {
            return Vec::new();
        };
        let mut cache: HashMap<String, Option<FilterValue>> = HashMap::new();
        let projections = &self.projections;
        let mut project = |id: &str, event: &dyn Any| -> Option<FilterValue> {
            if let Some(cached) = cache.get(id) {
                return cached.clone();
            }
            let value = projections
                .get(&(event_type, id.to_string()))
                .and_then(|projection| projection(event));
            cache.insert(id.to_string(), value.clone());
            value
        };
        let mut matched = Vec::new();
        tree.root.collect(event, &mut project, &mut matched);
        matched.sort_by_key(|s| s.sequence);
        matched.into_iter().map(|s| (s.owner, s.handler)).collect()
    }

    pub fn subscribers_exist(&self, event_type: TypeId) -> bool {
        self.data_managers
            .get(&event_type)
            .map(|handlers| !handlers.is_empty())
            .unwrap_or(false)
            || self
                .filters
                .get(&event_type)
                .map(|tree| tree.count > 0)
                .unwrap_or(false)
    }

    /// Drop every subscription held by `owner`
    pub fn remove_owner(&mut self, owner: PlanOwner) {
        if let PlanOwner::DataManager(id) = owner {
            for handlers in self.data_managers.values_mut() {
                handlers.retain(|(dm, _)| *dm != id);
            }
            self.data_managers.retain(|_, handlers| !handlers.is_empty());
        }
        for tree in self.filters.values_mut() {
            let removed = tree.root.remove_owner(owner);
            tree.count -= removed;
        }
    }

    pub fn clear(&mut self) {
        self.data_managers.clear();
        self.filters.clear();
        self.projections.clear();
    }
}
