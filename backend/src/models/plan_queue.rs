//! Plan Queue - the engine's central data structure
//!
//! Holds every pending plan of every owner, ordered by
//! `(time asc, planner ordinal asc, arrival id asc)`.
//!
//! # Critical Invariants
//!
//! - **Determinism**: the order depends only on the plans' times, owners and
//!   the order in which they were added, never on hashing
//! - **Phase separation**: at equal time data manager plans precede actor
//!   plans, which precede report plans
//! - **Strict arrival ids**: every inserted plan gets a fresh, larger id
//! - **Keyed uniqueness**: a key names at most one plan per owner
//!
//! The queue is generic over the callback payload so the ordering rules can
//! be exercised without an engine.

use crate::core::ids::{ActorId, DataManagerId, ReportId};
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::models::plan::{PlanKey, PlanMeta, PlanRecord, Planner};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Folds `-0.0` into `0.0` so equal times compare equal under `total_cmp`
fn normalized(mut meta: PlanMeta) -> PlanMeta {
    if meta.time == 0.0 {
        meta.time = 0.0;
    }
    meta
}

// ============================================================================
// Owners and ordering
// ============================================================================

/// The component a plan belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanOwner {
    DataManager(DataManagerId),
    Actor(ActorId),
    Report(ReportId),
}

impl PlanOwner {
    pub fn planner(self) -> Planner {
        match self {
            PlanOwner::DataManager(_) => Planner::DataManager,
            PlanOwner::Actor(_) => Planner::Actor,
            PlanOwner::Report(_) => Planner::Report,
        }
    }

    pub fn planner_id(self) -> usize {
        match self {
            PlanOwner::DataManager(id) => id.value(),
            PlanOwner::Actor(id) => id.value(),
            PlanOwner::Report(id) => id.value(),
        }
    }

    /// Rebuild an owner from its checkpointed form
    pub fn from_parts(planner: Planner, planner_id: usize) -> Self {
        match planner {
            Planner::DataManager => PlanOwner::DataManager(DataManagerId::new(planner_id)),
            Planner::Actor => PlanOwner::Actor(ActorId::new(planner_id)),
            Planner::Report => PlanOwner::Report(ReportId::new(planner_id)),
        }
    }
}

impl fmt::Display for PlanOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOwner::DataManager(id) => write!(f, "{}", id),
            PlanOwner::Actor(id) => write!(f, "{}", id),
            PlanOwner::Report(id) => write!(f, "{}", id),
        }
    }
}

/// Position of a plan in the queue
#[derive(Debug, Clone, Copy)]
pub struct PlanOrder {
    pub time: f64,
    pub planner: Planner,
    pub arrival_id: u64,
}

impl Ord for PlanOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.planner.cmp(&other.planner))
            .then(self.arrival_id.cmp(&other.arrival_id))
    }
}

impl PartialOrd for PlanOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PlanOrder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PlanOrder {}

/// A plan sitting in the queue
#[derive(Debug)]
pub struct QueuedPlan<T> {
    pub owner: PlanOwner,
    pub meta: PlanMeta,
    pub arrival_id: u64,
    pub payload: T,
}

impl<T> QueuedPlan<T> {
    pub fn order(&self) -> PlanOrder {
        PlanOrder {
            time: self.meta.time,
            planner: self.owner.planner(),
            arrival_id: self.arrival_id,
        }
    }

    pub fn record(&self) -> PlanRecord {
        PlanRecord {
            time: self.meta.time,
            active: self.meta.active,
            key: self.meta.key.clone(),
            plan_data: self.meta.plan_data.clone(),
            arrival_id: self.arrival_id,
        }
    }
}

// ============================================================================
// Plan Queue
// ============================================================================

/// Time-ordered queue of pending plans across all owners
#[derive(Debug)]
pub struct PlanQueue<T> {
    /// Plans in execution order
    entries: BTreeMap<PlanOrder, QueuedPlan<T>>,

    /// (owner, key) → position, for keyed lookup and removal
    keys: HashMap<(PlanOwner, PlanKey), PlanOrder>,

    /// Arrival id handed to the next inserted plan
    next_arrival_id: u64,

    /// Number of queued plans flagged active
    active_count: usize,
}

impl<T> PlanQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_arrival_start(0)
    }

    /// Create an empty queue whose first arrival id is `next_arrival_id`
    ///
    /// Used when resuming from a checkpoint.
    pub fn with_arrival_start(next_arrival_id: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            keys: HashMap::new(),
            next_arrival_id,
            active_count: 0,
        }
    }

    /// Insert a plan, assigning the next arrival id
    ///
    /// Fails with `DuplicatePlanKey` when the owner already has a plan under
    /// the same key; the queue is left untouched in that case.
    pub fn insert(&mut self, owner: PlanOwner, meta: PlanMeta, payload: T) -> NucleusResult<u64> {
        let meta = normalized(meta);
        self.check_key_free(owner, &meta)?;
        let arrival_id = self.next_arrival_id;
        self.next_arrival_id += 1;
        self.put(QueuedPlan {
            owner,
            meta,
            arrival_id,
            payload,
        });
        Ok(arrival_id)
    }

    /// Insert a plan that keeps an arrival id assigned in an earlier run
    pub fn restore(
        &mut self,
        owner: PlanOwner,
        meta: PlanMeta,
        arrival_id: u64,
        payload: T,
    ) -> NucleusResult<()> {
        if arrival_id >= self.next_arrival_id {
            return Err(ContractError::with_details(
                ErrorKind::PlanningQueueArrivalInvalid,
                format!(
                    "arrival id {} is not below the next arrival id {}",
                    arrival_id, self.next_arrival_id
                ),
            ));
        }
        let meta = normalized(meta);
        self.check_key_free(owner, &meta)?;
        let plan = QueuedPlan {
            owner,
            meta,
            arrival_id,
            payload,
        };
        if self.entries.contains_key(&plan.order()) {
            return Err(ContractError::with_details(
                ErrorKind::PlanningQueueArrivalInvalid,
                format!("arrival id {} restored twice", arrival_id),
            ));
        }
        self.put(plan);
        Ok(())
    }

    fn check_key_free(&self, owner: PlanOwner, meta: &PlanMeta) -> NucleusResult<()> {
        if let Some(key) = &meta.key {
            if key.is_empty() {
                return Err(ContractError::with_details(
                    ErrorKind::NullPlanKey,
                    format!("{} added a plan with an empty key", owner),
                ));
            }
            if self.keys.contains_key(&(owner, key.clone())) {
                return Err(ContractError::with_details(
                    ErrorKind::DuplicatePlanKey,
                    format!("{} already has a plan keyed {}", owner, key),
                ));
            }
        }
        Ok(())
    }

    fn put(&mut self, plan: QueuedPlan<T>) {
        let order = plan.order();
        if let Some(key) = &plan.meta.key {
            self.keys.insert((plan.owner, key.clone()), order);
        }
        if plan.meta.active {
            self.active_count += 1;
        }
        self.entries.insert(order, plan);
    }

    fn take(&mut self, order: &PlanOrder) -> Option<QueuedPlan<T>> {
        let plan = self.entries.remove(order)?;
        if let Some(key) = &plan.meta.key {
            self.keys.remove(&(plan.owner, key.clone()));
        }
        if plan.meta.active {
            self.active_count -= 1;
        }
        Some(plan)
    }

    /// The plan that would be popped next
    pub fn peek(&self) -> Option<&QueuedPlan<T>> {
        self.entries.values().next()
    }

    /// Remove and return the next plan in execution order
    pub fn pop(&mut self) -> Option<QueuedPlan<T>> {
        let order = *self.entries.keys().next()?;
        self.take(&order)
    }

    /// Look up an owner's plan by key
    pub fn get(&self, owner: PlanOwner, key: &PlanKey) -> Option<PlanRecord> {
        let order = self.keys.get(&(owner, key.clone()))?;
        self.entries.get(order).map(QueuedPlan::record)
    }

    /// Remove an owner's plan by key
    pub fn remove(&mut self, owner: PlanOwner, key: &PlanKey) -> Option<QueuedPlan<T>> {
        let order = *self.keys.get(&(owner, key.clone()))?;
        self.take(&order)
    }

    /// Keys of an owner's plans, in execution order
    pub fn keys_for(&self, owner: PlanOwner) -> Vec<PlanKey> {
        self.entries
            .values()
            .filter(|plan| plan.owner == owner)
            .filter_map(|plan| plan.meta.key.clone())
            .collect()
    }

    /// Remove every plan of an owner, returning how many were removed
    pub fn remove_owner(&mut self, owner: PlanOwner) -> usize {
        let doomed: Vec<PlanOrder> = self
            .entries
            .iter()
            .filter(|(_, plan)| plan.owner == owner)
            .map(|(order, _)| *order)
            .collect();
        for order in &doomed {
            self.take(order);
        }
        doomed.len()
    }

    /// Plans in execution order
    pub fn iter(&self) -> impl Iterator<Item = &QueuedPlan<T>> {
        self.entries.values()
    }

    /// Remove every plan, in execution order
    pub fn drain_ordered(&mut self) -> Vec<QueuedPlan<T>> {
        self.keys.clear();
        self.active_count = 0;
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Arrival id the next inserted plan will receive
    pub fn next_arrival_id(&self) -> u64 {
        self.next_arrival_id
    }
}

impl<T> Default for PlanQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
