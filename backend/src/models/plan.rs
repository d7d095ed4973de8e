//! Plans - the unit of scheduled work
//!
//! A plan binds a callback to a future time and to the component that
//! scheduled it. The engine executes plans in `(time, planner, arrival id)`
//! order.
//!
//! # Example
//!
//! ```rust
//! use nucleus_core_rs::{ActorContext, Plan, PlanKey};
//!
//! let plan: Plan<ActorContext> = Plan::builder()
//!     .time(3.0)
//!     .key(PlanKey::new("restock"))
//!     .callback(|_ctx: &ActorContext| Ok(()))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(plan.time(), 3.0);
//! assert!(plan.is_active());
//! ```

use crate::error::{ContractError, ErrorKind, NucleusResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Callback executed when a plan comes due
pub type PlanCallback<C> = Box<dyn FnOnce(&C) -> NucleusResult<()>>;

// ============================================================================
// Planner
// ============================================================================

/// Which kind of component owns a plan
///
/// The declaration order is the execution priority at equal time: every
/// data manager plan runs before any actor plan, and every actor plan before
/// any report plan, so reports observe settled state. The ordinals are
/// persisted in checkpoints; reordering the variants changes behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Planner {
    DataManager = 0,
    Actor = 1,
    Report = 2,
}

impl Planner {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl From<Planner> for u8 {
    fn from(planner: Planner) -> u8 {
        planner.ordinal()
    }
}

impl TryFrom<u8> for Planner {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Planner::DataManager),
            1 => Ok(Planner::Actor),
            2 => Ok(Planner::Report),
            other => Err(format!("invalid planner ordinal {}", other)),
        }
    }
}

// ============================================================================
// Plan keys and plan data
// ============================================================================

/// Opaque key identifying a plan within the scope of its owner
///
/// An empty key stands for "no key" and is rejected by keyed lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanKey(String);

impl PlanKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanKey {
    fn from(value: &str) -> Self {
        PlanKey::new(value)
    }
}

impl From<String> for PlanKey {
    fn from(value: String) -> Self {
        PlanKey(value)
    }
}

impl From<u64> for PlanKey {
    fn from(value: u64) -> Self {
        PlanKey(value.to_string())
    }
}

/// A typed payload that can travel inside [`PlanData`]
///
/// `KIND` is written into checkpoints and must stay stable across releases.
pub trait PlanPayload: Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;
}

/// Serializable description of what a plan will do
///
/// Callbacks cannot be persisted; plan data is what a checkpoint keeps
/// instead, and a registered converter turns it back into a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanData {
    kind: String,
    payload: serde_json::Value,
}

impl PlanData {
    /// Encode a typed payload
    pub fn new<T: PlanPayload>(payload: &T) -> NucleusResult<Self> {
        let payload = serde_json::to_value(payload).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })?;
        Ok(Self {
            kind: T::KIND.to_string(),
            payload,
        })
    }

    /// Plan data from an already encoded payload
    pub fn from_raw(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Decode into the payload type registered under this data's kind
    pub fn decode<T: PlanPayload>(&self) -> NucleusResult<T> {
        if self.kind != T::KIND {
            return Err(ContractError::with_details(
                ErrorKind::PlanDataKindMismatch,
                format!("expected {}, found {}", T::KIND, self.kind),
            ));
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Work scheduled by a component of context type `C`
pub struct Plan<C> {
    time: f64,
    active: bool,
    key: Option<PlanKey>,
    plan_data: Option<PlanData>,
    callback: PlanCallback<C>,
}

impl<C> Plan<C> {
    pub fn builder() -> PlanBuilder<C> {
        PlanBuilder::new()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn key(&self) -> Option<&PlanKey> {
        self.key.as_ref()
    }

    pub fn plan_data(&self) -> Option<&PlanData> {
        self.plan_data.as_ref()
    }

    pub(crate) fn into_parts(self) -> (PlanMeta, PlanCallback<C>) {
        let meta = PlanMeta {
            time: self.time,
            active: self.active,
            key: self.key,
            plan_data: self.plan_data,
        };
        (meta, self.callback)
    }
}

impl<C> fmt::Debug for Plan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("time", &self.time)
            .field("active", &self.active)
            .field("key", &self.key)
            .field("plan_data", &self.plan_data)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Plan`]; consumed by `build`
pub struct PlanBuilder<C> {
    time: f64,
    active: bool,
    key: Option<PlanKey>,
    plan_data: Option<PlanData>,
    callback: Option<PlanCallback<C>>,
}

impl<C> PlanBuilder<C> {
    fn new() -> Self {
        Self {
            time: 0.0,
            active: true,
            key: None,
            plan_data: None,
            callback: None,
        }
    }

    pub fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Passive plans do not keep the simulation running on their own
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn key(mut self, key: impl Into<PlanKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn plan_data(mut self, plan_data: PlanData) -> Self {
        self.plan_data = Some(plan_data);
        self
    }

    pub fn callback(mut self, callback: impl FnOnce(&C) -> NucleusResult<()> + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> NucleusResult<Plan<C>> {
        let callback = self.callback.ok_or_else(|| ContractError::new(ErrorKind::NullPlan))?;
        Ok(Plan {
            time: self.time,
            active: self.active,
            key: self.key,
            plan_data: self.plan_data,
            callback,
        })
    }
}

/// Everything about a plan except its callback
#[derive(Debug, Clone, PartialEq)]
pub struct PlanMeta {
    pub time: f64,
    pub active: bool,
    pub key: Option<PlanKey>,
    pub plan_data: Option<PlanData>,
}

/// Read-only view of a queued plan, returned by keyed lookups
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRecord {
    pub time: f64,
    pub active: bool,
    pub key: Option<PlanKey>,
    pub plan_data: Option<PlanData>,
    pub arrival_id: u64,
}
