//! Simulation State - the checkpoint of a run
//!
//! A `SimulationState` carries what a new engine needs to resume where an
//! earlier one stopped: the time to start at, the calendar base date, the
//! next arrival id, and every pending plan that carries plan data.
//!
//! # Critical Invariants
//!
//! 1. **Arrival bound**: every plan's arrival id is below
//!    `planning_queue_arrival_id`
//! 2. **Arrival uniqueness**: no two plans share an arrival id
//! 3. **No time travel**: every plan's time is at or after `start_time`
//!
//! The invariants are checked by the builder and again when a state is
//! deserialized, so an invalid checkpoint never reaches an engine.

use crate::core::time::default_base_date;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::models::plan::{PlanData, PlanKey, Planner};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// PlanQueueData
// ============================================================================

/// Serialized form of one pending plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanQueueData {
    time: f64,
    active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<PlanKey>,
    plan_data: PlanData,
    planner: Planner,
    planner_id: usize,
    arrival_id: u64,
}

impl PlanQueueData {
    pub fn builder() -> PlanQueueDataBuilder {
        PlanQueueDataBuilder::default()
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

    pub fn plan_data(&self) -> &PlanData {
        &self.plan_data
    }

    pub fn planner(&self) -> Planner {
        self.planner
    }

    pub fn planner_id(&self) -> usize {
        self.planner_id
    }

    pub fn arrival_id(&self) -> u64 {
        self.arrival_id
    }
}

/// Builder for [`PlanQueueData`]
#[derive(Debug, Clone)]
pub struct PlanQueueDataBuilder {
    time: f64,
    active: bool,
    key: Option<PlanKey>,
    plan_data: Option<PlanData>,
    planner: Planner,
    planner_id: usize,
    arrival_id: u64,
}

impl Default for PlanQueueDataBuilder {
    fn default() -> Self {
        Self {
            time: 0.0,
            active: true,
            key: None,
            plan_data: None,
            planner: Planner::Actor,
            planner_id: 0,
            arrival_id: 0,
        }
    }
}

impl PlanQueueDataBuilder {
    pub fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

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

    pub fn planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn planner_id(mut self, planner_id: usize) -> Self {
        self.planner_id = planner_id;
        self
    }

    pub fn arrival_id(mut self, arrival_id: u64) -> Self {
        self.arrival_id = arrival_id;
        self
    }

    pub fn build(self) -> NucleusResult<PlanQueueData> {
        let plan_data = self
            .plan_data
            .ok_or_else(|| ContractError::new(ErrorKind::NullPlanData))?;
        if !self.time.is_finite() {
            return Err(ContractError::with_details(
                ErrorKind::PlanningQueueTime,
                format!("plan time {} is not finite", self.time),
            ));
        }
        Ok(PlanQueueData {
            time: self.time,
            active: self.active,
            key: self.key,
            plan_data,
            planner: self.planner,
            planner_id: self.planner_id,
            arrival_id: self.arrival_id,
        })
    }
}

// ============================================================================
// SimulationState
// ============================================================================

/// Checkpoint of a simulation
///
/// # Example
///
/// ```rust
/// use nucleus_core_rs::{PlanData, PlanQueueData, SimulationState};
///
/// let plan = PlanQueueData::builder()
///     .time(4.0)
///     .plan_data(PlanData::from_raw("tick", serde_json::json!({ "n": 1 })))
///     .arrival_id(2)
///     .build()
///     .unwrap();
///
/// let state = SimulationState::builder()
///     .start_time(3.0)
///     .planning_queue_arrival_id(5)
///     .add_plan_queue_data(plan)
///     .build()
///     .unwrap();
///
/// let restored = SimulationState::from_json(&state.to_json().unwrap()).unwrap();
/// assert_eq!(restored, state);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSimulationState")]
pub struct SimulationState {
    start_time: f64,
    base_date: NaiveDate,
    planning_queue_arrival_id: u64,
    plan_queue_datas: Vec<PlanQueueData>,
}

/// Unvalidated wire form
#[derive(Deserialize)]
struct RawSimulationState {
    #[serde(default)]
    start_time: f64,
    #[serde(default = "default_base_date")]
    base_date: NaiveDate,
    #[serde(default)]
    planning_queue_arrival_id: u64,
    #[serde(default)]
    plan_queue_datas: Vec<PlanQueueData>,
}

impl TryFrom<RawSimulationState> for SimulationState {
    type Error = ContractError;

    fn try_from(raw: RawSimulationState) -> Result<Self, Self::Error> {
        let state = SimulationState {
            start_time: raw.start_time,
            base_date: raw.base_date,
            planning_queue_arrival_id: raw.planning_queue_arrival_id,
            plan_queue_datas: raw.plan_queue_datas,
        };
        state.validate()?;
        Ok(state)
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            base_date: default_base_date(),
            planning_queue_arrival_id: 0,
            plan_queue_datas: Vec::new(),
        }
    }
}

impl SimulationState {
    pub fn builder() -> SimulationStateBuilder {
        SimulationStateBuilder {
            state: SimulationState::default(),
        }
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    /// Arrival id the resumed queue hands to its first new plan
    pub fn planning_queue_arrival_id(&self) -> u64 {
        self.planning_queue_arrival_id
    }

    pub fn plan_queue_datas(&self) -> &[PlanQueueData] {
        &self.plan_queue_datas
    }

    /// Check the checkpoint invariants
    pub fn validate(&self) -> NucleusResult<()> {
        if !self.start_time.is_finite() {
            return Err(ContractError::with_details(
                ErrorKind::PlanningQueueTime,
                format!("start time {} is not finite", self.start_time),
            ));
        }

        let mut seen = HashSet::new();
        for data in &self.plan_queue_datas {
            if data.arrival_id >= self.planning_queue_arrival_id {
                return Err(ContractError::with_details(
                    ErrorKind::PlanningQueueArrivalInvalid,
                    format!(
                        "arrival id {} is not below the planning queue arrival id {}",
                        data.arrival_id, self.planning_queue_arrival_id
                    ),
                ));
            }
            if !seen.insert(data.arrival_id) {
                return Err(ContractError::with_details(
                    ErrorKind::PlanningQueueArrivalInvalid,
                    format!("arrival id {} appears more than once", data.arrival_id),
                ));
            }
            if !data.time.is_finite() || data.time < self.start_time {
                return Err(ContractError::with_details(
                    ErrorKind::PlanningQueueTime,
                    format!(
                        "plan time {} precedes the start time {}",
                        data.time, self.start_time
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> NucleusResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })
    }

    /// Parse and validate a checkpoint
    ///
    /// Invariant violations keep their own error kind; malformed JSON is
    /// reported as `PlanDataSerialization`.
    pub fn from_json(json: &str) -> NucleusResult<Self> {
        let raw: RawSimulationState = serde_json::from_str(json).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })?;
        SimulationState::try_from(raw)
    }

    /// SHA-256 of the canonical JSON form, as lowercase hex
    ///
    /// Object keys are sorted before hashing so two equal states always
    /// produce the same fingerprint.
    pub fn fingerprint(&self) -> NucleusResult<String> {
        let value = serde_json::to_value(self).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })?;

        fn canonicalize(value: Value) -> Value {
            match value {
                Value::Object(map) => {
                    let sorted: BTreeMap<String, Value> =
                        map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                    Value::Object(sorted.into_iter().collect())
                }
                Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
                other => other,
            }
        }

        let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
            ContractError::with_details(ErrorKind::PlanDataSerialization, e.to_string())
        })?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Builder for [`SimulationState`]; `build` validates
#[derive(Debug, Clone)]
pub struct SimulationStateBuilder {
    state: SimulationState,
}

impl SimulationStateBuilder {
    pub fn start_time(mut self, start_time: f64) -> Self {
        self.state.start_time = start_time;
        self
    }

    pub fn base_date(mut self, base_date: NaiveDate) -> Self {
        self.state.base_date = base_date;
        self
    }

    pub fn planning_queue_arrival_id(mut self, arrival_id: u64) -> Self {
        self.state.planning_queue_arrival_id = arrival_id;
        self
    }

    pub fn add_plan_queue_data(mut self, data: PlanQueueData) -> Self {
        self.state.plan_queue_datas.push(data);
        self
    }

    pub fn build(self) -> NucleusResult<SimulationState> {
        self.state.validate()?;
        Ok(self.state)
    }
}
