//! Contract errors raised by the nucleus
//!
//! Every violation the engine detects is reported through one error type,
//! [`ContractError`], which carries a closed [`ErrorKind`]. Callers and tests
//! match on the kind to learn exactly which rule was broken.
//!
//! # Critical Invariants
//!
//! - **Eager validation**: a rejected call leaves no partial mutation behind
//! - **No retries**: the engine reports, the caller decides
//! - **Construction defects abort setup**: plugin graph errors, checkpoint
//!   violations and double initialization are never swallowed

use thiserror::Error;

/// Closed taxonomy of contract violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("Plan has no callback")]
    NullPlan,

    #[error("Plan key is empty")]
    NullPlanKey,

    #[error("Plan queue data has no plan data")]
    NullPlanData,

    #[error("Plan is scheduled before the current simulation time")]
    PastPlanningTime,

    #[error("Planning queue is closed")]
    PlanningQueueClosed,

    #[error("Plan key is already in use by this owner")]
    DuplicatePlanKey,

    #[error("Duplicate event subscription")]
    DuplicateEventSubscription,

    #[error("No such event subscription")]
    UnknownEventSubscription,

    #[error("No plugin data matches the requested type")]
    UnknownPluginDataClass,

    #[error("More than one plugin data matches the requested type")]
    AmbiguousPluginDataClass,

    #[error("No plugin data builder matches the requested type")]
    UnknownPluginDataBuilderClass,

    #[error("More than one plugin data builder matches the requested type")]
    AmbiguousPluginDataBuilderClass,

    #[error("No data manager matches the requested type")]
    UnknownDataManager,

    #[error("More than one data manager matches the requested type")]
    AmbiguousDataManager,

    #[error("Data manager has not been initialized yet")]
    DataManagerNotInitialized,

    #[error("Data manager initialized more than once")]
    DataManagerDuplicateInitialization,

    #[error("Unknown actor id")]
    UnknownActorId,

    #[error("Plan queue data arrival id is invalid")]
    PlanningQueueArrivalInvalid,

    #[error("Plan queue data time precedes the simulation start time")]
    PlanningQueueTime,

    #[error("Plugin initialization is closed")]
    PluginInitializationClosed,

    #[error("Plugin id is missing")]
    NullPluginId,

    #[error("Plugin id contributed more than once")]
    DuplicatePlugin,

    #[error("Plugin dependency was never contributed")]
    MissingPlugin,

    #[error("Plugin dependencies contain a cycle")]
    CircularPluginDependencies,

    #[error("No converter registered for plan data")]
    MissingPlanDataConverter,

    #[error("Plan queue data names an owner that does not exist")]
    UnknownPlanOwner,

    #[error("Plan data kind does not match the requested payload type")]
    PlanDataKindMismatch,

    #[error("Plan data could not be serialized or deserialized")]
    PlanDataSerialization,

    #[error("Halt time precedes the simulation start time")]
    InvalidHaltTime,

    #[error("Simulation has already been executed")]
    SimulationAlreadyExecuted,
}

/// The single error type of the nucleus
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}{}", details_suffix(.details))]
pub struct ContractError {
    kind: ErrorKind,
    details: Option<String>,
}

impl ContractError {
    /// Error with no additional details
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            details: None,
        }
    }

    /// Error carrying a human-readable explanation
    pub fn with_details(kind: ErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            details: Some(details.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

impl From<ErrorKind> for ContractError {
    fn from(kind: ErrorKind) -> Self {
        ContractError::new(kind)
    }
}

fn details_suffix(details: &Option<String>) -> String {
    match details {
        Some(d) => format!(": {}", d),
        None => String::new(),
    }
}

/// Result alias used throughout the crate
pub type NucleusResult<T> = Result<T, ContractError>;
