//! Simulation Nucleus - discrete-event simulation kernel
//!
//! Independently written plugins compose into one time-ordered simulation.
//! Plugins contribute data managers (state owners), actors (behavior) and
//! reports (observers), all driven by a single plan queue and a typed event
//! bus.
//!
//! # Architecture
//!
//! - **core**: Identity types and the simulation clock
//! - **models**: Plans, the plan queue, data managers, checkpoints
//! - **events**: Typed events, filters and the subscription registry
//! - **plugin**: Plugins, plugin data, dependency ordering, scenario seam
//! - **orchestrator**: Execution contexts, event resolution, main loop
//!
//! # Critical Invariants
//!
//! 1. Plans run in `(time, planner, arrival id)` order; time never moves back
//! 2. At equal time data managers run before actors, actors before reports
//! 3. Observers never see partially applied mutations
//! 4. A broken plugin graph or checkpoint fails before any plugin code runs
//! 5. One engine runs on one thread; plugins and plugin data are shareable

// Module declarations
pub mod core;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod plugin;

// Re-exports for convenience
pub use core::ids::{ActorId, DataManagerId, PluginId, ReportId};
pub use core::time::SimulationClock;
pub use error::{ContractError, ErrorKind, NucleusResult};
pub use events::{Event, EventFilter, EventFilterBuilder, FilterValue, IdentifiableFunction};
pub use models::{
    data_manager::{DataManager, InitializationGuard},
    plan::{Plan, PlanBuilder, PlanData, PlanKey, PlanPayload, PlanRecord, Planner},
    plan_queue::PlanOwner,
    state::{PlanQueueData, PlanQueueDataBuilder, SimulationState, SimulationStateBuilder},
};
pub use orchestrator::{
    ActorContext, DataManagerContext, PlanningContext, PluginContext, ReportContext, Simulation,
    SimulationBuilder, SimulationConfig, SimulationContext, SimulationResult,
};
pub use plugin::{
    Plugin, PluginBuilder, PluginData, PluginDataBuilder, PluginDataBuilderContext,
};
