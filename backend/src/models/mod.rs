//! Domain models: plans, the plan queue, data managers and checkpoints

pub mod data_manager;
pub mod plan;
pub mod plan_queue;
pub mod state;

pub use data_manager::{DataManager, InitializationGuard};
pub use plan::{Plan, PlanBuilder, PlanCallback, PlanData, PlanKey, PlanPayload, PlanRecord, Planner};
pub use plan_queue::PlanOwner;
pub use state::{PlanQueueData, PlanQueueDataBuilder, SimulationState, SimulationStateBuilder};
