//! Orchestrator - contexts, engine core and main loop
//!
//! See `engine.rs` for the startup sequence and the main loop, and
//! `shared.rs` for event resolution.

pub(crate) mod checkpoint;
pub mod context;
pub mod engine;
pub(crate) mod shared;

pub use context::{
    ActorContext, DataManagerContext, PlanningContext, PluginContext, ReportContext,
    SimulationContext,
};
pub use engine::{Simulation, SimulationBuilder, SimulationConfig, SimulationResult};
