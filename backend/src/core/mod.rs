//! Identity types and simulation time

pub mod ids;
pub mod time;

pub use ids::{ActorId, DataManagerId, PluginId, ReportId};
pub use time::SimulationClock;
