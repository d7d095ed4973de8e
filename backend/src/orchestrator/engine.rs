//! Simulation Engine - startup, main loop and shutdown
//!
//! # Architecture
//!
//! ```text
//! build():
//!   1. Validate config and seed state
//!   2. Order plugins by dependency (fails before anything runs)
//!
//! execute():
//!   1. Plugin initializers, in dependency order
//!   2. Data manager init(), in the order added
//!   3. Report initializers, then actor initializers
//!   4. Restore checkpointed plans through their owners' converters
//!   5. Main loop: pop the next plan, advance time, run it, settle events
//!   6. Close the queue, run close hooks
//!   7. Capture the remaining schedule as a SimulationState
//! ```
//!
//! # Example
//!
//! ```rust
//! use nucleus_core_rs::{ActorContext, Plan, PlanningContext, Plugin, Simulation, SimulationContext};
//!
//! let plugin = Plugin::builder()
//!     .set_plugin_id("clock")
//!     .set_initializer(|ctx| {
//!         ctx.add_actor(|actor| {
//!             actor.add_plan(
//!                 Plan::builder()
//!                     .time(2.0)
//!                     .callback(|actor: &ActorContext| {
//!                         assert_eq!(actor.get_time(), 2.0);
//!                         Ok(())
//!                     })
//!                     .build()?,
//!             )
//!         })?;
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//!
//! let mut simulation = Simulation::builder().add_plugin(plugin).build().unwrap();
//! let result = simulation.execute().unwrap();
//! assert_eq!(result.plans_executed, 1);
//! assert_eq!(result.final_time, 2.0);
//! ```

use crate::core::ids::DataManagerId;
use crate::core::time::SimulationClock;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::models::state::SimulationState;
use crate::orchestrator::checkpoint;
use crate::orchestrator::context::PluginContext;
use crate::orchestrator::shared::{init_data_manager, CoreHandle, OutputConsumer, Phase};
use crate::plugin::ordering::order_plugins;
use crate::plugin::Plugin;
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::{debug, info};

// ============================================================================
// Configuration
// ============================================================================

/// Run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Stop once every plan at or before this time has run
    ///
    /// Without a halt time the run ends when no active plan remains.
    #[serde(default)]
    pub halt_time: Option<f64>,

    /// Return the remaining schedule as a checkpoint
    #[serde(default = "default_record_state")]
    pub record_state: bool,
}

fn default_record_state() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            halt_time: None,
            record_state: true,
        }
    }
}

impl SimulationConfig {
    /// Check the config against the time the run starts at
    pub fn validate(&self, start_time: f64) -> NucleusResult<()> {
        if let Some(halt_time) = self.halt_time {
            if !halt_time.is_finite() {
                return Err(ContractError::with_details(
                    ErrorKind::InvalidHaltTime,
                    format!("halt time {} is not finite", halt_time),
                ));
            }
            if halt_time < start_time {
                return Err(ContractError::with_details(
                    ErrorKind::InvalidHaltTime,
                    format!("halt time {} precedes the start time {}", halt_time, start_time),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Result
// ============================================================================

/// Outcome of [`Simulation::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Simulation time when the run stopped
    pub final_time: f64,

    /// Number of plans whose callbacks ran
    pub plans_executed: u64,

    /// True when a component called `halt()`
    pub halted: bool,

    /// Pending plans left out of the checkpoint because they carry no plan data
    pub unrecorded_plans: usize,

    /// Remaining schedule, when `record_state` is set
    pub state: Option<SimulationState>,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Simulation`]
#[derive(Default)]
pub struct SimulationBuilder {
    plugins: Vec<Plugin>,
    config: SimulationConfig,
    state: Option<SimulationState>,
    output_consumer: Option<OutputConsumer>,
}

impl SimulationBuilder {
    pub fn add_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn set_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_halt_time(mut self, halt_time: f64) -> Self {
        self.config.halt_time = Some(halt_time);
        self
    }

    pub fn set_record_state(mut self, record_state: bool) -> Self {
        self.config.record_state = record_state;
        self
    }

    /// Resume from a checkpoint
    pub fn set_simulation_state(mut self, state: SimulationState) -> Self {
        self.state = Some(state);
        self
    }

    /// Receive every value released with `release_output`
    pub fn set_output_consumer(mut self, consumer: impl FnMut(Box<dyn Any>) + 'static) -> Self {
        self.output_consumer = Some(Box::new(consumer));
        self
    }

    /// Validate and order everything; no plugin code runs here
    pub fn build(self) -> NucleusResult<Simulation> {
        let state = self.state.unwrap_or_default();
        state.validate()?;
        self.config.validate(state.start_time())?;

        let order = order_plugins(&self.plugins)?;
        let mut slots: Vec<Option<Plugin>> = self.plugins.into_iter().map(Some).collect();
        let plugins = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();

        Ok(Simulation {
            plugins,
            config: self.config,
            state,
            output_consumer: self.output_consumer,
            executed: false,
        })
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// One run of the kernel
///
/// Single-threaded and single-use: `execute` may be called once.
pub struct Simulation {
    /// Plugins in initialization order
    plugins: Vec<Plugin>,
    config: SimulationConfig,
    /// Seed state (default when not resuming)
    state: SimulationState,
    output_consumer: Option<OutputConsumer>,
    executed: bool,
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::default()
    }

    /// Plugins in the order their initializers run
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the simulation to completion
    ///
    /// The first error raised by any callback stops the run and is returned.
    pub fn execute(&mut self) -> NucleusResult<SimulationResult> {
        if self.executed {
            return Err(ContractError::new(ErrorKind::SimulationAlreadyExecuted));
        }
        self.executed = true;

        let clock = SimulationClock::new(self.state.start_time(), self.state.base_date());
        let plugin_datas = self
            .plugins
            .iter()
            .flat_map(|plugin| plugin.plugin_datas().iter().cloned())
            .collect();
        let core = CoreHandle::new(
            clock,
            self.state.planning_queue_arrival_id(),
            plugin_datas,
            self.output_consumer.take(),
        );

        let outcome = self.run(&core);
        core.teardown();
        outcome
    }

    fn run(&self, core: &CoreHandle) -> NucleusResult<SimulationResult> {
        info!(
            plugins = self.plugins.len(),
            start_time = self.state.start_time(),
            halt_time = ?self.config.halt_time,
            "simulation starting"
        );

        self.start(core)?;

        core.set_phase(Phase::Running);
        let (plans_executed, halted) = self.main_loop(core)?;

        core.set_phase(Phase::Closed);
        for (owner, hook) in core.take_close_hooks() {
            debug!(%owner, "running close hook");
            core.run_frame(|| hook(core))?;
        }

        let final_time = core.clock().current_time();
        let (state, unrecorded_plans) = if self.config.record_state {
            let (state, unrecorded) = checkpoint::capture_state(core)?;
            (Some(state), unrecorded)
        } else {
            (None, 0)
        };

        info!(final_time, plans_executed, halted, unrecorded_plans, "simulation finished");
        Ok(SimulationResult {
            final_time,
            plans_executed,
            halted,
            unrecorded_plans,
            state,
        })
    }

    /// Startup phases up to, not including, the main loop
    fn start(&self, core: &CoreHandle) -> NucleusResult<()> {
        for plugin in &self.plugins {
            if let Some(initializer) = plugin.initializer() {
                debug!(plugin = %plugin.id(), "initializing plugin");
                initializer(&PluginContext::new(core.clone(), plugin.id().clone()))?;
            }
        }

        core.set_phase(Phase::DataManagerInit);
        for index in 0..core.data_manager_count() {
            init_data_manager(core, DataManagerId::new(index))?;
        }

        core.set_phase(Phase::ComponentInit);
        for (report, init) in core.take_startup_reports() {
            debug!(%report, "initializing report");
            core.run_frame(|| init(core))?;
        }
        for (actor, init) in core.take_startup_actors() {
            if core.actor_exists(actor) {
                debug!(%actor, "initializing actor");
                core.run_frame(|| init(core))?;
            }
        }

        let restored = checkpoint::restore_plans(core, &self.state)?;
        if restored > 0 {
            debug!(restored, "checkpointed plans restored");
        }
        Ok(())
    }

    /// Returns the number of plans executed and whether `halt()` was called
    fn main_loop(&self, core: &CoreHandle) -> NucleusResult<(u64, bool)> {
        let halt_time = self.config.halt_time;
        let mut plans_executed = 0u64;

        loop {
            if core.halt_requested() {
                return Ok((plans_executed, true));
            }
            let Some((time, active_count)) = core.peek_plan() else {
                break;
            };
            match halt_time {
                Some(halt_time) if time > halt_time => break,
                None if active_count == 0 => break,
                _ => {}
            }
            let Some(plan) = core.pop_plan() else {
                break;
            };

            core.advance_to(plan.meta.time);
            debug!(
                time = plan.meta.time,
                owner = %plan.owner,
                arrival_id = plan.arrival_id,
                "executing plan"
            );
            let callback = plan.payload;
            core.run_frame(|| callback(core))?;
            plans_executed += 1;
        }

        if let Some(halt_time) = halt_time {
            core.advance_to(halt_time);
        }
        Ok((plans_executed, false))
    }
}
