//! Data managers - authoritative owners of simulation state
//!
//! A data manager is created by a plugin, initialized exactly once by the
//! engine, and lives until the simulation closes. It keeps its state private
//! and exposes accessors; other components reach it through
//! `get_data_manager::<D>()`, which hands out a shared `Rc<D>`. State that
//! changes during the run therefore lives behind `Cell`/`RefCell` fields
//! owned by the data manager itself.
//!
//! # Example
//!
//! ```rust
//! use nucleus_core_rs::{DataManager, DataManagerContext, InitializationGuard, NucleusResult};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! #[derive(Default)]
//! struct Counter {
//!     guard: InitializationGuard,
//!     value: Cell<u64>,
//! }
//!
//! impl DataManager for Counter {
//!     fn init(self: Rc<Self>, _context: &DataManagerContext) -> NucleusResult<()> {
//!         self.guard.initialize()
//!     }
//! }
//! ```

use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::orchestrator::context::DataManagerContext;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

/// A component that owns a slice of simulation state
///
/// The engine calls [`init`](Self::init) exactly once per data manager.
/// Embedding an [`InitializationGuard`] is optional; it catches a data
/// manager that re-enters its own initialization, which the engine cannot
/// see.
pub trait DataManager: Any {
    /// Called once, in the order data managers were added, before any actor
    /// or report is initialized
    fn init(self: Rc<Self>, context: &DataManagerContext) -> NucleusResult<()>;
}

/// Base initialization bookkeeping for data managers
///
/// The first call to [`initialize`](Self::initialize) succeeds, every later
/// call fails with `DataManagerDuplicateInitialization`.
#[derive(Debug, Default)]
pub struct InitializationGuard {
    initialized: Cell<bool>,
}

impl InitializationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self) -> NucleusResult<()> {
        if self.initialized.replace(true) {
            return Err(ContractError::new(
                ErrorKind::DataManagerDuplicateInitialization,
            ));
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }
}
