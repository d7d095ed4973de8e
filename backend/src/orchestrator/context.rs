//! Execution contexts - capability-scoped views of one simulation
//!
//! Each role gets its own context type, so what a component may do is
//! decided by the type it is handed:
//!
//! | Context | Plans | Events | Components |
//! |---|---|---|---|
//! | [`DataManagerContext`] | own plans | release mutation/observation, subscribe by type | add/remove actors |
//! | [`ActorContext`] | own plans | subscribe with filters | add/remove actors |
//! | [`ReportContext`] | own plans | subscribe with filters | add/remove actors |
//! | [`PluginContext`] | none | none | add data managers, actors, reports (startup only) |
//!
//! The shared surface lives in two traits: [`SimulationContext`] (time, data
//! manager lookup, outputs, actors, halting) and [`PlanningContext`] (plans,
//! close hooks, plan data converters). Both are sealed; only the contexts in
//! this module implement them.
//!
//! Contexts are cheap handles. Cloning one clones an `Rc`.

use crate::core::ids::{ActorId, DataManagerId, PluginId, ReportId};
use crate::error::{ErrorKind, NucleusResult};
use crate::events::types::{Event, EventFilter};
use crate::models::data_manager::DataManager;
use crate::models::plan::{Plan, PlanData, PlanKey, PlanPayload, PlanRecord};
use crate::models::plan_queue::PlanOwner;
use crate::orchestrator::shared::{CoreHandle, ErasedCallback, ErasedHandler, PlanConverter};
use crate::plugin::data::{downcast_data, PluginData};
use crate::plugin::lookup::find_unique;
use chrono::NaiveDate;
use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

mod sealed {
    use super::*;

    pub trait ContextHandle {
        fn core(&self) -> &CoreHandle;
    }

    /// A context that owns plans, subscriptions and close hooks
    pub trait PlannerHandle: ContextHandle + Sized + 'static {
        type Id: Copy + fmt::Display + 'static;

        fn id(&self) -> Self::Id;
        fn owner_of(id: Self::Id) -> PlanOwner;
        fn bind(core: CoreHandle, id: Self::Id) -> Self;
    }
}

use sealed::{ContextHandle, PlannerHandle};

// ============================================================================
// Common surface
// ============================================================================

/// Capabilities shared by data managers, actors and reports
pub trait SimulationContext: ContextHandle {
    /// Current simulation time
    fn get_time(&self) -> f64 {
        self.core().clock().current_time()
    }

    /// Time at which this run started
    fn get_start_time(&self) -> f64 {
        self.core().clock().start_time()
    }

    fn get_base_date(&self) -> NaiveDate {
        self.core().clock().base_date()
    }

    /// Calendar date of the current time
    fn get_date(&self) -> NaiveDate {
        self.core().clock().current_date()
    }

    /// The data manager of type `D`
    ///
    /// Fails with `UnknownDataManager` when none was added,
    /// `AmbiguousDataManager` when several were, and
    /// `DataManagerNotInitialized` when it has not been initialized yet.
    fn get_data_manager<D: DataManager>(&self) -> NucleusResult<Rc<D>> {
        self.core().data_manager::<D>()
    }

    fn data_manager_exists<D: DataManager>(&self) -> bool {
        self.core().data_manager_exists::<D>()
    }

    /// Hand a value to the output consumer configured on the simulation
    fn release_output<T: Any>(&self, output: T) {
        self.core().release_output(Box::new(output));
    }

    /// Add an actor; `init` runs once the current callback has returned
    fn add_actor<F>(&self, init: F) -> NucleusResult<ActorId>
    where
        F: FnOnce(&ActorContext) -> NucleusResult<()> + 'static,
    {
        self.core().add_actor(init)
    }

    /// Remove an actor with all of its plans and subscriptions
    fn remove_actor(&self, actor: ActorId) -> NucleusResult<()> {
        self.core().remove_actor(actor)
    }

    fn actor_exists(&self, actor: ActorId) -> bool {
        self.core().actor_exists(actor)
    }

    /// Stop the simulation once the current plan has finished
    fn halt(&self) {
        self.core().request_halt();
    }
}

/// Plan management for contexts that own plans
pub trait PlanningContext: SimulationContext + PlannerHandle {
    /// The owner plans and subscriptions are attributed to
    fn owner(&self) -> PlanOwner {
        Self::owner_of(self.id())
    }

    /// Schedule a plan
    ///
    /// # Errors
    ///
    /// - `PastPlanningTime` when the plan time precedes the current time
    /// - `PlanningQueueClosed` once the run has finished
    /// - `DuplicatePlanKey` when this owner already has a plan with the key
    /// - `UnknownActorId` when the owning actor was removed
    fn add_plan(&self, plan: Plan<Self>) -> NucleusResult<()> {
        let id = self.id();
        let (meta, callback) = plan.into_parts();
        let erased: ErasedCallback =
            Box::new(move |core: &CoreHandle| callback(&Self::bind(core.clone(), id)));
        self.core().add_plan(self.owner(), meta, erased)
    }

    /// Look up one of this owner's plans by key
    fn get_plan(&self, key: &PlanKey) -> NucleusResult<Option<PlanRecord>> {
        self.core().get_plan(self.owner(), key)
    }

    /// Cancel one of this owner's plans, returning what was removed
    fn remove_plan(&self, key: &PlanKey) -> NucleusResult<Option<PlanRecord>> {
        self.core().remove_plan(self.owner(), key)
    }

    /// Keys of this owner's pending plans, in execution order
    fn get_plan_keys(&self) -> Vec<PlanKey> {
        self.core().plan_keys(self.owner())
    }

    /// Run `hook` once when the simulation closes
    fn subscribe_to_simulation_close<F>(&self, hook: F) -> NucleusResult<()>
    where
        F: FnOnce(&Self) -> NucleusResult<()> + 'static,
    {
        let id = self.id();
        let erased: ErasedCallback =
            Box::new(move |core: &CoreHandle| hook(&Self::bind(core.clone(), id)));
        self.core().subscribe_to_close(self.owner(), erased)
    }

    /// Register how checkpointed plan data of type `T` becomes a plan
    /// callback for this owner
    fn set_plan_data_converter<T, F, G>(&self, converter: F) -> NucleusResult<()>
    where
        T: PlanPayload,
        F: Fn(T) -> G + 'static,
        G: FnOnce(&Self) -> NucleusResult<()> + 'static,
    {
        self.core().check_owner(self.owner())?;
        let id = self.id();
        let erased: PlanConverter = Rc::new(move |data: &PlanData| -> NucleusResult<ErasedCallback> {
            let callback = converter(data.decode::<T>()?);
            let bound: ErasedCallback =
                Box::new(move |core: &CoreHandle| callback(&Self::bind(core.clone(), id)));
            Ok(bound)
        });
        self.core()
            .set_plan_data_converter(self.owner(), T::KIND, erased);
        Ok(())
    }
}

/// Subscribe an actor or report through a filter
fn subscribe_filtered<C, E, F>(context: &C, filter: EventFilter<E>, handler: F) -> NucleusResult<()>
where
    C: PlanningContext,
    E: Event,
    F: Fn(&C, &E) -> NucleusResult<()> + 'static,
{
    let owner = context.owner();
    context.core().check_owner(owner)?;
    let id = context.id();
    let erased: ErasedHandler = Rc::new(move |core: &CoreHandle, event: &dyn Any| {
        match event.downcast_ref::<E>() {
            Some(event) => handler(&C::bind(core.clone(), id), event),
            None => Ok(()),
        }
    });
    let projections = filter
        .pairs()
        .iter()
        .map(|(function, _)| (function.id().to_string(), function.erase()))
        .collect();
    context.core().events().borrow_mut().subscribe_filtered(
        TypeId::of::<E>(),
        std::any::type_name::<E>(),
        owner,
        filter.path(),
        projections,
        erased,
    )
}

fn unsubscribe_filtered<C, E>(context: &C, filter: &EventFilter<E>) -> NucleusResult<()>
where
    C: PlanningContext,
    E: Event,
{
    context.core().events().borrow_mut().unsubscribe_filtered(
        TypeId::of::<E>(),
        std::any::type_name::<E>(),
        context.owner(),
        &filter.path(),
    )
}

macro_rules! planning_context {
    ($context:ident, $id:ty, $field:ident, $variant:ident) => {
        impl ContextHandle for $context {
            fn core(&self) -> &CoreHandle {
                &self.core
            }
        }

        impl PlannerHandle for $context {
            type Id = $id;

            fn id(&self) -> $id {
                self.$field
            }

            fn owner_of(id: $id) -> PlanOwner {
                PlanOwner::$variant(id)
            }

            fn bind(core: CoreHandle, id: $id) -> Self {
                Self::new(core, id)
            }
        }

        impl SimulationContext for $context {}

        impl PlanningContext for $context {}

        impl fmt::Debug for $context {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($context))
                    .field(stringify!($field), &self.$field)
                    .field("time", &self.get_time())
                    .finish()
            }
        }
    };
}

// ============================================================================
// Data manager context
// ============================================================================

/// Context handed to data managers
///
/// The only context that can release events, so every state change is
/// attributed to a data manager.
#[derive(Clone)]
pub struct DataManagerContext {
    core: CoreHandle,
    data_manager: DataManagerId,
}

planning_context!(DataManagerContext, DataManagerId, data_manager, DataManager);

impl DataManagerContext {
    pub(crate) fn new(core: CoreHandle, data_manager: DataManagerId) -> Self {
        Self { core, data_manager }
    }

    pub fn data_manager_id(&self) -> DataManagerId {
        self.data_manager
    }

    /// Resolve a mutation event now
    ///
    /// Data manager subscribers of `E` run before this returns, as does any
    /// cascade they trigger when this is the outermost release.
    pub fn release_mutation_event<E: Event>(&self, event: E) -> NucleusResult<()> {
        self.core.release_mutation_event(&event)
    }

    /// Queue an observation event
    ///
    /// Delivered after the current callback returns: first to data managers,
    /// then to actor and report filter subscribers.
    pub fn release_observation_event<E: Event>(&self, event: E) -> NucleusResult<()> {
        self.core.release_observation_event(event)
    }

    /// Subscribe this data manager to every event of type `E`
    pub fn subscribe<E, F>(&self, handler: F) -> NucleusResult<()>
    where
        E: Event,
        F: Fn(&DataManagerContext, &E) -> NucleusResult<()> + 'static,
    {
        let id = self.data_manager;
        let erased: ErasedHandler = Rc::new(move |core: &CoreHandle, event: &dyn Any| {
            match event.downcast_ref::<E>() {
                Some(event) => handler(&DataManagerContext::new(core.clone(), id), event),
                None => Ok(()),
            }
        });
        self.core.subscribe_data_manager::<E>(id, erased)
    }

    pub fn unsubscribe<E: Event>(&self) -> NucleusResult<()> {
        self.core.unsubscribe_data_manager::<E>(self.data_manager)
    }

    /// Whether anyone listens to `E`; lets producers skip building events
    pub fn subscribers_exist<E: Event>(&self) -> bool {
        self.core.subscribers_exist::<E>()
    }
}

// ============================================================================
// Actor context
// ============================================================================

/// Context handed to actors
#[derive(Clone)]
pub struct ActorContext {
    core: CoreHandle,
    actor: ActorId,
}

planning_context!(ActorContext, ActorId, actor, Actor);

impl ActorContext {
    pub(crate) fn new(core: CoreHandle, actor: ActorId) -> Self {
        Self { core, actor }
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor
    }

    /// Subscribe to observation events of type `E` that pass `filter`
    pub fn subscribe<E, F>(&self, filter: EventFilter<E>, handler: F) -> NucleusResult<()>
    where
        E: Event,
        F: Fn(&ActorContext, &E) -> NucleusResult<()> + 'static,
    {
        subscribe_filtered(self, filter, handler)
    }

    pub fn unsubscribe<E: Event>(&self, filter: &EventFilter<E>) -> NucleusResult<()> {
        unsubscribe_filtered(self, filter)
    }
}

// ============================================================================
// Report context
// ============================================================================

/// Context handed to reports
///
/// Reports observe; they have no way to release events.
#[derive(Clone)]
pub struct ReportContext {
    core: CoreHandle,
    report: ReportId,
}

planning_context!(ReportContext, ReportId, report, Report);

impl ReportContext {
    pub(crate) fn new(core: CoreHandle, report: ReportId) -> Self {
        Self { core, report }
    }

    pub fn report_id(&self) -> ReportId {
        self.report
    }

    pub fn subscribe<E, F>(&self, filter: EventFilter<E>, handler: F) -> NucleusResult<()>
    where
        E: Event,
        F: Fn(&ReportContext, &E) -> NucleusResult<()> + 'static,
    {
        subscribe_filtered(self, filter, handler)
    }

    pub fn unsubscribe<E: Event>(&self, filter: &EventFilter<E>) -> NucleusResult<()> {
        unsubscribe_filtered(self, filter)
    }
}

// ============================================================================
// Plugin context
// ============================================================================

/// Context handed to plugin initializers
///
/// Only valid while plugin initializers run. Once startup moves on, every
/// call fails with `PluginInitializationClosed`.
#[derive(Clone)]
pub struct PluginContext {
    core: CoreHandle,
    plugin: PluginId,
}

impl PluginContext {
    pub(crate) fn new(core: CoreHandle, plugin: PluginId) -> Self {
        Self { core, plugin }
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin
    }

    pub fn add_data_manager<D: DataManager>(&self, data_manager: D) -> NucleusResult<DataManagerId> {
        self.core.check_plugin_phase()?;
        Ok(self.core.add_data_manager(data_manager))
    }

    pub fn add_actor<F>(&self, init: F) -> NucleusResult<ActorId>
    where
        F: FnOnce(&ActorContext) -> NucleusResult<()> + 'static,
    {
        self.core.check_plugin_phase()?;
        self.core.add_actor(init)
    }

    pub fn add_report<F>(&self, init: F) -> NucleusResult<ReportId>
    where
        F: FnOnce(&ReportContext) -> NucleusResult<()> + 'static,
    {
        self.core.check_plugin_phase()?;
        Ok(self.core.add_report(init))
    }

    /// The single plugin data of type `T` across all plugins
    pub fn get_plugin_data<T: PluginData>(&self) -> NucleusResult<Arc<T>> {
        let datas = self.get_plugin_datas::<T>()?;
        find_unique(
            datas,
            ErrorKind::UnknownPluginDataClass,
            ErrorKind::AmbiguousPluginDataClass,
            std::any::type_name::<T>(),
        )
    }

    /// Every plugin data of type `T` across all plugins
    pub fn get_plugin_datas<T: PluginData>(&self) -> NucleusResult<Vec<Arc<T>>> {
        self.core.check_plugin_phase()?;
        Ok(self
            .core
            .plugin_datas()
            .iter()
            .filter_map(downcast_data::<T>)
            .collect())
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .finish()
    }
}
