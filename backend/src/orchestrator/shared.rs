//! Shared engine core
//!
//! Every context is a handle onto one `SimulationCore`. The core is
//! single-threaded: all state sits behind `Cell`/`RefCell`, and no borrow is
//! ever held while user code (plans, handlers, initializers, close hooks)
//! runs. Handlers and callbacks are cloned or popped out of their containers
//! before they are invoked.
//!
//! # Event resolution
//!
//! Work that runs user code is wrapped in a *frame*. Mutation events are
//! delivered synchronously to data manager subscribers inside the releasing
//! frame. Observation events and the initialization of actors added while
//! running go to the deferred queue, which is drained once the outermost
//! frame returns. Draining delivers each observation to data managers first
//! and then to actor and report filter subscribers, and keeps going until the
//! queue is empty, so cascades settle before the next plan is popped.

use crate::core::ids::{ActorId, DataManagerId, ReportId};
use crate::core::time::SimulationClock;
use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::events::registry::EventRegistry;
use crate::models::data_manager::DataManager;
use crate::models::plan::{PlanData, PlanKey, PlanMeta, PlanRecord};
use crate::models::plan_queue::{PlanOwner, PlanQueue, QueuedPlan};
use crate::orchestrator::context::{ActorContext, DataManagerContext, ReportContext};
use crate::plugin::data::PluginData;
use crate::plugin::lookup::find_unique;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// Callback bound to an owner, invoked with the core
pub type ErasedCallback = Box<dyn FnOnce(&CoreHandle) -> NucleusResult<()>>;

/// Event handler bound to an owner
pub type ErasedHandler = Rc<dyn Fn(&CoreHandle, &dyn Any) -> NucleusResult<()>>;

/// Turns checkpointed plan data back into a callback for one owner
pub type PlanConverter = Rc<dyn Fn(&PlanData) -> NucleusResult<ErasedCallback>>;

/// Receives values released through `release_output`
pub type OutputConsumer = Box<dyn FnMut(Box<dyn Any>)>;

/// Lifecycle stage of a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PluginInit,
    DataManagerInit,
    ComponentInit,
    Running,
    Closed,
}

struct DataManagerSlot {
    manager: Rc<dyn DataManager>,
    any: Rc<dyn Any>,
    type_name: &'static str,
    initialized: bool,
}

enum Deferred {
    Observation {
        event_type: TypeId,
        type_name: &'static str,
        event: Box<dyn Any>,
    },
    ActorInit {
        actor: ActorId,
        init: ErasedCallback,
    },
}

pub struct SimulationCore {
    clock: RefCell<SimulationClock>,
    queue: RefCell<PlanQueue<ErasedCallback>>,
    phase: Cell<Phase>,
    halt_requested: Cell<bool>,

    data_managers: RefCell<Vec<DataManagerSlot>>,
    /// Liveness by actor id
    actors: RefCell<Vec<bool>>,
    report_count: Cell<usize>,
    startup_actors: RefCell<Vec<(ActorId, ErasedCallback)>>,
    startup_reports: RefCell<Vec<(ReportId, ErasedCallback)>>,

    events: RefCell<EventRegistry<ErasedHandler>>,
    deferred: RefCell<VecDeque<Deferred>>,
    depth: Cell<usize>,
    draining: Cell<bool>,

    close_hooks: RefCell<Vec<(PlanOwner, ErasedCallback)>>,
    converters: RefCell<HashMap<(PlanOwner, String), PlanConverter>>,
    plugin_datas: RefCell<Vec<Arc<dyn PluginData>>>,
    output_consumer: RefCell<Option<OutputConsumer>>,
}

/// Shared, cloneable handle onto the core
#[derive(Clone)]
pub struct CoreHandle(Rc<SimulationCore>);

impl Deref for CoreHandle {
    type Target = SimulationCore;

    fn deref(&self) -> &SimulationCore {
        &self.0
    }
}

impl CoreHandle {
    pub fn new(
        clock: SimulationClock,
        next_arrival_id: u64,
        plugin_datas: Vec<Arc<dyn PluginData>>,
        output_consumer: Option<OutputConsumer>,
    ) -> Self {
        CoreHandle(Rc::new(SimulationCore {
            clock: RefCell::new(clock),
            queue: RefCell::new(PlanQueue::with_arrival_start(next_arrival_id)),
            phase: Cell::new(Phase::PluginInit),
            halt_requested: Cell::new(false),
            data_managers: RefCell::new(Vec::new()),
            actors: RefCell::new(Vec::new()),
            report_count: Cell::new(0),
            startup_actors: RefCell::new(Vec::new()),
            startup_reports: RefCell::new(Vec::new()),
            events: RefCell::new(EventRegistry::new()),
            deferred: RefCell::new(VecDeque::new()),
            depth: Cell::new(0),
            draining: Cell::new(false),
            close_hooks: RefCell::new(Vec::new()),
            converters: RefCell::new(HashMap::new()),
            plugin_datas: RefCell::new(plugin_datas),
            output_consumer: RefCell::new(output_consumer),
        }))
    }

    // ========================================================================
    // Frames and deferred work
    // ========================================================================

    /// Run user code as one frame, then settle deferred work if this was the
    /// outermost frame
    pub fn run_frame<T>(&self, work: impl FnOnce() -> NucleusResult<T>) -> NucleusResult<T> {
        self.depth.set(self.depth.get() + 1);
        let result = work();
        self.depth.set(self.depth.get() - 1);
        let value = result?;
        self.settle()?;
        Ok(value)
    }

    fn settle(&self) -> NucleusResult<()> {
        if self.depth.get() == 0 && !self.draining.get() {
            self.drain()
        } else {
            Ok(())
        }
    }

    fn drain(&self) -> NucleusResult<()> {
        self.draining.set(true);
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some(item) = next else {
                break;
            };
            if let Err(err) = self.deliver(item) {
                self.draining.set(false);
                self.deferred.borrow_mut().clear();
                return Err(err);
            }
        }
        self.draining.set(false);
        Ok(())
    }

    fn deliver(&self, item: Deferred) -> NucleusResult<()> {
        match item {
            Deferred::Observation {
                event_type,
                type_name,
                event,
            } => {
                let event: &dyn Any = &*event;
                let managers = self.events.borrow().data_manager_handlers(event_type);
                for (manager, handler) in managers {
                    trace!(event = type_name, subscriber = %manager, "observation delivered");
                    self.in_frame(|| handler(self, event))?;
                }
                let observers = self.events.borrow().filtered_handlers(event_type, event);
                for (owner, handler) in observers {
                    if !self.owner_exists(owner) {
                        continue;
                    }
                    trace!(event = type_name, subscriber = %owner, "observation delivered");
                    self.in_frame(|| handler(self, event))?;
                }
                Ok(())
            }
            Deferred::ActorInit { actor, init } => {
                if self.actor_exists(actor) {
                    debug!(%actor, "initializing actor added at runtime");
                    self.in_frame(|| init(self))?;
                }
                Ok(())
            }
        }
    }

    /// A frame that never drains; used while the deferred queue is draining
    fn in_frame(&self, work: impl FnOnce() -> NucleusResult<()>) -> NucleusResult<()> {
        self.depth.set(self.depth.get() + 1);
        let result = work();
        self.depth.set(self.depth.get() - 1);
        result
    }

    // ========================================================================
    // Time and lifecycle
    // ========================================================================

    pub fn clock(&self) -> SimulationClock {
        self.clock.borrow().clone()
    }

    pub fn advance_to(&self, time: f64) {
        self.clock.borrow_mut().advance_to(time);
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn set_phase(&self, phase: Phase) {
        debug!(?phase, "entering phase");
        self.phase.set(phase);
    }

    pub fn request_halt(&self) {
        self.halt_requested.set(true);
    }

    pub fn halt_requested(&self) -> bool {
        self.halt_requested.get()
    }

    pub fn release_output(&self, output: Box<dyn Any>) {
        match self.output_consumer.borrow_mut().as_mut() {
            Some(consumer) => consumer(output),
            None => trace!("output released without a consumer"),
        }
    }

    // ========================================================================
    // Plans
    // ========================================================================

    pub fn add_plan(
        &self,
        owner: PlanOwner,
        meta: PlanMeta,
        callback: ErasedCallback,
    ) -> NucleusResult<()> {
        self.check_owner(owner)?;
        if self.phase.get() == Phase::Closed {
            return Err(ContractError::new(ErrorKind::PlanningQueueClosed));
        }
        let now = self.clock.borrow().current_time();
        if meta.time.is_nan() || meta.time < now {
            return Err(ContractError::with_details(
                ErrorKind::PastPlanningTime,
                format!("plan time {} is before the current time {}", meta.time, now),
            ));
        }
        self.queue.borrow_mut().insert(owner, meta, callback)?;
        Ok(())
    }

    /// Put a checkpointed plan back under its original arrival id
    pub fn restore_plan(
        &self,
        owner: PlanOwner,
        meta: PlanMeta,
        arrival_id: u64,
        callback: ErasedCallback,
    ) -> NucleusResult<()> {
        self.queue
            .borrow_mut()
            .restore(owner, meta, arrival_id, callback)
    }

    pub fn get_plan(&self, owner: PlanOwner, key: &PlanKey) -> NucleusResult<Option<PlanRecord>> {
        check_key(key)?;
        Ok(self.queue.borrow().get(owner, key))
    }

    pub fn remove_plan(
        &self,
        owner: PlanOwner,
        key: &PlanKey,
    ) -> NucleusResult<Option<PlanRecord>> {
        check_key(key)?;
        let removed = self.queue.borrow_mut().remove(owner, key);
        Ok(removed.map(|plan| plan.record()))
    }

    pub fn plan_keys(&self, owner: PlanOwner) -> Vec<PlanKey> {
        self.queue.borrow().keys_for(owner)
    }

    /// Time of the next plan and whether any active plan remains
    pub fn peek_plan(&self) -> Option<(f64, usize)> {
        let queue = self.queue.borrow();
        queue.peek().map(|plan| (plan.meta.time, queue.active_count()))
    }

    pub fn pop_plan(&self) -> Option<QueuedPlan<ErasedCallback>> {
        self.queue.borrow_mut().pop()
    }

    /// Remove every remaining plan, in execution order
    pub fn drain_plans(&self) -> Vec<QueuedPlan<ErasedCallback>> {
        self.queue.borrow_mut().drain_ordered()
    }

    pub fn next_arrival_id(&self) -> u64 {
        self.queue.borrow().next_arrival_id()
    }

    pub fn set_plan_data_converter(&self, owner: PlanOwner, kind: &str, converter: PlanConverter) {
        self.converters
            .borrow_mut()
            .insert((owner, kind.to_string()), converter);
    }

    pub fn plan_data_converter(&self, owner: PlanOwner, kind: &str) -> Option<PlanConverter> {
        self.converters
            .borrow()
            .get(&(owner, kind.to_string()))
            .cloned()
    }

    pub fn subscribe_to_close(&self, owner: PlanOwner, hook: ErasedCallback) -> NucleusResult<()> {
        self.check_owner(owner)?;
        self.close_hooks.borrow_mut().push((owner, hook));
        Ok(())
    }

    /// Close hooks ordered data managers, then actors, then reports
    pub fn take_close_hooks(&self) -> Vec<(PlanOwner, ErasedCallback)> {
        let mut hooks = std::mem::take(&mut *self.close_hooks.borrow_mut());
        hooks.sort_by_key(|(owner, _)| owner.planner());
        hooks
    }

    // ========================================================================
    // Components
    // ========================================================================

    pub fn check_plugin_phase(&self) -> NucleusResult<()> {
        if self.phase.get() == Phase::PluginInit {
            Ok(())
        } else {
            Err(ContractError::new(ErrorKind::PluginInitializationClosed))
        }
    }

    pub fn plugin_datas(&self) -> Vec<Arc<dyn PluginData>> {
        self.plugin_datas.borrow().clone()
    }

    pub fn add_data_manager<D: DataManager>(&self, manager: D) -> DataManagerId {
        let manager = Rc::new(manager);
        let mut slots = self.data_managers.borrow_mut();
        let id = DataManagerId::new(slots.len());
        slots.push(DataManagerSlot {
            manager: manager.clone(),
            any: manager,
            type_name: std::any::type_name::<D>(),
            initialized: false,
        });
        debug!(data_manager = %id, kind = std::any::type_name::<D>(), "data manager added");
        id
    }

    pub fn data_manager_count(&self) -> usize {
        self.data_managers.borrow().len()
    }

    /// Mark a data manager initialized and return it for its `init` call
    pub fn begin_data_manager_init(&self, id: DataManagerId) -> Option<(Rc<dyn DataManager>, &'static str)> {
        let mut slots = self.data_managers.borrow_mut();
        let slot = slots.get_mut(id.value())?;
        slot.initialized = true;
        Some((Rc::clone(&slot.manager), slot.type_name))
    }

    pub fn data_manager<D: DataManager>(&self) -> NucleusResult<Rc<D>> {
        let slots = self.data_managers.borrow();
        let slot = find_unique(
            slots.iter().filter(|slot| slot.any.is::<D>()),
            ErrorKind::UnknownDataManager,
            ErrorKind::AmbiguousDataManager,
            std::any::type_name::<D>(),
        )?;
        if !slot.initialized {
            return Err(ContractError::with_details(
                ErrorKind::DataManagerNotInitialized,
                slot.type_name.to_string(),
            ));
        }
        Rc::clone(&slot.any).downcast::<D>().map_err(|_| {
            ContractError::with_details(
                ErrorKind::UnknownDataManager,
                std::any::type_name::<D>().to_string(),
            )
        })
    }

    pub fn data_manager_exists<D: DataManager>(&self) -> bool {
        self.data_managers
            .borrow()
            .iter()
            .any(|slot| slot.any.is::<D>())
    }

    /// Register an actor; its initializer runs at the next safe point
    pub fn add_actor(&self, init: impl FnOnce(&ActorContext) -> NucleusResult<()> + 'static) -> NucleusResult<ActorId> {
        if self.phase.get() == Phase::Closed {
            return Err(ContractError::new(ErrorKind::PlanningQueueClosed));
        }
        let id = {
            let mut actors = self.actors.borrow_mut();
            actors.push(true);
            ActorId::new(actors.len() - 1)
        };
        let init: ErasedCallback = Box::new(move |core: &CoreHandle| init(&ActorContext::new(core.clone(), id)));
        match self.phase.get() {
            Phase::PluginInit | Phase::DataManagerInit => {
                self.startup_actors.borrow_mut().push((id, init));
            }
            _ => {
                self.deferred
                    .borrow_mut()
                    .push_back(Deferred::ActorInit { actor: id, init });
                self.settle()?;
            }
        }
        debug!(actor = %id, "actor added");
        Ok(id)
    }

    pub fn add_report(&self, init: impl FnOnce(&ReportContext) -> NucleusResult<()> + 'static) -> ReportId {
        let id = ReportId::new(self.report_count.get());
        self.report_count.set(id.value() + 1);
        let init: ErasedCallback = Box::new(move |core: &CoreHandle| init(&ReportContext::new(core.clone(), id)));
        self.startup_reports.borrow_mut().push((id, init));
        debug!(report = %id, "report added");
        id
    }

    pub fn take_startup_reports(&self) -> Vec<(ReportId, ErasedCallback)> {
        std::mem::take(&mut *self.startup_reports.borrow_mut())
    }

    pub fn take_startup_actors(&self) -> Vec<(ActorId, ErasedCallback)> {
        std::mem::take(&mut *self.startup_actors.borrow_mut())
    }

    pub fn actor_exists(&self, id: ActorId) -> bool {
        self.actors.borrow().get(id.value()).copied().unwrap_or(false)
    }

    /// Remove an actor together with its plans, subscriptions, close hooks
    /// and converters
    pub fn remove_actor(&self, id: ActorId) -> NucleusResult<()> {
        {
            let mut actors = self.actors.borrow_mut();
            match actors.get_mut(id.value()) {
                Some(alive) if *alive => *alive = false,
                _ => return Err(unknown_actor(id)),
            }
        }
        let owner = PlanOwner::Actor(id);
        let plans = self.queue.borrow_mut().remove_owner(owner);
        self.events.borrow_mut().remove_owner(owner);
        self.close_hooks.borrow_mut().retain(|(o, _)| *o != owner);
        self.converters.borrow_mut().retain(|(o, _), _| *o != owner);
        self.startup_actors.borrow_mut().retain(|(a, _)| *a != id);
        debug!(actor = %id, plans_removed = plans, "actor removed");
        Ok(())
    }

    /// Fails for actors that were removed or never existed
    pub fn check_owner(&self, owner: PlanOwner) -> NucleusResult<()> {
        match owner {
            PlanOwner::Actor(id) if !self.actor_exists(id) => Err(unknown_actor(id)),
            _ => Ok(()),
        }
    }

    pub fn owner_exists(&self, owner: PlanOwner) -> bool {
        match owner {
            PlanOwner::DataManager(id) => id.value() < self.data_manager_count(),
            PlanOwner::Actor(id) => self.actor_exists(id),
            PlanOwner::Report(id) => id.value() < self.report_count.get(),
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn subscribe_data_manager<E: Any>(&self, owner: DataManagerId, handler: ErasedHandler) -> NucleusResult<()> {
        self.events.borrow_mut().subscribe_data_manager(
            TypeId::of::<E>(),
            std::any::type_name::<E>(),
            owner,
            handler,
        )
    }

    pub fn unsubscribe_data_manager<E: Any>(&self, owner: DataManagerId) -> NucleusResult<()> {
        self.events.borrow_mut().unsubscribe_data_manager(
            TypeId::of::<E>(),
            std::any::type_name::<E>(),
            owner,
        )
    }

    pub(crate) fn events(&self) -> &RefCell<EventRegistry<ErasedHandler>> {
        &self.events
    }

    pub fn subscribers_exist<E: Any>(&self) -> bool {
        self.events.borrow().subscribers_exist(TypeId::of::<E>())
    }

    /// Deliver a mutation event to data manager subscribers right away
    pub fn release_mutation_event<E: Any>(&self, event: &E) -> NucleusResult<()> {
        let type_name = std::any::type_name::<E>();
        let event: &dyn Any = event;
        let handlers = self.events.borrow().data_manager_handlers(TypeId::of::<E>());
        self.run_frame(|| {
            for (manager, handler) in handlers {
                trace!(event = type_name, subscriber = %manager, "mutation delivered");
                handler(self, event)?;
            }
            Ok(())
        })
    }

    /// Queue an observation event for delivery after the current frame
    pub fn release_observation_event<E: Any>(&self, event: E) -> NucleusResult<()> {
        self.deferred.borrow_mut().push_back(Deferred::Observation {
            event_type: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            event: Box::new(event),
        });
        self.settle()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Drop everything that may hold a handle back to the core
    pub fn teardown(&self) {
        self.phase.set(Phase::Closed);
        self.queue.borrow_mut().drain_ordered();
        self.events.borrow_mut().clear();
        self.deferred.borrow_mut().clear();
        self.close_hooks.borrow_mut().clear();
        self.converters.borrow_mut().clear();
        self.startup_actors.borrow_mut().clear();
        self.startup_reports.borrow_mut().clear();
        self.data_managers.borrow_mut().clear();
        self.output_consumer.borrow_mut().take();
    }
}

fn check_key(key: &PlanKey) -> NucleusResult<()> {
    if key.is_empty() {
        Err(ContractError::new(ErrorKind::NullPlanKey))
    } else {
        Ok(())
    }
}

fn unknown_actor(id: ActorId) -> ContractError {
    ContractError::with_details(ErrorKind::UnknownActorId, id.to_string())
}

/// Used by the engine to initialize data managers in order
pub(crate) fn init_data_manager(core: &CoreHandle, id: DataManagerId) -> NucleusResult<()> {
    let Some((manager, type_name)) = core.begin_data_manager_init(id) else {
        return Ok(());
    };
    debug!(data_manager = %id, kind = type_name, "initializing data manager");
    let context = DataManagerContext::new(core.clone(), id);
    core.run_frame(|| manager.init(&context))
}
