//! Event Tests - mutation and observation resolution
//!
//! Critical invariants tested:
//! - Mutations resolve before `release_mutation_event` returns
//! - Observers run after the releasing callback and see settled state
//! - Data managers observe before actors and reports
//! - Observations are delivered breadth first, in release order
//! - Filters narrow delivery; duplicate subscriptions are rejected
//! - Removed actors and unsubscribed filters receive nothing

use nucleus_core_rs::{
    ActorContext, ContractError, DataManager, DataManagerContext, ErrorKind, Event, EventFilter,
    IdentifiableFunction, NucleusResult, Plan, PlanningContext, Plugin, ReportContext,
    Simulation, SimulationContext,
};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

// ============================================================================
// Test Helpers
// ============================================================================

/// Mutation: change the stock on a shelf
#[derive(Debug)]
struct StockMutation {
    shelf: u32,
    amount: i64,
}

impl Event for StockMutation {}

/// Observation: the stock on a shelf changed
#[derive(Debug)]
struct StockChanged {
    shelf: u32,
    previous: i64,
    current: i64,
}

impl Event for StockChanged {}

fn shelf() -> IdentifiableFunction<StockChanged> {
    IdentifiableFunction::new("shelf", |e: &StockChanged| e.shelf.into())
}

fn shelf_filter(value: u32) -> EventFilter<StockChanged> {
    EventFilter::builder()
        .add_function_value_pair(shelf(), value)
        .build()
}

/// Owns stock levels; every change goes through a mutation event
#[derive(Default)]
struct Inventory {
    levels: RefCell<BTreeMap<u32, i64>>,
    observations_built: Cell<u32>,
    context: RefCell<Option<DataManagerContext>>,
}

impl Inventory {
    fn level(&self, shelf: u32) -> i64 {
        self.levels.borrow().get(&shelf).copied().unwrap_or(0)
    }

    fn restock(&self, shelf: u32, amount: i64) -> NucleusResult<()> {
        let context = self
            .context
            .borrow()
            .clone()
            .ok_or_else(|| ContractError::new(ErrorKind::DataManagerNotInitialized))?;
        context.release_mutation_event(StockMutation { shelf, amount })
    }

    fn apply(&self, ctx: &DataManagerContext, mutation: &StockMutation) -> NucleusResult<()> {
        let (previous, current) = {
            let mut levels = self.levels.borrow_mut();
            let level = levels.entry(mutation.shelf).or_insert(0);
            let previous = *level;
            *level += mutation.amount;
            (previous, *level)
        };
        if ctx.subscribers_exist::<StockChanged>() {
            self.observations_built.set(self.observations_built.get() + 1);
            ctx.release_observation_event(StockChanged {
                shelf: mutation.shelf,
                previous,
                current,
            })?;
        }
        Ok(())
    }
}

impl DataManager for Inventory {
    fn init(self: Rc<Self>, ctx: &DataManagerContext) -> NucleusResult<()> {
        *self.context.borrow_mut() = Some(ctx.clone());
        let inventory = Rc::clone(&self);
        ctx.subscribe(move |ctx: &DataManagerContext, mutation: &StockMutation| {
            inventory.apply(ctx, mutation)
        })
    }
}

/// Data manager that records every stock change it observes
#[derive(Default)]
struct Ledger {
    entries: RefCell<Vec<(u32, i64)>>,
}

impl DataManager for Ledger {
    fn init(self: Rc<Self>, ctx: &DataManagerContext) -> NucleusResult<()> {
        let ledger = Rc::clone(&self);
        ctx.subscribe(move |_: &DataManagerContext, event: &StockChanged| {
            ledger.entries.borrow_mut().push((event.shelf, event.current));
            Ok(())
        })
    }
}

type Log = Rc<RefCell<Vec<String>>>;

fn recorder() -> (Log, impl FnMut(Box<dyn Any>)) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let consumer = move |output: Box<dyn Any>| {
        if let Ok(line) = output.downcast::<String>() {
            sink.borrow_mut().push(*line);
        }
    };
    (log, consumer)
}

fn at<C: PlanningContext>(
    time: f64,
    callback: impl FnOnce(&C) -> NucleusResult<()> + 'static,
) -> Plan<C> {
    Plan::builder().time(time).callback(callback).build().unwrap()
}

/// Restock from an actor plan
fn restock<C: SimulationContext>(ctx: &C, shelf: u32, amount: i64) -> NucleusResult<()> {
    ctx.get_data_manager::<Inventory>()?.restock(shelf, amount)
}

type ActorInit = Rc<dyn Fn(&ActorContext) -> NucleusResult<()>>;

/// Run a simulation with an inventory, a ledger and the given actors and
/// report; actors are listed as factories so the plugin stays shareable
fn run(
    actors: &[fn() -> ActorInit],
    report: Option<fn(&ReportContext) -> NucleusResult<()>>,
) -> Vec<String> {
    let actors = actors.to_vec();
    let (log, consumer) = recorder();
    let plugin = Plugin::builder()
        .set_plugin_id("store")
        .set_initializer(move |ctx| {
            ctx.add_data_manager(Inventory::default())?;
            ctx.add_data_manager(Ledger::default())?;
            if let Some(report) = report {
                ctx.add_report(report)?;
            }
            for actor in &actors {
                let init = actor();
                ctx.add_actor(move |actor: &ActorContext| init(actor))?;
            }
            Ok(())
        })
        .build()
        .unwrap();

    Simulation::builder()
        .add_plugin(plugin)
        .set_output_consumer(consumer)
        .build()
        .unwrap()
        .execute()
        .unwrap();
    let lines = log.borrow().clone();
    lines
}

// ============================================================================
// Resolution Order
// ============================================================================

#[test]
fn test_observers_see_fully_applied_mutations() {
    fn restocker() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| {
                restock(ctx, 1, 5)?;
                restock(ctx, 1, 3)?;
                let level = ctx.get_data_manager::<Inventory>()?.level(1);
                ctx.release_output(format!("plan done, level {}", level));
                Ok(())
            }))
        })
    }
    fn observer() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, event: &StockChanged| {
                    let level = ctx.get_data_manager::<Inventory>()?.level(event.shelf);
                    ctx.release_output(format!(
                        "observed {}->{}, level {}",
                        event.previous, event.current, level
                    ));
                    Ok(())
                },
            )
        })
    }

    let log = run(&[restocker, observer], None);
    assert_eq!(
        log,
        vec![
            "plan done, level 8",
            "observed 0->5, level 8",
            "observed 5->8, level 8",
        ]
    );
}

#[test]
fn test_data_managers_observe_before_actors() {
    fn restocker() -> ActorInit {
        Rc::new(|actor: &ActorContext| actor.add_plan(at(1.0, |ctx: &ActorContext| restock(ctx, 4, 2))))
    }
    fn observer() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, _: &StockChanged| {
                    let ledger = ctx.get_data_manager::<Ledger>()?;
                    ctx.release_output(format!("ledger {:?}", ledger.entries.borrow()));
                    Ok(())
                },
            )
        })
    }

    let log = run(&[restocker, observer], None);
    assert_eq!(log, vec!["ledger [(4, 2)]"]);
}

#[test]
fn test_observations_delivered_breadth_first() {
    // The first actor reacts to shelf 1 by restocking shelf 2. Delivery of
    // the shelf 1 event to the second actor must finish first.
    fn reactor() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| restock(ctx, 1, 1)))?;
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, event: &StockChanged| {
                    ctx.release_output(format!("reactor:{}", event.shelf));
                    if event.shelf == 1 {
                        restock(ctx, 2, 1)?;
                    }
                    Ok(())
                },
            )
        })
    }
    fn watcher() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, event: &StockChanged| {
                    ctx.release_output(format!("watcher:{}", event.shelf));
                    Ok(())
                },
            )
        })
    }

    let log = run(&[reactor, watcher], None);
    assert_eq!(log, vec!["reactor:1", "watcher:1", "reactor:2", "watcher:2"]);
}

#[test]
fn test_mutation_resolves_before_release_returns() {
    fn checker() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(2.0, |ctx: &ActorContext| {
                let inventory = ctx.get_data_manager::<Inventory>()?;
                inventory.restock(9, -4)?;
                ctx.release_output(format!("level {}", inventory.level(9)));
                Ok(())
            }))
        })
    }

    assert_eq!(run(&[checker], None), vec!["level -4"]);
}

// ============================================================================
// Filters and Subscriptions
// ============================================================================

#[test]
fn test_filters_narrow_delivery() {
    fn restocker() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| {
                restock(ctx, 1, 1)?;
                restock(ctx, 2, 1)
            }))
        })
    }
    fn shelf_one() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(shelf_filter(1), |ctx: &ActorContext, event: &StockChanged| {
                ctx.release_output(format!("actor:{}", event.shelf));
                Ok(())
            })
        })
    }
    fn report(report: &ReportContext) -> NucleusResult<()> {
        report.subscribe(
            EventFilter::<StockChanged>::of_type(),
            |ctx: &ReportContext, event: &StockChanged| {
                ctx.release_output(format!("report:{}", event.shelf));
                Ok(())
            },
        )
    }

    // The report initializes, and so subscribes, before the actors
    let report: fn(&ReportContext) -> NucleusResult<()> = report;
    let log = run(&[restocker, shelf_one], Some(report));
    assert_eq!(log, vec!["report:1", "actor:1", "report:2"]);
}

#[test]
fn test_duplicate_subscriptions_rejected() {
    fn subscriber() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(shelf_filter(1), |_: &ActorContext, _: &StockChanged| Ok(()))?;
            let err = actor
                .subscribe(shelf_filter(1), |_: &ActorContext, _: &StockChanged| Ok(()))
                .unwrap_err();
            actor.release_output(format!("{:?}", err.kind()));

            // A different path is a different subscription
            actor.subscribe(shelf_filter(2), |_: &ActorContext, _: &StockChanged| Ok(()))?;

            let err = actor.unsubscribe(&shelf_filter(3)).unwrap_err();
            actor.release_output(format!("{:?}", err.kind()));
            Ok(())
        })
    }

    assert_eq!(
        run(&[subscriber], None),
        vec!["DuplicateEventSubscription", "UnknownEventSubscription"]
    );
}

#[test]
fn test_duplicate_data_manager_subscription_rejected() {
    struct Twice;

    impl DataManager for Twice {
        fn init(self: Rc<Self>, ctx: &DataManagerContext) -> NucleusResult<()> {
            ctx.subscribe(|_: &DataManagerContext, _: &StockChanged| Ok(()))?;
            ctx.subscribe(|_: &DataManagerContext, _: &StockChanged| Ok(()))
        }
    }

    let plugin = Plugin::builder()
        .set_plugin_id("twice")
        .set_initializer(|ctx| {
            ctx.add_data_manager(Twice)?;
            Ok(())
        })
        .build()
        .unwrap();
    let err = Simulation::builder()
        .add_plugin(plugin)
        .build()
        .unwrap()
        .execute()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateEventSubscription);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    fn restocker() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| restock(ctx, 1, 1)))?;
            actor.add_plan(at(2.0, |ctx: &ActorContext| restock(ctx, 1, 1)))
        })
    }
    fn once() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(shelf_filter(1), |ctx: &ActorContext, event: &StockChanged| {
                ctx.release_output(format!("seen {}", event.current));
                ctx.unsubscribe(&shelf_filter(1))
            })
        })
    }

    assert_eq!(run(&[restocker, once], None), vec!["seen 1"]);
}

#[test]
fn test_observations_skipped_without_subscribers() {
    fn restocker() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| {
                restock(ctx, 1, 1)?;
                let inventory = ctx.get_data_manager::<Inventory>()?;
                ctx.release_output(format!("built {}", inventory.observations_built.get()));
                Ok(())
            }))
        })
    }

    struct Quiet;

    impl DataManager for Quiet {
        fn init(self: Rc<Self>, _: &DataManagerContext) -> NucleusResult<()> {
            Ok(())
        }
    }

    // Only the inventory here; nobody listens to StockChanged
    let (log, consumer) = recorder();
    let plugin = Plugin::builder()
        .set_plugin_id("quiet")
        .set_initializer(|ctx| {
            ctx.add_data_manager(Inventory::default())?;
            ctx.add_data_manager(Quiet)?;
            let init = restocker();
            ctx.add_actor(move |actor: &ActorContext| init(actor))?;
            Ok(())
        })
        .build()
        .unwrap();
    Simulation::builder()
        .add_plugin(plugin)
        .set_output_consumer(consumer)
        .build()
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(*log.borrow(), vec!["built 0"]);

    // The ledger listens, so the event is built
    assert_eq!(run(&[restocker], None), vec!["built 1"]);
}

#[test]
fn test_removed_actor_receives_nothing() {
    fn listener() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, _: &StockChanged| {
                    ctx.release_output("listener heard".to_string());
                    Ok(())
                },
            )?;
            actor.add_plan(at(5.0, |ctx: &ActorContext| {
                ctx.release_output("listener plan".to_string());
                Ok(())
            }))
        })
    }
    fn remover() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| {
                // The listener was added first
                let listener = nucleus_core_rs::ActorId::new(0);
                ctx.remove_actor(listener)?;
                ctx.release_output(format!("exists {}", ctx.actor_exists(listener)));
                restock(ctx, 1, 1)
            }))
        })
    }

    assert_eq!(run(&[listener, remover], None), vec!["exists false"]);
}

#[test]
fn test_observer_removed_mid_delivery_is_skipped() {
    fn remover() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.add_plan(at(1.0, |ctx: &ActorContext| restock(ctx, 1, 1)))?;
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, _: &StockChanged| {
                    ctx.release_output("remover heard".to_string());
                    ctx.remove_actor(nucleus_core_rs::ActorId::new(1))
                },
            )
        })
    }
    fn victim() -> ActorInit {
        Rc::new(|actor: &ActorContext| {
            actor.subscribe(
                EventFilter::<StockChanged>::of_type(),
                |ctx: &ActorContext, _: &StockChanged| {
                    ctx.release_output("victim heard".to_string());
                    Ok(())
                },
            )
        })
    }

    assert_eq!(run(&[remover, victim], None), vec!["remover heard"]);
}
