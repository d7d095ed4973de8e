//! Checkpoint Tests - capture, validation and resume
//!
//! Critical invariants tested:
//! - Resuming from a checkpoint reproduces the uninterrupted run
//! - Restored plans keep time, key, active flag and arrival id
//! - Plans without plan data are left out and counted
//! - Invalid checkpoints are rejected before any plugin code runs
//! - Missing converters abort the resume
//! - Equal states have equal fingerprints

use nucleus_core_rs::{
    ActorContext, DataManager, DataManagerContext, ErrorKind, NucleusResult, Plan, PlanData,
    PlanKey, PlanPayload, PlanQueueData, Planner, PlanningContext, Plugin, Simulation,
    SimulationContext, SimulationResult, SimulationState,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Tick {
    n: u32,
}

impl PlanPayload for Tick {
    const KIND: &'static str = "tick";
}

#[derive(Debug, Serialize, Deserialize)]
struct Restock {
    shelf: u32,
}

impl PlanPayload for Restock {
    const KIND: &'static str = "restock";
}

fn say<C: SimulationContext>(ctx: &C, line: impl Into<String>) {
    ctx.release_output(line.into());
}

fn tick_plan(time: f64, n: u32) -> Plan<ActorContext> {
    Plan::builder()
        .time(time)
        .plan_data(PlanData::new(&Tick { n }).unwrap())
        .callback(move |ctx: &ActorContext| run_tick(ctx, n))
        .build()
        .unwrap()
}

/// Announce the tick and schedule the next one a day later
fn run_tick(ctx: &ActorContext, n: u32) -> NucleusResult<()> {
    say(ctx, format!("tick {} at {}", n, ctx.get_time()));
    ctx.add_plan(tick_plan(ctx.get_time() + 1.0, n + 1))
}

/// One actor ticking once a day; seeds the first tick only on a fresh start
fn ticker_plugin() -> Plugin {
    Plugin::builder()
        .set_plugin_id("ticker")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor: &ActorContext| {
                actor.set_plan_data_converter(|tick: Tick| {
                    move |ctx: &ActorContext| run_tick(ctx, tick.n)
                })?;
                if actor.get_start_time() == 0.0 {
                    actor.add_plan(tick_plan(1.0, 1))?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap()
}

/// Data manager holding a keyed, passive restock plan
struct Warehouse;

impl DataManager for Warehouse {
    fn init(self: Rc<Self>, ctx: &DataManagerContext) -> NucleusResult<()> {
        ctx.set_plan_data_converter(|restock: Restock| {
            move |ctx: &DataManagerContext| -> NucleusResult<()> {
                say(ctx, format!("restocking shelf {} at {}", restock.shelf, ctx.get_time()));
                Ok(())
            }
        })?;
        if ctx.get_start_time() == 0.0 {
            ctx.add_plan(
                Plan::builder()
                    .time(10.0)
                    .key("restock")
                    .active(false)
                    .plan_data(PlanData::new(&Restock { shelf: 3 })?)
                    .callback(|_: &DataManagerContext| Ok(()))
                    .build()?,
            )?;
        }
        ctx.subscribe_to_simulation_close(|ctx: &DataManagerContext| {
            match ctx.get_plan(&PlanKey::new("restock"))? {
                Some(record) => say(
                    ctx,
                    format!("pending {} {} {}", record.time, record.active, record.arrival_id),
                ),
                None => say(ctx, "nothing pending"),
            }
            Ok(())
        })
    }
}

fn warehouse_plugin() -> Plugin {
    Plugin::builder()
        .set_plugin_id("warehouse")
        .set_initializer(|ctx| {
            ctx.add_data_manager(Warehouse)?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn execute(
    plugin: Plugin,
    halt_time: Option<f64>,
    state: Option<SimulationState>,
) -> NucleusResult<(SimulationResult, Vec<String>)> {
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let mut builder = Simulation::builder()
        .add_plugin(plugin)
        .set_output_consumer(move |output: Box<dyn Any>| {
            if let Ok(line) = output.downcast::<String>() {
                sink.borrow_mut().push(*line);
            }
        });
    if let Some(halt_time) = halt_time {
        builder = builder.set_halt_time(halt_time);
    }
    if let Some(state) = state {
        builder = builder.set_simulation_state(state);
    }
    let result = builder.build()?.execute()?;
    let lines = log.borrow().clone();
    Ok((result, lines))
}

fn tick_data(time: f64, n: u32, arrival_id: u64) -> PlanQueueData {
    PlanQueueData::builder()
        .time(time)
        .plan_data(PlanData::new(&Tick { n }).unwrap())
        .planner(Planner::Actor)
        .planner_id(0)
        .arrival_id(arrival_id)
        .build()
        .unwrap()
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn test_resumed_run_matches_uninterrupted_run() {
    let (full, full_lines) = execute(ticker_plugin(), Some(6.0), None).unwrap();

    let (first, mut split_lines) = execute(ticker_plugin(), Some(3.0), None).unwrap();
    let checkpoint = first.state.unwrap();
    assert_eq!(checkpoint.start_time(), 3.0);
    assert_eq!(checkpoint.planning_queue_arrival_id(), 4);

    // Through the wire format, as a real resume would
    let checkpoint = SimulationState::from_json(&checkpoint.to_json().unwrap()).unwrap();
    let (second, lines) = execute(ticker_plugin(), Some(6.0), Some(checkpoint)).unwrap();
    split_lines.extend(lines);

    assert_eq!(split_lines, full_lines);
    assert_eq!(full_lines.len(), 6);
    assert_eq!(full_lines[0], "tick 1 at 1");
    assert_eq!(full_lines[5], "tick 6 at 6");

    let full_state = full.state.unwrap();
    let resumed_state = second.state.unwrap();
    assert_eq!(resumed_state, full_state);
    assert_eq!(
        resumed_state.fingerprint().unwrap(),
        full_state.fingerprint().unwrap()
    );
    assert_eq!(full_state.plan_queue_datas().len(), 1);
    assert_eq!(full_state.plan_queue_datas()[0].arrival_id(), 6);
    assert_eq!(full_state.planning_queue_arrival_id(), 7);
}

#[test]
fn test_restored_plans_keep_schedule_metadata() {
    let (first, lines) = execute(warehouse_plugin(), Some(2.0), None).unwrap();
    assert_eq!(lines, vec!["pending 10 false 0"]);
    let checkpoint = first.state.unwrap();
    let data = &checkpoint.plan_queue_datas()[0];
    assert_eq!(data.key(), Some(&PlanKey::new("restock")));
    assert!(!data.is_active());
    assert_eq!(data.planner(), Planner::DataManager);

    let (second, lines) = execute(warehouse_plugin(), Some(5.0), Some(checkpoint.clone())).unwrap();
    assert_eq!(lines, vec!["pending 10 false 0"]);
    assert_eq!(second.state.unwrap().plan_queue_datas(), checkpoint.plan_queue_datas());

    let (_, lines) = execute(warehouse_plugin(), Some(20.0), Some(checkpoint)).unwrap();
    assert_eq!(lines, vec!["restocking shelf 3 at 10", "nothing pending"]);
}

#[test]
fn test_restored_plans_run_before_new_plans_at_same_time() {
    let state = SimulationState::builder()
        .start_time(1.0)
        .planning_queue_arrival_id(10)
        .add_plan_queue_data(tick_data(2.0, 100, 9))
        .build()
        .unwrap();

    let plugin = Plugin::builder()
        .set_plugin_id("mixed")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor: &ActorContext| {
                actor.set_plan_data_converter(|tick: Tick| {
                    move |ctx: &ActorContext| -> NucleusResult<()> {
                        say(ctx, format!("restored {}", tick.n));
                        Ok(())
                    }
                })?;
                actor.add_plan(
                    Plan::builder()
                        .time(2.0)
                        .callback(|ctx: &ActorContext| {
                            say(ctx, "fresh");
                            Ok(())
                        })
                        .build()?,
                )
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let (result, lines) = execute(plugin, None, Some(state)).unwrap();
    assert_eq!(lines, vec!["restored 100", "fresh"]);
    assert_eq!(result.state.unwrap().planning_queue_arrival_id(), 11);
}

#[test]
fn test_missing_converter_aborts_resume() {
    let state = SimulationState::builder()
        .planning_queue_arrival_id(1)
        .add_plan_queue_data(
            PlanQueueData::builder()
                .time(1.0)
                .plan_data(PlanData::from_raw("mystery", serde_json::Value::Null))
                .arrival_id(0)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let err = execute(ticker_plugin(), None, Some(state)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingPlanDataConverter);
}

#[test]
fn test_undecodable_plan_data_aborts_resume() {
    let state = SimulationState::builder()
        .planning_queue_arrival_id(1)
        .add_plan_queue_data(
            PlanQueueData::builder()
                .time(1.0)
                .plan_data(PlanData::from_raw("tick", serde_json::json!({ "n": "one" })))
                .arrival_id(0)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let err = execute(ticker_plugin(), None, Some(state)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlanDataSerialization);
}

// ============================================================================
// Capture
// ============================================================================

#[test]
fn test_plans_without_data_are_counted() {
    let plugin = Plugin::builder()
        .set_plugin_id("mixed")
        .set_initializer(|ctx| {
            ctx.add_actor(|actor: &ActorContext| {
                actor.set_plan_data_converter(|tick: Tick| {
                    move |ctx: &ActorContext| run_tick(ctx, tick.n)
                })?;
                actor.add_plan(tick_plan(5.0, 1))?;
                for time in [6.0, 7.0] {
                    actor.add_plan(
                        Plan::builder()
                            .time(time)
                            .callback(|_: &ActorContext| Ok(()))
                            .build()?,
                    )?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .build()
        .unwrap();

    let (result, lines) = execute(plugin, Some(1.0), None).unwrap();
    assert!(lines.is_empty());
    assert_eq!(result.unrecorded_plans, 2);
    let state = result.state.unwrap();
    assert_eq!(state.plan_queue_datas().len(), 1);
    assert_eq!(state.plan_queue_datas()[0].time(), 5.0);
    assert_eq!(state.planning_queue_arrival_id(), 3);
}

#[test]
fn test_record_state_disabled() {
    let mut simulation = Simulation::builder()
        .add_plugin(ticker_plugin())
        .set_halt_time(2.0)
        .set_record_state(false)
        .build()
        .unwrap();
    let result = simulation.execute().unwrap();
    assert!(result.state.is_none());
    assert_eq!(result.unrecorded_plans, 0);
    assert_eq!(result.plans_executed, 2);
}

// ============================================================================
// Validation and Wire Format
// ============================================================================

#[test]
fn test_checkpoint_wire_format() {
    let state = SimulationState::builder()
        .start_time(2.0)
        .planning_queue_arrival_id(4)
        .add_plan_queue_data(tick_data(3.0, 7, 2))
        .build()
        .unwrap();

    let value: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
    assert_eq!(value["start_time"], 2.0);
    assert_eq!(value["base_date"], "2023-01-01");
    assert_eq!(value["planning_queue_arrival_id"], 4);

    let plan = &value["plan_queue_datas"][0];
    assert_eq!(plan["time"], 3.0);
    assert_eq!(plan["active"], true);
    assert_eq!(plan["planner"], 1);
    assert_eq!(plan["planner_id"], 0);
    assert_eq!(plan["arrival_id"], 2);
    assert_eq!(plan["plan_data"]["kind"], "tick");
    assert_eq!(plan["plan_data"]["payload"]["n"], 7);
    assert!(plan.get("key").is_none());
}

#[test]
fn test_empty_checkpoint_uses_defaults() {
    let state = SimulationState::from_json("{}").unwrap();
    assert_eq!(state, SimulationState::default());
    assert_eq!(state.base_date().to_string(), "2023-01-01");
}

#[test]
fn test_invalid_checkpoints_rejected() {
    let plan = |time: f64, arrival: u64| {
        format!(
            r#"{{"time": {}, "active": true, "plan_data": {{"kind": "tick", "payload": {{"n": 1}}}},
                "planner": 1, "planner_id": 0, "arrival_id": {}}}"#,
            time, arrival
        )
    };
    let state = |start: f64, next: u64, plans: Vec<String>| {
        format!(
            r#"{{"start_time": {}, "planning_queue_arrival_id": {}, "plan_queue_datas": [{}]}}"#,
            start,
            next,
            plans.join(",")
        )
    };

    let cases = [
        (state(5.0, 2, vec![plan(4.0, 0)]), ErrorKind::PlanningQueueTime),
        (state(0.0, 1, vec![plan(1.0, 1)]), ErrorKind::PlanningQueueArrivalInvalid),
        (
            state(0.0, 5, vec![plan(1.0, 3), plan(2.0, 3)]),
            ErrorKind::PlanningQueueArrivalInvalid,
        ),
        ("{".to_string(), ErrorKind::PlanDataSerialization),
    ];
    for (json, expected) in cases {
        let err = SimulationState::from_json(&json).unwrap_err();
        assert_eq!(err.kind(), expected, "checkpoint: {}", json);
    }

    assert!(SimulationState::from_json(&state(0.0, 2, vec![plan(1.0, 0), plan(1.0, 1)])).is_ok());
}

#[test]
fn test_invalid_seed_state_fails_at_build() {
    let err = SimulationState::builder()
        .planning_queue_arrival_id(0)
        .add_plan_queue_data(tick_data(1.0, 1, 0))
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlanningQueueArrivalInvalid);

    let err = PlanQueueData::builder().time(1.0).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullPlanData);
}

#[test]
fn test_fingerprint_tracks_content() {
    let build = |arrival_id: u64| {
        SimulationState::builder()
            .start_time(1.0)
            .planning_queue_arrival_id(5)
            .add_plan_queue_data(tick_data(2.0, 1, arrival_id))
            .build()
            .unwrap()
    };

    let a = build(1).fingerprint().unwrap();
    let b = build(1).fingerprint().unwrap();
    let c = build(2).fingerprint().unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
}
