//! Checkpoint restore and capture
//!
//! Callbacks cannot be persisted. A checkpoint keeps each pending plan's
//! plan data and owner instead; on resume the owner's registered converter
//! turns the data back into a callback.
//!
//! # Critical Invariants
//!
//! 1. Restored plans keep their original time, key, active flag and arrival
//!    id, so the resumed run executes them in the order the original would
//! 2. A plan whose owner no longer exists, or whose plan data kind has no
//!    converter, aborts the resume
//! 3. The captured state starts at the final time and continues the arrival
//!    sequence where the run left off

use crate::error::{ContractError, ErrorKind, NucleusResult};
use crate::models::plan::PlanMeta;
use crate::models::plan_queue::PlanOwner;
use crate::models::state::{PlanQueueData, SimulationState};
use crate::orchestrator::shared::CoreHandle;
use tracing::warn;

/// Turn every checkpointed plan back into a queued plan
///
/// Runs after all components are initialized, when every converter has been
/// registered. Returns the number of restored plans.
pub(crate) fn restore_plans(core: &CoreHandle, state: &SimulationState) -> NucleusResult<usize> {
    for data in state.plan_queue_datas() {
        let owner = PlanOwner::from_parts(data.planner(), data.planner_id());
        if !core.owner_exists(owner) {
            return Err(ContractError::with_details(
                ErrorKind::UnknownPlanOwner,
                format!("{} owns the plan with arrival id {}", owner, data.arrival_id()),
            ));
        }

        let kind = data.plan_data().kind();
        let converter = core.plan_data_converter(owner, kind).ok_or_else(|| {
            ContractError::with_details(
                ErrorKind::MissingPlanDataConverter,
                format!("{} has no converter for plan data kind {}", owner, kind),
            )
        })?;
        let callback = converter(data.plan_data())?;

        let meta = PlanMeta {
            time: data.time(),
            active: data.is_active(),
            key: data.key().cloned(),
            plan_data: Some(data.plan_data().clone()),
        };
        core.restore_plan(owner, meta, data.arrival_id(), callback)?;
    }
    Ok(state.plan_queue_datas().len())
}

/// Capture the remaining schedule
///
/// Plans without plan data cannot be rebuilt on resume; they are left out
/// and counted. Returns the state and the number of plans left out.
pub(crate) fn capture_state(core: &CoreHandle) -> NucleusResult<(SimulationState, usize)> {
    let clock = core.clock();
    let mut builder = SimulationState::builder()
        .start_time(clock.current_time())
        .base_date(clock.base_date())
        .planning_queue_arrival_id(core.next_arrival_id());

    let mut unrecorded = 0;
    for plan in core.drain_plans() {
        let Some(plan_data) = plan.meta.plan_data else {
            unrecorded += 1;
            warn!(
                owner = %plan.owner,
                time = plan.meta.time,
                arrival_id = plan.arrival_id,
                "pending plan has no plan data and is left out of the checkpoint"
            );
            continue;
        };
        let mut data = PlanQueueData::builder()
            .time(plan.meta.time)
            .active(plan.meta.active)
            .plan_data(plan_data)
            .planner(plan.owner.planner())
            .planner_id(plan.owner.planner_id())
            .arrival_id(plan.arrival_id);
        if let Some(key) = plan.meta.key {
            data = data.key(key);
        }
        builder = builder.add_plan_queue_data(data.build()?);
    }

    Ok((builder.build()?, unrecorded))
}
