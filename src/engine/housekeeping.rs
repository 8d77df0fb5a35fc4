use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{invalid_transition, require_manager};
use super::{Engine, EngineError};

fn advance_action(to: HousekeepingStatus) -> &'static str {
    match to {
        HousekeepingStatus::Clean => "mark clean",
        HousekeepingStatus::Dirty => "mark dirty",
        HousekeepingStatus::Cleaning => "start cleaning",
        HousekeepingStatus::Inspection => "send to inspection",
        HousekeepingStatus::Maintenance => "send to maintenance",
    }
}

fn find_task<'a>(st: &'a UnitState, id: &Ulid) -> Result<&'a HousekeepingTask, EngineError> {
    st.task(id).ok_or(EngineError::NotFound(*id))
}

impl Engine {
    /// Move a unit along one permitted housekeeping edge.
    pub async fn advance_housekeeping(
        &self,
        unit_id: Ulid,
        to: HousekeepingStatus,
        actor: &Actor,
    ) -> Result<Unit, EngineError> {
        let mut guard = self.write_unit(unit_id).await?;
        let from = guard.unit.housekeeping;
        let action = advance_action(to);
        let clearance = from
            .clearance_to(to)
            .ok_or_else(|| invalid_transition("housekeeping", unit_id, from.as_str(), action))?;
        if !actor.has(clearance) {
            return Err(EngineError::Forbidden {
                actor: actor.name.clone(),
                action,
            });
        }
        let event = Event::HousekeepingChanged {
            unit_id,
            to,
            cause: HousekeepingCause::Advance,
            by: Some(actor.name.clone()),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(guard.unit.clone())
    }

    /// Operator override straight to Clean, recorded as a forced clean.
    pub async fn force_clean(&self, unit_id: Ulid, actor: &Actor) -> Result<Unit, EngineError> {
        require_manager(actor, "force clean")?;
        let mut guard = self.write_unit(unit_id).await?;
        if guard.unit.housekeeping == HousekeepingStatus::Clean {
            return Err(invalid_transition("housekeeping", unit_id, "clean", "force clean"));
        }
        let event = Event::HousekeepingChanged {
            unit_id,
            to: HousekeepingStatus::Clean,
            cause: HousekeepingCause::ForcedClean,
            by: Some(actor.name.clone()),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(guard.unit.clone())
    }

    pub async fn create_task(
        &self,
        id: Ulid,
        unit_id: Ulid,
        kind: TaskKind,
        priority: TaskPriority,
        actor: &Actor,
    ) -> Result<HousekeepingTask, EngineError> {
        if kind == TaskKind::Maintenance {
            require_manager(actor, "open maintenance tasks")?;
        }
        let mut guard = self.write_unit(unit_id).await?;
        if self.entity_to_unit.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.tasks.len() >= MAX_TASKS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many tasks on unit"));
        }
        let task = HousekeepingTask {
            id,
            unit_id,
            kind,
            status: TaskStatus::Pending,
            priority,
            created_at: self.clock.now_ms(),
            started_at: None,
            completed_at: None,
            completed_by: None,
        };
        let event = Event::TaskCreated {
            task: task.clone(),
            by: Some(actor.name.clone()),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(task)
    }

    pub async fn start_task(&self, id: Ulid, actor: &Actor) -> Result<HousekeepingTask, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let task = find_task(&guard, &id)?;
        if task.status != TaskStatus::Pending {
            return Err(invalid_transition("housekeeping task", id, task.status.as_str(), "start"));
        }
        let event = Event::TaskStarted {
            id,
            unit_id,
            by: actor.name.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_task(&guard, &id)?.clone())
    }

    /// Finish a task. Completing cleaning or inspection work leaves the unit
    /// Clean unless it is under maintenance; only a manager closes maintenance.
    pub async fn complete_task(&self, id: Ulid, actor: &Actor) -> Result<HousekeepingTask, EngineError> {
        let (unit_id, mut guard) = self.resolve_entity_write(&id).await?;
        let task = find_task(&guard, &id)?;
        if task.status == TaskStatus::Done {
            return Err(invalid_transition("housekeeping task", id, "done", "complete"));
        }
        if task.kind == TaskKind::Maintenance {
            require_manager(actor, "close maintenance tasks")?;
        }
        let event = Event::TaskCompleted {
            id,
            unit_id,
            by: actor.name.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(unit_id, &mut guard, &event).await?;
        Ok(find_task(&guard, &id)?.clone())
    }
}
