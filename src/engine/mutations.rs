use tracing::debug;

use crate::model::*;

use super::containment::{check_fits_parent, check_still_contains};
use super::{Engine, EngineError, conflict, now};

impl Engine {
    // ── Periods ──────────────────────────────────────────────

    pub async fn create_period(&self, fields: PeriodFields) -> Result<PeriodInfo, EngineError> {
        let row = self.store.insert_period(fields, now()).await?;
        debug!(id = row.id, "period created");
        Ok(row.info())
    }

    /// Replace a period's name and interval. The new interval must still
    /// contain every existing period lane that has one; the first lane that
    /// falls outside aborts the update and nothing is written.
    pub async fn update_period(
        &self,
        id: Id,
        fields: PeriodFields,
    ) -> Result<PeriodInfo, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        if let Some(new_span) = Span::from_bounds(fields.start, fields.end) {
            for child in self.store.period_lanes_of(id) {
                if let Some(child_span) = child.span() {
                    check_still_contains(
                        &new_span,
                        Entity::Period,
                        &child_span,
                        Entity::PeriodLane,
                        &child.lane_name,
                    )?;
                }
            }
        }
        let row = self.store.update_period(id, fields, now()).await?;
        debug!(id, "period updated");
        Ok(row.info())
    }

    pub async fn delete_period(&self, id: Id) -> Result<Id, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        let id = self.store.delete_period(id).await?;
        debug!(id, "period deleted");
        Ok(id)
    }

    // ── Reference data ───────────────────────────────────────

    pub async fn create_lane(&self, name: String) -> Result<LaneInfo, EngineError> {
        let row = self.store.insert_lane(name, now()).await?;
        debug!(id = row.id, "lane created");
        Ok(LaneInfo {
            id: row.id,
            name: row.name,
        })
    }

    pub async fn update_lane(&self, id: Id, name: String) -> Result<LaneInfo, EngineError> {
        let row = self.store.update_lane(id, name, now()).await?;
        Ok(LaneInfo {
            id: row.id,
            name: row.name,
        })
    }

    pub async fn delete_lane(&self, id: Id) -> Result<Id, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        Ok(self.store.delete_lane(id).await?)
    }

    pub async fn create_stage(&self, name: String) -> Result<StageInfo, EngineError> {
        let row = self.store.insert_stage(name, now()).await?;
        debug!(id = row.id, "stage created");
        Ok(StageInfo {
            id: row.id,
            name: row.name,
        })
    }

    pub async fn update_stage(&self, id: Id, name: String) -> Result<StageInfo, EngineError> {
        let row = self.store.update_stage(id, name, now()).await?;
        Ok(StageInfo {
            id: row.id,
            name: row.name,
        })
    }

    pub async fn delete_stage(&self, id: Id) -> Result<Id, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        Ok(self.store.delete_stage(id).await?)
    }

    // ── Period lanes ─────────────────────────────────────────

    pub async fn create_period_lane(
        &self,
        fields: PeriodLaneFields,
    ) -> Result<PeriodLaneInfo, EngineError> {
        let _hierarchy = self.hierarchy.read().await;
        let period = self
            .store
            .period(fields.period_id)
            .ok_or(EngineError::NotFound(Entity::Period, fields.period_id))?;
        let parent = period.span().ok_or(EngineError::InvalidPeriod(period.id))?;
        if let Some(child) = Span::from_bounds(fields.start, fields.end) {
            check_fits_parent(&parent, Entity::Period, &child, Entity::PeriodLane)?;
        }

        let row = self
            .store
            .insert_period_lane(fields, now())
            .await
            .map_err(conflict::on_period_lane)?;
        debug!(id = row.id, period_id = row.period_id, "period lane created");
        Ok(self.store.period_lane_info(&row))
    }

    /// Change a period lane's lane, interval and ranking method. The interval
    /// is checked up against the owning period and down against every
    /// schedule already under this lane.
    pub async fn update_period_lane(
        &self,
        id: Id,
        patch: PeriodLanePatch,
    ) -> Result<PeriodLaneInfo, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        let existing = self
            .store
            .period_lane_detail(id)
            .ok_or(EngineError::NotFound(Entity::PeriodLane, id))?;
        let parent = Span::from_bounds(existing.period.start, existing.period.end)
            .ok_or(EngineError::InvalidPeriod(existing.period.id))?;

        if let Some(new_span) = Span::from_bounds(patch.start, patch.end) {
            check_fits_parent(&parent, Entity::Period, &new_span, Entity::PeriodLane)?;
            for schedule in self.store.schedules_of(id) {
                if let Some(child_span) = schedule.span() {
                    check_still_contains(
                        &new_span,
                        Entity::PeriodLane,
                        &child_span,
                        Entity::Schedule,
                        &schedule.stage_name,
                    )?;
                }
            }
        }

        let row = self
            .store
            .update_period_lane(id, patch, now())
            .await
            .map_err(conflict::on_period_lane)?;
        debug!(id, "period lane updated");
        Ok(self.store.period_lane_info(&row))
    }

    pub async fn delete_period_lane(&self, id: Id) -> Result<Id, EngineError> {
        let _hierarchy = self.hierarchy.write().await;
        Ok(self.store.delete_period_lane(id).await?)
    }

    // ── Schedules ────────────────────────────────────────────

    pub async fn create_schedule(
        &self,
        fields: ScheduleFields,
    ) -> Result<ScheduleInfo, EngineError> {
        let _hierarchy = self.hierarchy.read().await;
        let parent_row = self
            .store
            .period_lane(fields.period_lane_id)
            .ok_or(EngineError::NotFound(Entity::PeriodLane, fields.period_lane_id))?;
        let parent = parent_row
            .span()
            .ok_or(EngineError::InvalidParent(parent_row.id))?;
        if let Some(child) = Span::from_bounds(fields.start, fields.end) {
            check_fits_parent(&parent, Entity::PeriodLane, &child, Entity::Schedule)?;
        }

        let row = self
            .store
            .insert_schedule(fields, now())
            .await
            .map_err(conflict::on_schedule)?;
        debug!(id = row.id, period_lane_id = row.period_lane_id, "schedule created");
        Ok(self.store.schedule_info(&row))
    }

    /// Data update. The target period lane must exist and have an interval,
    /// and the new interval must fit inside it, whether or not the schedule
    /// moves.
    pub async fn update_schedule(
        &self,
        id: Id,
        patch: SchedulePatch,
    ) -> Result<ScheduleInfo, EngineError> {
        let _hierarchy = self.hierarchy.read().await;
        if self.store.schedule(id).is_none() {
            return Err(EngineError::NotFound(Entity::Schedule, id));
        }
        let parent_row = self
            .store
            .period_lane(patch.period_lane_id)
            .ok_or(EngineError::NotFound(Entity::PeriodLane, patch.period_lane_id))?;
        let parent = parent_row
            .span()
            .ok_or(EngineError::InvalidParent(parent_row.id))?;
        check_fits_parent(&parent, Entity::PeriodLane, &patch.span, Entity::Schedule)?;

        let row = self
            .store
            .update_schedule(id, patch, now())
            .await
            .map_err(conflict::on_schedule)?;
        debug!(id, "schedule updated");
        Ok(self.store.schedule_info(&row))
    }

    /// Status-only update. Never looks at intervals.
    pub async fn set_schedule_closed(
        &self,
        id: Id,
        is_closed: bool,
    ) -> Result<ScheduleInfo, EngineError> {
        let row = self.store.set_schedule_closed(id, is_closed, now()).await?;
        debug!(id, is_closed, "schedule status set");
        Ok(self.store.schedule_info(&row))
    }

    pub async fn delete_schedule(&self, id: Id) -> Result<Id, EngineError> {
        Ok(self.store.delete_schedule(id).await?)
    }
}
