use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

// Reads never write and never log: repeated calls over unchanged
// storage return equal results.
impl Engine {
    /// One page of periods ordered by id. `page` counts from 1.
    pub fn list_periods(&self, page: usize, limit: usize) -> Result<Page<PeriodInfo>, EngineError> {
        if page == 0 {
            return Err(EngineError::LimitExceeded("page must be at least 1"));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(EngineError::LimitExceeded("page size out of range"));
        }
        let skip = (page - 1).saturating_mul(limit);
        Ok(Page {
            items: self.store.periods_page(skip, limit),
            total: self.store.period_count(),
            page,
            limit,
        })
    }

    pub fn get_period(&self, id: Id) -> Result<PeriodInfo, EngineError> {
        self.store
            .period(id)
            .map(|p| p.info())
            .ok_or(EngineError::NotFound(Entity::Period, id))
    }

    pub fn list_lanes(&self) -> Vec<LaneInfo> {
        self.store.lanes()
    }

    pub fn get_lane(&self, id: Id) -> Result<LaneInfo, EngineError> {
        self.store
            .lane(id)
            .map(|l| LaneInfo { id: l.id, name: l.name })
            .ok_or(EngineError::NotFound(Entity::Lane, id))
    }

    pub fn list_stages(&self) -> Vec<StageInfo> {
        self.store.stages()
    }

    pub fn get_stage(&self, id: Id) -> Result<StageInfo, EngineError> {
        self.store
            .stage(id)
            .map(|s| StageInfo { id: s.id, name: s.name })
            .ok_or(EngineError::NotFound(Entity::Stage, id))
    }

    /// Empty when the period has no lanes or does not exist.
    pub fn list_period_lanes(&self, period_id: Id) -> Vec<PeriodLaneInfo> {
        self.store.period_lanes_of(period_id)
    }

    pub fn get_period_lane(&self, id: Id) -> Result<PeriodLaneDetail, EngineError> {
        self.store
            .period_lane_detail(id)
            .ok_or(EngineError::NotFound(Entity::PeriodLane, id))
    }

    pub fn list_schedules(&self, period_lane_id: Id) -> Vec<ScheduleInfo> {
        self.store.schedules_of(period_lane_id)
    }

    pub fn get_schedule(&self, id: Id) -> Result<ScheduleInfo, EngineError> {
        self.store
            .schedule(id)
            .map(|s| self.store.schedule_info(&s))
            .ok_or(EngineError::NotFound(Entity::Schedule, id))
    }
}
