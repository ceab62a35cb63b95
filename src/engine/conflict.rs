use tracing::warn;

use crate::model::Entity;

use super::error::{EngineError, StoreError};

pub(crate) const PERIOD_LANE_EXISTS: &str = "period and lane combination already exists";
pub(crate) const SCHEDULE_EXISTS: &str = "stage already exists for this period lane";

/// Store errors on the period-lane write paths.
pub(super) fn on_period_lane(e: StoreError) -> EngineError {
    translate(e, Entity::PeriodLane, PERIOD_LANE_EXISTS)
}

/// Store errors on the schedule write paths.
pub(super) fn on_schedule(e: StoreError) -> EngineError {
    translate(e, Entity::Schedule, SCHEDULE_EXISTS)
}

/// Only `DuplicateKey` is rewritten. Anything else keeps its own meaning.
fn translate(e: StoreError, entity: Entity, message: &'static str) -> EngineError {
    match e {
        StoreError::DuplicateKey { index, key } => {
            warn!(index, ?key, "{entity} rejected: {message}");
            metrics::counter!(
                crate::observability::CONFLICTS_TOTAL,
                "entity" => entity.metric_label()
            )
            .increment(1);
            EngineError::Conflict(message)
        }
        other => other.into(),
    }
}
