use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::limits::*;
use crate::model::*;

use super::WalCommand;
use super::error::StoreError;

pub(super) const PERIOD_LANE_KEY: &str = "period_lanes_period_id_lane_id_key";
pub(super) const SCHEDULE_KEY: &str = "schedules_period_lane_id_stage_id_key";

/// One id sequence per table. Ids start at 1 and only move forward.
struct Sequences {
    period: AtomicU64,
    lane: AtomicU64,
    stage: AtomicU64,
    period_lane: AtomicU64,
    schedule: AtomicU64,
}

impl Sequences {
    fn new() -> Self {
        Self {
            period: AtomicU64::new(1),
            lane: AtomicU64::new(1),
            stage: AtomicU64::new(1),
            period_lane: AtomicU64::new(1),
            schedule: AtomicU64::new(1),
        }
    }

    fn of(&self, entity: Entity) -> &AtomicU64 {
        match entity {
            Entity::Period => &self.period,
            Entity::Lane => &self.lane,
            Entity::Stage => &self.stage,
            Entity::PeriodLane => &self.period_lane,
            Entity::Schedule => &self.schedule,
        }
    }

    fn next(&self, entity: Entity) -> Id {
        self.of(entity).fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure `next` never hands out an id at or below `id`.
    fn observe(&self, entity: Entity, id: Id) {
        self.of(entity).fetch_max(id + 1, Ordering::Relaxed);
    }

    fn peek(&self, entity: Entity) -> Id {
        self.of(entity).load(Ordering::Relaxed)
    }
}

/// In-memory tables made durable by the WAL.
///
/// Every mutation goes WAL first, memory second: `commit` waits for the
/// group-commit writer to fsync the event and only then applies it. Replay on
/// startup feeds the same events through [`Store::apply_event`].
pub struct Store {
    periods: DashMap<Id, PeriodRow>,
    lanes: DashMap<Id, LaneRow>,
    stages: DashMap<Id, StageRow>,
    period_lanes: DashMap<Id, PeriodLaneRow>,
    schedules: DashMap<Id, ScheduleRow>,
    /// Period → its period lanes.
    lanes_of_period: DashMap<Id, Vec<Id>>,
    /// Period lane → its schedules.
    schedules_of_lane: DashMap<Id, Vec<Id>>,
    /// Unique index on (period_id, lane_id).
    period_lane_keys: DashMap<(Id, Id), Id>,
    /// Unique index on (period_lane_id, stage_id).
    schedule_keys: DashMap<(Id, Id), Id>,
    sequences: Sequences,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared from WAL append until the event is applied; compaction takes
    /// it exclusively so its snapshot includes every acknowledged event.
    commit_gate: RwLock<()>,
}

fn add_child(index: &DashMap<Id, Vec<Id>>, parent: Id, child: Id) {
    let mut kids = index.entry(parent).or_default();
    if !kids.contains(&child) {
        kids.push(child);
    }
}

fn remove_child(index: &DashMap<Id, Vec<Id>>, parent: Id, child: Id) {
    if let Some(mut kids) = index.get_mut(&parent) {
        kids.retain(|c| *c != child);
    }
}

fn has_children(index: &DashMap<Id, Vec<Id>>, parent: Id) -> bool {
    index.get(&parent).is_some_and(|kids| !kids.is_empty())
}

/// Claim `key` for `id` in a unique index. The entry API makes the
/// check-and-claim a single step, so two racing writers cannot both win.
fn reserve(
    keys: &DashMap<(Id, Id), Id>,
    index: &'static str,
    key: (Id, Id),
    id: Id,
) -> Result<(), StoreError> {
    match keys.entry(key) {
        Entry::Occupied(e) if *e.get() != id => Err(StoreError::DuplicateKey { index, key }),
        Entry::Occupied(_) => Ok(()),
        Entry::Vacant(v) => {
            v.insert(id);
            Ok(())
        }
    }
}

fn release(keys: &DashMap<(Id, Id), Id>, key: (Id, Id), id: Id) {
    keys.remove_if(&key, |_, owner| *owner == id);
}

fn sorted<T>(mut rows: Vec<T>, id: impl Fn(&T) -> Id) -> Vec<T> {
    rows.sort_by_key(|r| id(r));
    rows
}

impl Store {
    pub(super) fn new(wal_tx: mpsc::Sender<WalCommand>) -> Self {
        Self {
            periods: DashMap::new(),
            lanes: DashMap::new(),
            stages: DashMap::new(),
            period_lanes: DashMap::new(),
            schedules: DashMap::new(),
            lanes_of_period: DashMap::new(),
            schedules_of_lane: DashMap::new(),
            period_lane_keys: DashMap::new(),
            schedule_keys: DashMap::new(),
            sequences: Sequences::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
        }
    }

    // ── WAL ──────────────────────────────────────────────────

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Durably append `event`, then apply it.
    async fn commit(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply_event(&event);
        Ok(())
    }

    /// Rewrite the WAL with just enough events to rebuild the current tables.
    pub(super) async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub(super) async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Parents before children, ids ascending, then the sequence floors.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        let periods = sorted(self.periods.iter().map(|e| e.value().clone()).collect(), |r: &PeriodRow| r.id);
        events.extend(periods.into_iter().map(Event::PeriodCreated));
        let lanes = sorted(self.lanes.iter().map(|e| e.value().clone()).collect(), |r: &LaneRow| r.id);
        events.extend(lanes.into_iter().map(Event::LaneCreated));
        let stages = sorted(self.stages.iter().map(|e| e.value().clone()).collect(), |r: &StageRow| r.id);
        events.extend(stages.into_iter().map(Event::StageCreated));
        let period_lanes = sorted(
            self.period_lanes.iter().map(|e| e.value().clone()).collect(),
            |r: &PeriodLaneRow| r.id,
        );
        events.extend(period_lanes.into_iter().map(Event::PeriodLaneCreated));
        let schedules = sorted(
            self.schedules.iter().map(|e| e.value().clone()).collect(),
            |r: &ScheduleRow| r.id,
        );
        events.extend(schedules.into_iter().map(Event::ScheduleCreated));
        for entity in Entity::ALL {
            events.push(Event::SequenceFloor {
                entity,
                next: self.sequences.peek(entity),
            });
        }
        events
    }

    // ── Event application ────────────────────────────────────

    pub(super) fn apply_event(&self, event: &Event) {
        match event {
            Event::PeriodCreated(row) | Event::PeriodUpdated(row) => {
                self.sequences.observe(Entity::Period, row.id);
                self.periods.insert(row.id, row.clone());
            }
            Event::PeriodDeleted { id } => {
                self.periods.remove(id);
                self.lanes_of_period.remove(id);
            }
            Event::LaneCreated(row) | Event::LaneUpdated(row) => {
                self.sequences.observe(Entity::Lane, row.id);
                self.lanes.insert(row.id, row.clone());
            }
            Event::LaneDeleted { id } => {
                self.lanes.remove(id);
            }
            Event::StageCreated(row) | Event::StageUpdated(row) => {
                self.sequences.observe(Entity::Stage, row.id);
                self.stages.insert(row.id, row.clone());
            }
            Event::StageDeleted { id } => {
                self.stages.remove(id);
            }
            Event::PeriodLaneCreated(row) | Event::PeriodLaneUpdated(row) => {
                self.sequences.observe(Entity::PeriodLane, row.id);
                if let Some(old) = self.period_lanes.insert(row.id, row.clone()) {
                    if old.key() != row.key() {
                        release(&self.period_lane_keys, old.key(), row.id);
                    }
                    if old.period_id != row.period_id {
                        remove_child(&self.lanes_of_period, old.period_id, row.id);
                    }
                }
                self.period_lane_keys.insert(row.key(), row.id);
                add_child(&self.lanes_of_period, row.period_id, row.id);
            }
            Event::PeriodLaneDeleted { id } => {
                if let Some((_, old)) = self.period_lanes.remove(id) {
                    release(&self.period_lane_keys, old.key(), *id);
                    remove_child(&self.lanes_of_period, old.period_id, *id);
                }
                self.schedules_of_lane.remove(id);
            }
            Event::ScheduleCreated(row) | Event::ScheduleUpdated(row) => {
                self.sequences.observe(Entity::Schedule, row.id);
                if let Some(old) = self.schedules.insert(row.id, row.clone()) {
                    if old.key() != row.key() {
                        release(&self.schedule_keys, old.key(), row.id);
                    }
                    if old.period_lane_id != row.period_lane_id {
                        remove_child(&self.schedules_of_lane, old.period_lane_id, row.id);
                    }
                }
                self.schedule_keys.insert(row.key(), row.id);
                add_child(&self.schedules_of_lane, row.period_lane_id, row.id);
            }
            Event::ScheduleClosedSet {
                id,
                is_closed,
                updated_at,
            } => {
                if let Some(mut row) = self.schedules.get_mut(id) {
                    row.is_closed = *is_closed;
                    row.updated_at = Some(*updated_at);
                }
            }
            Event::ScheduleDeleted { id } => {
                if let Some((_, old)) = self.schedules.remove(id) {
                    release(&self.schedule_keys, old.key(), *id);
                    remove_child(&self.schedules_of_lane, old.period_lane_id, *id);
                }
            }
            Event::SequenceFloor { entity, next } => {
                self.sequences.of(*entity).fetch_max(*next, Ordering::Relaxed);
            }
        }
    }

    // ── Periods ──────────────────────────────────────────────

    pub fn period(&self, id: Id) -> Option<PeriodRow> {
        self.periods.get(&id).map(|e| e.value().clone())
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    /// `limit` periods after skipping `skip`, ordered by id.
    pub fn periods_page(&self, skip: usize, limit: usize) -> Vec<PeriodInfo> {
        let all = sorted(
            self.periods.iter().map(|e| e.value().info()).collect(),
            |p: &PeriodInfo| p.id,
        );
        all.into_iter().skip(skip).take(limit).collect()
    }

    pub async fn insert_period(
        &self,
        fields: PeriodFields,
        now: Instant,
    ) -> Result<PeriodRow, StoreError> {
        if self.periods.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many periods"));
        }
        let row = PeriodRow {
            id: self.sequences.next(Entity::Period),
            name: fields.name,
            start: fields.start,
            end: fields.end,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.commit(Event::PeriodCreated(row.clone())).await?;
        Ok(row)
    }

    pub async fn update_period(
        &self,
        id: Id,
        fields: PeriodFields,
        now: Instant,
    ) -> Result<PeriodRow, StoreError> {
        let old = self
            .period(id)
            .ok_or(StoreError::NotFound(Entity::Period, id))?;
        let row = PeriodRow {
            id,
            name: fields.name,
            start: fields.start,
            end: fields.end,
            created_at: old.created_at,
            updated_at: Some(now),
        };
        self.commit(Event::PeriodUpdated(row.clone())).await?;
        Ok(row)
    }

    pub async fn delete_period(&self, id: Id) -> Result<Id, StoreError> {
        if !self.periods.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::Period, id));
        }
        if has_children(&self.lanes_of_period, id) {
            return Err(StoreError::HasDependents {
                entity: Entity::Period,
                id,
                dependent: Entity::PeriodLane,
            });
        }
        self.commit(Event::PeriodDeleted { id }).await?;
        Ok(id)
    }

    // ── Lanes ────────────────────────────────────────────────

    pub fn lane(&self, id: Id) -> Option<LaneRow> {
        self.lanes.get(&id).map(|e| e.value().clone())
    }

    pub fn lanes(&self) -> Vec<LaneInfo> {
        sorted(
            self.lanes
                .iter()
                .map(|e| LaneInfo {
                    id: e.id,
                    name: e.name.clone(),
                })
                .collect(),
            |l: &LaneInfo| l.id,
        )
    }

    pub async fn insert_lane(&self, name: String, now: Instant) -> Result<LaneRow, StoreError> {
        if self.lanes.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many lanes"));
        }
        let row = LaneRow {
            id: self.sequences.next(Entity::Lane),
            name,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.commit(Event::LaneCreated(row.clone())).await?;
        Ok(row)
    }

    pub async fn update_lane(
        &self,
        id: Id,
        name: String,
        now: Instant,
    ) -> Result<LaneRow, StoreError> {
        let old = self.lane(id).ok_or(StoreError::NotFound(Entity::Lane, id))?;
        let row = LaneRow {
            id,
            name,
            created_at: old.created_at,
            updated_at: Some(now),
        };
        self.commit(Event::LaneUpdated(row.clone())).await?;
        Ok(row)
    }

    pub async fn delete_lane(&self, id: Id) -> Result<Id, StoreError> {
        if !self.lanes.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::Lane, id));
        }
        if self.period_lanes.iter().any(|e| e.lane_id == id) {
            return Err(StoreError::HasDependents {
                entity: Entity::Lane,
                id,
                dependent: Entity::PeriodLane,
            });
        }
        self.commit(Event::LaneDeleted { id }).await?;
        Ok(id)
    }

    // ── Stages ───────────────────────────────────────────────

    pub fn stage(&self, id: Id) -> Option<StageRow> {
        self.stages.get(&id).map(|e| e.value().clone())
    }

    pub fn stages(&self) -> Vec<StageInfo> {
        sorted(
            self.stages
                .iter()
                .map(|e| StageInfo {
                    id: e.id,
                    name: e.name.clone(),
                })
                .collect(),
            |s: &StageInfo| s.id,
        )
    }

    pub async fn insert_stage(&self, name: String, now: Instant) -> Result<StageRow, StoreError> {
        if self.stages.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many stages"));
        }
        let row = StageRow {
            id: self.sequences.next(Entity::Stage),
            name,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.commit(Event::StageCreated(row.clone())).await?;
        Ok(row)
    }

    pub async fn update_stage(
        &self,
        id: Id,
        name: String,
        now: Instant,
    ) -> Result<StageRow, StoreError> {
        let old = self
            .stage(id)
            .ok_or(StoreError::NotFound(Entity::Stage, id))?;
        let row = StageRow {
            id,
            name,
            created_at: old.created_at,
            updated_at: Some(now),
        };
        self.commit(Event::StageUpdated(row.clone())).await?;
        Ok(row)
    }

    pub async fn delete_stage(&self, id: Id) -> Result<Id, StoreError> {
        if !self.stages.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::Stage, id));
        }
        if self.schedules.iter().any(|e| e.stage_id == id) {
            return Err(StoreError::HasDependents {
                entity: Entity::Stage,
                id,
                dependent: Entity::Schedule,
            });
        }
        self.commit(Event::StageDeleted { id }).await?;
        Ok(id)
    }

    // ── Period lanes ─────────────────────────────────────────

    pub fn period_lane(&self, id: Id) -> Option<PeriodLaneRow> {
        self.period_lanes.get(&id).map(|e| e.value().clone())
    }

    /// Resolve the lane name for a period lane row.
    pub fn period_lane_info(&self, row: &PeriodLaneRow) -> PeriodLaneInfo {
        let lane_name = self
            .lanes
            .get(&row.lane_id)
            .map(|l| l.name.clone())
            .unwrap_or_default();
        PeriodLaneInfo {
            id: row.id,
            period_id: row.period_id,
            lane_id: row.lane_id,
            lane_name,
            start: row.start,
            end: row.end,
            ranking_method: row.ranking_method,
        }
    }

    /// Period lane with its owning period resolved. `None` if either is gone.
    pub fn period_lane_detail(&self, id: Id) -> Option<PeriodLaneDetail> {
        let row = self.period_lane(id)?;
        let period = self.period(row.period_id)?.info();
        Some(PeriodLaneDetail {
            id: row.id,
            lane_id: row.lane_id,
            start: row.start,
            end: row.end,
            ranking_method: row.ranking_method,
            period,
        })
    }

    /// All period lanes of a period, lane names resolved, ordered by id.
    pub fn period_lanes_of(&self, period_id: Id) -> Vec<PeriodLaneInfo> {
        let ids = self
            .lanes_of_period
            .get(&period_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let rows: Vec<PeriodLaneRow> = ids.iter().filter_map(|id| self.period_lane(*id)).collect();
        sorted(
            rows.iter().map(|r| self.period_lane_info(r)).collect(),
            |p: &PeriodLaneInfo| p.id,
        )
    }

    pub async fn insert_period_lane(
        &self,
        fields: PeriodLaneFields,
        now: Instant,
    ) -> Result<PeriodLaneRow, StoreError> {
        if !self.periods.contains_key(&fields.period_id) {
            return Err(StoreError::MissingReference(Entity::Period, fields.period_id));
        }
        if !self.lanes.contains_key(&fields.lane_id) {
            return Err(StoreError::MissingReference(Entity::Lane, fields.lane_id));
        }
        if self.period_lanes.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many period lanes"));
        }
        let row = PeriodLaneRow {
            id: self.sequences.next(Entity::PeriodLane),
            period_id: fields.period_id,
            lane_id: fields.lane_id,
            start: fields.start,
            end: fields.end,
            ranking_method: fields.ranking_method,
            created_at: Some(now),
            updated_at: Some(now),
        };
        reserve(&self.period_lane_keys, PERIOD_LANE_KEY, row.key(), row.id)?;
        if let Err(e) = self.commit(Event::PeriodLaneCreated(row.clone())).await {
            release(&self.period_lane_keys, row.key(), row.id);
            return Err(e);
        }
        Ok(row)
    }

    pub async fn update_period_lane(
        &self,
        id: Id,
        patch: PeriodLanePatch,
        now: Instant,
    ) -> Result<PeriodLaneRow, StoreError> {
        let old = self
            .period_lane(id)
            .ok_or(StoreError::NotFound(Entity::PeriodLane, id))?;
        if !self.lanes.contains_key(&patch.lane_id) {
            return Err(StoreError::MissingReference(Entity::Lane, patch.lane_id));
        }
        let row = PeriodLaneRow {
            id,
            period_id: old.period_id,
            lane_id: patch.lane_id,
            start: patch.start,
            end: patch.end,
            ranking_method: patch.ranking_method.unwrap_or(old.ranking_method),
            created_at: old.created_at,
            updated_at: Some(now),
        };
        let key_moved = row.key() != old.key();
        if key_moved {
            reserve(&self.period_lane_keys, PERIOD_LANE_KEY, row.key(), id)?;
        }
        if let Err(e) = self.commit(Event::PeriodLaneUpdated(row.clone())).await {
            if key_moved {
                release(&self.period_lane_keys, row.key(), id);
            }
            return Err(e);
        }
        Ok(row)
    }

    pub async fn delete_period_lane(&self, id: Id) -> Result<Id, StoreError> {
        if !self.period_lanes.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::PeriodLane, id));
        }
        if has_children(&self.schedules_of_lane, id) {
            return Err(StoreError::HasDependents {
                entity: Entity::PeriodLane,
                id,
                dependent: Entity::Schedule,
            });
        }
        self.commit(Event::PeriodLaneDeleted { id }).await?;
        Ok(id)
    }

    // ── Schedules ────────────────────────────────────────────

    pub fn schedule(&self, id: Id) -> Option<ScheduleRow> {
        self.schedules.get(&id).map(|e| e.value().clone())
    }

    /// Resolve the stage name for a schedule row.
    pub fn schedule_info(&self, row: &ScheduleRow) -> ScheduleInfo {
        let stage_name = self
            .stages
            .get(&row.stage_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        ScheduleInfo {
            id: row.id,
            period_lane_id: row.period_lane_id,
            stage_id: row.stage_id,
            stage_name,
            is_closed: row.is_closed,
            start: row.start,
            end: row.end,
        }
    }

    /// All schedules of a period lane, stage names resolved, ordered by id.
    pub fn schedules_of(&self, period_lane_id: Id) -> Vec<ScheduleInfo> {
        let ids = self
            .schedules_of_lane
            .get(&period_lane_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let rows: Vec<ScheduleRow> = ids.iter().filter_map(|id| self.schedule(*id)).collect();
        sorted(
            rows.iter().map(|r| self.schedule_info(r)).collect(),
            |s: &ScheduleInfo| s.id,
        )
    }

    pub async fn insert_schedule(
        &self,
        fields: ScheduleFields,
        now: Instant,
    ) -> Result<ScheduleRow, StoreError> {
        if !self.period_lanes.contains_key(&fields.period_lane_id) {
            return Err(StoreError::MissingReference(
                Entity::PeriodLane,
                fields.period_lane_id,
            ));
        }
        if !self.stages.contains_key(&fields.stage_id) {
            return Err(StoreError::MissingReference(Entity::Stage, fields.stage_id));
        }
        if self.schedules.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many schedules"));
        }
        let row = ScheduleRow {
            id: self.sequences.next(Entity::Schedule),
            period_lane_id: fields.period_lane_id,
            stage_id: fields.stage_id,
            start: fields.start,
            end: fields.end,
            is_closed: false,
            created_at: Some(now),
            updated_at: Some(now),
        };
        reserve(&self.schedule_keys, SCHEDULE_KEY, row.key(), row.id)?;
        if let Err(e) = self.commit(Event::ScheduleCreated(row.clone())).await {
            release(&self.schedule_keys, row.key(), row.id);
            return Err(e);
        }
        Ok(row)
    }

    /// Replace the data fields of a schedule; `is_closed` is never touched here.
    pub async fn update_schedule(
        &self,
        id: Id,
        patch: SchedulePatch,
        now: Instant,
    ) -> Result<ScheduleRow, StoreError> {
        let old = self
            .schedule(id)
            .ok_or(StoreError::NotFound(Entity::Schedule, id))?;
        if !self.period_lanes.contains_key(&patch.period_lane_id) {
            return Err(StoreError::MissingReference(
                Entity::PeriodLane,
                patch.period_lane_id,
            ));
        }
        if !self.stages.contains_key(&patch.stage_id) {
            return Err(StoreError::MissingReference(Entity::Stage, patch.stage_id));
        }
        let row = ScheduleRow {
            id,
            period_lane_id: patch.period_lane_id,
            stage_id: patch.stage_id,
            start: Some(patch.span.start),
            end: Some(patch.span.end),
            is_closed: old.is_closed,
            created_at: old.created_at,
            updated_at: Some(now),
        };
        let key_moved = row.key() != old.key();
        if key_moved {
            reserve(&self.schedule_keys, SCHEDULE_KEY, row.key(), id)?;
        }
        if let Err(e) = self.commit(Event::ScheduleUpdated(row.clone())).await {
            if key_moved {
                release(&self.schedule_keys, row.key(), id);
            }
            return Err(e);
        }
        Ok(row)
    }

    pub async fn set_schedule_closed(
        &self,
        id: Id,
        is_closed: bool,
        now: Instant,
    ) -> Result<ScheduleRow, StoreError> {
        if !self.schedules.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::Schedule, id));
        }
        self.commit(Event::ScheduleClosedSet {
            id,
            is_closed,
            updated_at: now,
        })
        .await?;
        self.schedule(id)
            .ok_or(StoreError::NotFound(Entity::Schedule, id))
    }

    pub async fn delete_schedule(&self, id: Id) -> Result<Id, StoreError> {
        if !self.schedules.contains_key(&id) {
            return Err(StoreError::NotFound(Entity::Schedule, id));
        }
        self.commit(Event::ScheduleDeleted { id }).await?;
        Ok(id)
    }
}
