use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Row identifier. Assigned by the store, starts at 1, never reused.
pub type Id = u64;

/// UTC instant, the only time type.
pub type Instant = DateTime<Utc>;

/// Render an instant the way every response carries it: `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn format_instant(t: &Instant) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Closed interval `[start, end]`. Equal boundaries are inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn new(start: Instant, end: Instant) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Build a span from nullable stored bounds. `None` if either bound is missing.
    pub fn from_bounds(start: Option<Instant>, end: Option<Instant>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(Self { start, end }),
            _ => None,
        }
    }
}

/// How candidates are ordered within a period lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RankingMethod {
    StraightLineDistance,
    RouteDistance,
}

impl RankingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMethod::StraightLineDistance => "STRAIGHT_LINE_DISTANCE",
            RankingMethod::RouteDistance => "ROUTE_DISTANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRAIGHT_LINE_DISTANCE" => Some(RankingMethod::StraightLineDistance),
            "ROUTE_DISTANCE" => Some(RankingMethod::RouteDistance),
            _ => None,
        }
    }
}

/// The kinds of rows the system keeps. Used for error reporting and id sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Entity {
    Period,
    Lane,
    Stage,
    PeriodLane,
    Schedule,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Period,
        Entity::Lane,
        Entity::Stage,
        Entity::PeriodLane,
        Entity::Schedule,
    ];

    /// Human-readable name used in messages.
    pub fn label(&self) -> &'static str {
        match self {
            Entity::Period => "period",
            Entity::Lane => "lane",
            Entity::Stage => "stage",
            Entity::PeriodLane => "period lane",
            Entity::Schedule => "schedule",
        }
    }

    /// Short name used as a metrics label.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Entity::Period => "period",
            Entity::Lane => "lane",
            Entity::Stage => "stage",
            Entity::PeriodLane => "period_lane",
            Entity::Schedule => "schedule",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Stored rows ──────────────────────────────────────────────────
//
// Time bounds are nullable on every row: historical data may lack them and
// readers must not assume otherwise.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRow {
    pub id: Id,
    pub name: String,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub created_at: Option<Instant>,
    pub updated_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneRow {
    pub id: Id,
    pub name: String,
    pub created_at: Option<Instant>,
    pub updated_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRow {
    pub id: Id,
    pub name: String,
    pub created_at: Option<Instant>,
    pub updated_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLaneRow {
    pub id: Id,
    pub period_id: Id,
    pub lane_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub ranking_method: Option<RankingMethod>,
    pub created_at: Option<Instant>,
    pub updated_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: Id,
    pub period_lane_id: Id,
    pub stage_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub is_closed: bool,
    pub created_at: Option<Instant>,
    pub updated_at: Option<Instant>,
}

impl PeriodRow {
    pub fn span(&self) -> Option<Span> {
        Span::from_bounds(self.start, self.end)
    }

    pub fn info(&self) -> PeriodInfo {
        PeriodInfo {
            id: self.id,
            name: self.name.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

impl PeriodLaneRow {
    pub fn span(&self) -> Option<Span> {
        Span::from_bounds(self.start, self.end)
    }

    pub fn key(&self) -> (Id, Id) {
        (self.period_id, self.lane_id)
    }
}

impl ScheduleRow {
    pub fn span(&self) -> Option<Span> {
        Span::from_bounds(self.start, self.end)
    }

    pub fn key(&self) -> (Id, Id) {
        (self.period_lane_id, self.stage_id)
    }
}

// ── Write inputs ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodFields {
    pub name: String,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

impl PeriodFields {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            start: Some(span.start),
            end: Some(span.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodLaneFields {
    pub period_id: Id,
    pub lane_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub ranking_method: Option<RankingMethod>,
}

/// Replacement values for an existing period lane. The owning period never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodLanePatch {
    pub lane_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    /// `None` keeps the stored method; `Some(None)` clears it.
    pub ranking_method: Option<Option<RankingMethod>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFields {
    pub period_lane_id: Id,
    pub stage_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

/// Full replacement of a schedule's data fields. `is_closed` is not part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePatch {
    pub period_lane_id: Id,
    pub stage_id: Id,
    pub span: Span,
}

/// One event per committed mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PeriodCreated(PeriodRow),
    PeriodUpdated(PeriodRow),
    PeriodDeleted { id: Id },
    LaneCreated(LaneRow),
    LaneUpdated(LaneRow),
    LaneDeleted { id: Id },
    StageCreated(StageRow),
    StageUpdated(StageRow),
    StageDeleted { id: Id },
    PeriodLaneCreated(PeriodLaneRow),
    PeriodLaneUpdated(PeriodLaneRow),
    PeriodLaneDeleted { id: Id },
    ScheduleCreated(ScheduleRow),
    ScheduleUpdated(ScheduleRow),
    ScheduleClosedSet {
        id: Id,
        is_closed: bool,
        updated_at: Instant,
    },
    ScheduleDeleted { id: Id },
    /// Written by compaction so ids of rows deleted before it are not handed out again.
    SequenceFloor { entity: Entity, next: Id },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodInfo {
    pub id: Id,
    pub name: String,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneInfo {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub id: Id,
    pub name: String,
}

/// Period lane with the lane name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodLaneInfo {
    pub id: Id,
    pub period_id: Id,
    pub lane_id: Id,
    pub lane_name: String,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub ranking_method: Option<RankingMethod>,
}

impl PeriodLaneInfo {
    pub fn span(&self) -> Option<Span> {
        Span::from_bounds(self.start, self.end)
    }
}

/// Period lane with its owning period resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodLaneDetail {
    pub id: Id,
    pub lane_id: Id,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
    pub ranking_method: Option<RankingMethod>,
    pub period: PeriodInfo,
}

/// Schedule with the stage name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleInfo {
    pub id: Id,
    pub period_lane_id: Id,
    pub stage_id: Id,
    pub stage_name: String,
    pub is_closed: bool,
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

impl ScheduleInfo {
    pub fn span(&self) -> Option<Span> {
        Span::from_bounds(self.start, self.end)
    }
}

/// One page of a paginated listing plus the metadata the caller echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}
