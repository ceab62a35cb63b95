use crate::model::{Entity, Id};

/// Which side of the interval broke containment, and who was involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentContext {
    pub parent: Entity,
    pub child: Entity,
    /// Display name of an existing child that a new parent interval no longer
    /// contains. `None` for upward checks, where the child is the new row.
    pub child_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainmentError {
    StartTooEarly(ContainmentContext),
    EndTooLate(ContainmentContext),
}

impl ContainmentError {
    pub fn context(&self) -> &ContainmentContext {
        match self {
            ContainmentError::StartTooEarly(ctx) | ContainmentError::EndTooLate(ctx) => ctx,
        }
    }

    fn bound(&self) -> &'static str {
        match self {
            ContainmentError::StartTooEarly(_) => "start",
            ContainmentError::EndTooLate(_) => "end",
        }
    }

    fn relation(&self) -> &'static str {
        match self {
            ContainmentError::StartTooEarly(_) => "earlier",
            ContainmentError::EndTooLate(_) => "later",
        }
    }
}

impl std::fmt::Display for ContainmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ctx = self.context();
        match &ctx.child_name {
            None => write!(
                f,
                "{} time range must lie within {}: {} is {} than {} {}",
                ctx.child,
                ctx.parent,
                self.bound(),
                self.relation(),
                ctx.parent,
                self.bound()
            ),
            Some(name) => write!(
                f,
                "{} of {} {} is {} than the new {} {}",
                self.bound(),
                ctx.child,
                name,
                self.relation(),
                ctx.parent,
                self.bound()
            ),
        }
    }
}

impl std::error::Error for ContainmentError {}

/// Failures reported by the entity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Entity, Id),
    /// A composite unique index already holds this key.
    DuplicateKey { index: &'static str, key: (Id, Id) },
    /// A foreign id points at a row that does not exist.
    MissingReference(Entity, Id),
    /// The row is still referenced by rows of `dependent`.
    HasDependents { entity: Entity, id: Id, dependent: Entity },
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(entity, id) => write!(f, "{entity} {id} not found"),
            StoreError::DuplicateKey { index, key } => {
                write!(f, "duplicate key ({}, {}) in {index}", key.0, key.1)
            }
            StoreError::MissingReference(entity, id) => {
                write!(f, "referenced {entity} {id} does not exist")
            }
            StoreError::HasDependents {
                entity,
                id,
                dependent,
            } => write!(f, "cannot delete {entity} {id}: it still has {dependent} rows"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The error every workflow returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Entity, Id),
    /// The period exists but its own interval is missing.
    InvalidPeriod(Id),
    /// The parent period lane exists but its own interval is missing.
    InvalidParent(Id),
    Containment(ContainmentError),
    Conflict(&'static str),
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} {id} not found"),
            EngineError::InvalidPeriod(_) => {
                write!(f, "period must have valid start and end times")
            }
            EngineError::InvalidParent(_) => {
                write!(f, "period lane must have valid start and end times")
            }
            EngineError::Containment(e) => write!(f, "{e}"),
            EngineError::Conflict(msg) => f.write_str(msg),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ContainmentError> for EngineError {
    fn from(e: ContainmentError) -> Self {
        EngineError::Containment(e)
    }
}

/// Absent rows are a domain `NotFound` whether the store was asked for the
/// row itself or found a dangling reference. Everything else stays opaque.
impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(entity, id) | StoreError::MissingReference(entity, id) => {
                EngineError::NotFound(entity, id)
            }
            other => EngineError::Store(other),
        }
    }
}

/// Transport-independent classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Containment,
    Conflict,
    HasDependents,
    LimitExceeded,
    Internal,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState | ErrorKind::Containment | ErrorKind::LimitExceeded => 400,
            ErrorKind::Conflict | ErrorKind::HasDependents => 409,
            ErrorKind::Internal => 500,
        }
    }

    pub fn sqlstate(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "P0002",
            ErrorKind::InvalidState | ErrorKind::Containment => "23514",
            ErrorKind::Conflict => "23505",
            ErrorKind::HasDependents => "23503",
            ErrorKind::LimitExceeded => "54000",
            ErrorKind::Internal => "XX000",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::InvalidPeriod(_) | EngineError::InvalidParent(_) => ErrorKind::InvalidState,
            EngineError::Containment(_) => ErrorKind::Containment,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::Store(StoreError::NotFound(..))
            | EngineError::Store(StoreError::MissingReference(..)) => ErrorKind::NotFound,
            EngineError::Store(StoreError::DuplicateKey { .. }) => ErrorKind::Conflict,
            EngineError::Store(StoreError::HasDependents { .. }) => ErrorKind::HasDependents,
            EngineError::Store(StoreError::LimitExceeded(_)) => ErrorKind::LimitExceeded,
            EngineError::Store(StoreError::Wal(_)) => ErrorKind::Internal,
        }
    }
}
