use crate::model::{Entity, Span};

use super::error::{ContainmentContext, ContainmentError};

/// Closed-interval containment: `child` must lie within `parent`, equal
/// boundaries included. Start is checked before end, so a child that breaks
/// both bounds reports `StartTooEarly`.
pub fn check_contained(
    parent: &Span,
    child: &Span,
    ctx: ContainmentContext,
) -> Result<(), ContainmentError> {
    if child.start < parent.start {
        return Err(ContainmentError::StartTooEarly(ctx));
    }
    if child.end > parent.end {
        return Err(ContainmentError::EndTooLate(ctx));
    }
    Ok(())
}

/// Upward check: a new or changed child interval must fit its existing parent.
pub fn check_fits_parent(
    parent: &Span,
    parent_level: Entity,
    child: &Span,
    child_level: Entity,
) -> Result<(), ContainmentError> {
    check_contained(
        parent,
        child,
        ContainmentContext {
            parent: parent_level,
            child: child_level,
            child_name: None,
        },
    )
    .inspect_err(|e| record_violation(e, "upward"))
}

/// Downward check: a proposed parent interval must still contain an existing child.
pub fn check_still_contains(
    new_parent: &Span,
    parent_level: Entity,
    child: &Span,
    child_level: Entity,
    child_name: &str,
) -> Result<(), ContainmentError> {
    check_contained(
        new_parent,
        child,
        ContainmentContext {
            parent: parent_level,
            child: child_level,
            child_name: Some(child_name.to_owned()),
        },
    )
    .inspect_err(|e| record_violation(e, "cascade"))
}

fn record_violation(e: &ContainmentError, direction: &'static str) {
    let level = e.context().child.metric_label();
    tracing::warn!(direction, level, "containment violation: {e}");
    metrics::counter!(crate::observability::CONTAINMENT_VIOLATIONS_TOTAL, "level" => level)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn span(from: (i32, u32, u32), to: (i32, u32, u32)) -> Span {
        Span::new(
            Utc.with_ymd_and_hms(from.0, from.1, from.2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(to.0, to.1, to.2, 0, 0, 0).unwrap(),
        )
    }

    fn year_2024() -> Span {
        span((2024, 1, 1), (2024, 12, 31))
    }

    fn fits(child: &Span) -> Result<(), ContainmentError> {
        check_fits_parent(&year_2024(), Entity::Period, child, Entity::PeriodLane)
    }

    #[test]
    fn interval_contains_itself() {
        let s = year_2024();
        assert_eq!(fits(&s), Ok(()));
        let instant = span((2024, 5, 5), (2024, 5, 5));
        assert_eq!(
            check_fits_parent(&instant, Entity::PeriodLane, &instant, Entity::Schedule),
            Ok(())
        );
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(fits(&span((2024, 1, 1), (2024, 6, 1))), Ok(()));
        assert_eq!(fits(&span((2024, 6, 1), (2024, 12, 31))), Ok(()));
    }

    #[test]
    fn start_before_parent_start() {
        let r = fits(&span((2023, 12, 31), (2024, 6, 1)));
        assert!(matches!(r, Err(ContainmentError::StartTooEarly(_))));
    }

    #[test]
    fn end_after_parent_end() {
        let r = fits(&span((2024, 6, 1), (2025, 1, 1)));
        assert!(matches!(r, Err(ContainmentError::EndTooLate(_))));
    }

    #[test]
    fn start_wins_when_both_bounds_break() {
        let r = fits(&span((2023, 6, 1), (2025, 6, 1)));
        assert!(matches!(r, Err(ContainmentError::StartTooEarly(_))));
    }

    #[test]
    fn cascade_check_carries_child_name() {
        let narrowed = span((2024, 3, 1), (2024, 12, 31));
        let existing = span((2024, 2, 1), (2024, 11, 30));
        let err = check_still_contains(
            &narrowed,
            Entity::Period,
            &existing,
            Entity::PeriodLane,
            "Zonasi",
        )
        .unwrap_err();
        assert_eq!(err.context().child_name.as_deref(), Some("Zonasi"));
        assert!(matches!(err, ContainmentError::StartTooEarly(_)));

        let widened = span((2023, 12, 1), (2025, 1, 1));
        assert_eq!(
            check_still_contains(&widened, Entity::Period, &existing, Entity::PeriodLane, "Zonasi"),
            Ok(())
        );
    }
}
