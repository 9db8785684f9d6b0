//! Attention-score function for feed ordering and briefings.
//!
//! Pure and deterministic: `now` is injected so ordering and tests never
//! depend on the wall clock.

use super::models::Importance;
use chrono::{DateTime, Duration, Utc};

/// Score cap — the bonus can never push a card above this.
const MAX_SCORE: u8 = 100;

/// Compute the attention score for a card: importance base plus a due-date
/// proximity bonus, capped at 100.
///
/// No due date contributes no bonus, so the score never drops below the
/// importance base.
pub fn score(importance: Importance, due_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    let base = importance.base_score();
    let bonus = due_at.map_or(0, |due| proximity_bonus(due - now));
    (base + bonus).min(MAX_SCORE)
}

/// The step-function bonus for time remaining until the due date.
/// Exactly one bucket applies — the smallest matching threshold.
/// An overdue card falls in the `<2h` bucket.
fn proximity_bonus(remaining: Duration) -> u8 {
    let buckets = [
        (Duration::hours(2), 20),
        (Duration::hours(24), 15),
        (Duration::hours(48), 10),
        (Duration::days(7), 5),
    ];
    for (threshold, bonus) in buckets {
        if remaining < threshold {
            return bonus;
        }
    }
    0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        // Fixed reference instant — the function is pure in `now`
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_monotonic_in_importance_for_fixed_bucket() {
        let due = Some(now() + Duration::hours(30)); // <48h bucket for all
        let ordered = [
            Importance::Critical,
            Importance::Urgent,
            Importance::High,
            Importance::Medium,
            Importance::Low,
        ];
        for pair in ordered.windows(2) {
            assert!(
                score(pair[0], due, now()) > score(pair[1], due, now()),
                "{} should outscore {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_capped_at_100() {
        for importance in [
            Importance::Critical,
            Importance::Urgent,
            Importance::High,
            Importance::Medium,
            Importance::Low,
        ] {
            let s = score(importance, Some(now() + Duration::minutes(10)), now());
            assert!(s <= 100, "{importance} scored {s}");
        }
    }

    #[test]
    fn test_bonus_is_a_step_function() {
        let cases = [
            (Duration::minutes(30), 20),
            (Duration::hours(2) - Duration::seconds(1), 20),
            (Duration::hours(2), 15),
            (Duration::hours(20), 15),
            (Duration::hours(24), 10),
            (Duration::hours(47), 10),
            (Duration::hours(48), 5),
            (Duration::days(6), 5),
            (Duration::days(7), 0),
            (Duration::days(30), 0),
        ];
        for (remaining, expected) in cases {
            assert_eq!(
                proximity_bonus(remaining),
                expected,
                "remaining={remaining}"
            );
        }
    }

    #[test]
    fn test_overdue_counts_as_most_urgent_bucket() {
        let overdue = Some(now() - Duration::hours(3));
        assert_eq!(score(Importance::Medium, overdue, now()), 70);
    }

    #[test]
    fn test_medium_due_in_30_minutes_scores_70() {
        let due = Some(now() + Duration::minutes(30));
        assert_eq!(score(Importance::Medium, due, now()), 70);
    }

    #[test]
    fn test_critical_due_in_1_hour_caps_at_100() {
        let due = Some(now() + Duration::hours(1));
        assert_eq!(score(Importance::Critical, due, now()), 100);
    }

    #[test]
    fn test_high_due_in_20_hours_scores_85() {
        let due = Some(now() + Duration::hours(20));
        assert_eq!(score(Importance::High, due, now()), 85);
    }

    #[test]
    fn test_no_due_date_low_scores_base_30() {
        assert_eq!(score(Importance::Low, None, now()), 30);
    }

    #[test]
    fn test_deterministic() {
        let due = Some(now() + Duration::hours(5));
        assert_eq!(
            score(Importance::Urgent, due, now()),
            score(Importance::Urgent, due, now())
        );
    }
}
