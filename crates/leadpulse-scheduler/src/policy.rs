//! Notification policy gate: per-category opt-outs and quiet hours.

use chrono::{DateTime, FixedOffset, Timelike};
use leadpulse_core::types::{Category, Member};

/// Outcome of the gate for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    OptedOut,
    QuietHours,
}

/// Evaluate a member against a category at tenant-local `now`.
pub fn evaluate(member: &Member, category: Category, now: &DateTime<FixedOffset>) -> Decision {
    if !member.wants(category) {
        return Decision::OptedOut;
    }
    if category.quiet_hours_exempt() {
        return Decision::Allow;
    }
    match member.quiet_hours {
        Some(window) if window.contains(now.hour()) => Decision::QuietHours,
        _ => Decision::Allow,
    }
}

pub fn allow(member: &Member, category: Category, now: &DateTime<FixedOffset>) -> bool {
    evaluate(member, category, now) == Decision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leadpulse_core::types::{QuietHours, Role};

    fn at_hour(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, 1, hour, 0, 0)
            .unwrap()
    }

    fn night_owl() -> Member {
        Member::new("m1", "t1", Role::Manager)
            .with_channel("C2")
            .with_quiet_hours(QuietHours::new(22, 6).unwrap())
    }

    #[test]
    fn test_quiet_hours_suppress_reminders() {
        let member = night_owl();
        assert_eq!(evaluate(&member, Category::TaskReminder15, &at_hour(23)), Decision::QuietHours);
        assert_eq!(evaluate(&member, Category::TaskReminder15, &at_hour(2)), Decision::QuietHours);
        assert!(allow(&member, Category::TaskReminder15, &at_hour(10)));
    }

    #[test]
    fn test_digest_ignores_quiet_hours() {
        let member = night_owl();
        assert!(allow(&member, Category::DailyDigest, &at_hour(23)));
    }

    #[test]
    fn test_opt_out_wins_even_for_digest() {
        let member = night_owl().with_toggle(Category::DailyDigest, false);
        assert_eq!(evaluate(&member, Category::DailyDigest, &at_hour(10)), Decision::OptedOut);
    }

    #[test]
    fn test_missing_toggle_defaults_to_enabled() {
        let member = Member::new("m1", "t1", Role::Owner)
            .with_channel("C1")
            .with_toggle(Category::NewLead, true);
        assert!(allow(&member, Category::StatusChange, &at_hour(3)));
        assert!(allow(&member, Category::NewLead, &at_hour(3)));
    }
}
