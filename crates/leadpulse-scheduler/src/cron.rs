//! Lightweight cron expression parser for the digest schedule.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Fields: *, */N, N, A-B and comma lists. DOM and MON only take `*`.
//! Day of week runs 0-6 from Sunday; 7 is Sunday too.
//! Example: "0 9 * * 1-5" = weekdays at 9:00

use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use leadpulse_core::error::{LeadPulseError, Result};

/// A parsed cron expression, matched against tenant-local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    weekdays: Vec<u32>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(LeadPulseError::Config(format!(
                "Invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        if parts[2] != "*" || parts[3] != "*" {
            return Err(LeadPulseError::Config(format!(
                "Invalid cron expression '{expression}': day of month and month must be '*'"
            )));
        }

        let field = |index: usize, min: u32, max: u32| {
            parse_field(parts[index], min, max).ok_or_else(|| {
                LeadPulseError::Config(format!(
                    "Invalid cron field '{}' in '{expression}' (allowed {min}-{max})",
                    parts[index]
                ))
            })
        };

        let mut weekdays: Vec<u32> = field(4, 0, 7)?.into_iter().map(|d| d % 7).collect();
        weekdays.sort_unstable();
        weekdays.dedup();

        Ok(Self {
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            weekdays,
        })
    }

    pub fn matches(&self, at: &DateTime<FixedOffset>) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.weekdays.contains(&at.weekday().num_days_from_sunday())
    }

    /// The first scheduled minute in `(from, to]`.
    pub fn first_between(
        &self,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        let mut candidate = (from + Duration::minutes(1)).with_second(0)?.with_nanosecond(0)?;
        while candidate <= to {
            if self.matches(&candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse a cron field into the list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N: every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok().filter(|n| *n > 0)?;
        return Some((min..=max).step_by(n as usize).collect());
    }

    // "1-5" or "0,15,30,45" or a mix
    let mut values = Vec::new();
    for item in field.split(',') {
        let (lo, hi) = match item.trim().split_once('-') {
            Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
            None => {
                let n: u32 = item.trim().parse().ok()?;
                (n, n)
            }
        };
        if lo < min || hi > max || lo > hi {
            return None;
        }
        values.extend(lo..=hi);
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(offset_hours: i32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(offset_hours * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 6, d, h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_daily_at_nine() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        assert!(schedule.matches(&at(3, 1, 9, 0)));
        assert!(schedule.matches(&at(-8, 1, 9, 0)));
        assert!(!schedule.matches(&at(3, 1, 9, 1)));
    }

    #[test]
    fn test_first_between_is_half_open() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        assert_eq!(
            schedule.first_between(at(3, 1, 8, 0), at(3, 1, 9, 0)),
            Some(at(3, 1, 9, 0))
        );
        assert_eq!(schedule.first_between(at(3, 1, 9, 0), at(3, 1, 10, 0)), None);
        assert_eq!(schedule.first_between(at(3, 1, 7, 0), at(3, 1, 8, 59)), None);
    }

    #[test]
    fn test_weekdays_only() {
        // 2024-06-01 is a Saturday, 06-03 a Monday
        let schedule = CronSchedule::parse("30 8 * * 1-5").unwrap();
        assert!(!schedule.matches(&at(0, 1, 8, 30)));
        assert!(schedule.matches(&at(0, 3, 8, 30)));
    }

    #[test]
    fn test_steps_lists_and_sunday_as_seven() {
        let schedule = CronSchedule::parse("*/15 9,17 * * 7").unwrap();
        // 2024-06-02 is a Sunday
        assert!(schedule.matches(&at(0, 2, 17, 45)));
        assert!(!schedule.matches(&at(0, 2, 17, 50)));
        assert!(!schedule.matches(&at(0, 3, 9, 0)));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 9 * * 5-1").is_err());
        assert!(CronSchedule::parse("0 9 1 * *").is_err());
        assert!(CronSchedule::parse("0 9 * 6 *").is_err());
    }
}
