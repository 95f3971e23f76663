//! Quiet-hours policy.
//!
//! Pushes are not delivered during a configured local hour window
//! `[start, end)`; jobs hit during the window are deferred to the top of the
//! `end` hour. Windows may wrap midnight (`22-07`).

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u32,
    end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    window: Option<Window>,
    offset: FixedOffset,
}

impl QuietHours {
    /// A policy that never defers.
    pub fn disabled() -> Self {
        Self {
            window: None,
            offset: utc_offset(),
        }
    }

    /// Hours are clamped to `0..=23`. An empty window (`start == end`) is
    /// treated as disabled.
    pub fn new(start: u32, end: u32, offset: FixedOffset) -> Self {
        let start = start.min(23);
        let end = end.min(23);
        if start == end {
            return Self {
                window: None,
                offset,
            };
        }
        Self {
            window: Some(Window { start, end }),
            offset,
        }
    }

    /// Build the policy from `QUIET_HOURS` (`"HH-HH"`) and
    /// `QUIET_HOURS_UTC_OFFSET` (`"+01:00"`). Anything unparsable disables
    /// quiet hours with a warning.
    pub fn from_config(window: Option<&str>, raw_offset: &str) -> Self {
        let Some(raw) = window else {
            return Self::disabled();
        };

        let offset = match raw_offset.trim().parse::<FixedOffset>() {
            Ok(offset) => offset,
            Err(_) => {
                tracing::warn!(utc_offset = raw_offset, "Invalid QUIET_HOURS_UTC_OFFSET, using UTC");
                utc_offset()
            }
        };

        let parsed = raw
            .split_once('-')
            .and_then(|(s, e)| Some((s.trim().parse::<u32>().ok()?, e.trim().parse::<u32>().ok()?)));

        match parsed {
            Some((start, end)) => {
                let policy = Self::new(start, end, offset);
                if policy.window.is_none() {
                    tracing::warn!(quiet_hours = raw, "Empty quiet-hours window, quiet hours disabled");
                }
                policy
            }
            None => {
                tracing::warn!(quiet_hours = raw, "Invalid QUIET_HOURS, quiet hours disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window.is_some()
    }

    pub fn is_quiet(&self, now: DateTime<Utc>) -> bool {
        let Some(Window { start, end }) = self.window else {
            return false;
        };
        let hour = now.with_timezone(&self.offset).hour();
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// The next instant outside the window; `now` itself when not quiet.
    pub fn next_exit(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(Window { start, end }) = self.window else {
            return now;
        };
        if !self.is_quiet(now) {
            return now;
        }

        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();
        // Only a wrapping window can be quiet after `start` on the same day;
        // its exit is tomorrow.
        let exit_day = if start > end && local.hour() >= start {
            today.succ_opt().unwrap_or(today)
        } else {
            today
        };

        self.local_hour(exit_day, end)
            .unwrap_or_else(|| now + Duration::hours(1))
    }

    fn local_hour(&self, day: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive = day.and_hms_opt(hour, 0, 0)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_wrapping_window() {
        let policy = QuietHours::new(22, 7, utc());
        assert!(policy.is_quiet(at(23, 0)));
        assert!(policy.is_quiet(at(0, 30)));
        assert!(policy.is_quiet(at(6, 59)));
        assert!(!policy.is_quiet(at(7, 0)));
        assert!(!policy.is_quiet(at(21, 59)));
        assert!(policy.is_quiet(at(22, 0)));
    }

    #[test]
    fn test_wrapping_window_defers_to_next_morning() {
        let policy = QuietHours::new(22, 7, utc());
        assert_eq!(
            policy.next_exit(at(23, 0)),
            Utc.with_ymd_and_hms(2024, 3, 11, 7, 0, 0).unwrap()
        );
        assert_eq!(policy.next_exit(at(3, 15)), at(7, 0));
    }

    #[test]
    fn test_same_day_window() {
        let policy = QuietHours::new(13, 15, utc());
        assert!(!policy.is_quiet(at(12, 59)));
        assert!(policy.is_quiet(at(13, 0)));
        assert!(policy.is_quiet(at(14, 59)));
        assert!(!policy.is_quiet(at(15, 0)));
        assert_eq!(policy.next_exit(at(14, 10)), at(15, 0));
    }

    #[test]
    fn test_next_exit_outside_window_is_now() {
        let policy = QuietHours::new(22, 7, utc());
        assert_eq!(policy.next_exit(at(12, 0)), at(12, 0));
    }

    #[test]
    fn test_offset_is_applied() {
        // 21:30 UTC is 22:30 at +01:00.
        let policy = QuietHours::new(22, 7, FixedOffset::east_opt(3600).unwrap());
        assert!(policy.is_quiet(at(21, 30)));
        // 07:00 local on the 11th is 06:00 UTC.
        assert_eq!(
            policy.next_exit(at(21, 30)),
            Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_disabled_is_never_quiet() {
        let policy = QuietHours::disabled();
        assert!(!policy.is_enabled());
        assert!(!policy.is_quiet(at(23, 0)));
        assert_eq!(policy.next_exit(at(23, 0)), at(23, 0));
    }

    #[test]
    fn test_from_config() {
        assert!(QuietHours::from_config(Some("22-07"), "+00:00").is_enabled());
        assert!(QuietHours::from_config(Some(" 22 - 7 "), "+02:00").is_enabled());
        assert!(!QuietHours::from_config(Some("late-early"), "+00:00").is_enabled());
        assert!(!QuietHours::from_config(Some("8-8"), "+00:00").is_enabled());
        assert!(!QuietHours::from_config(None, "+00:00").is_enabled());
        // Out-of-range hours are clamped.
        assert_eq!(
            QuietHours::from_config(Some("22-99"), "+00:00"),
            QuietHours::new(22, 23, utc())
        );
    }
}
