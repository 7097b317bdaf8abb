use chrono::{DateTime, Duration, Local, SubsecRound};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    pub timestamp: DateTime<Local>,
    pub payload: String,
}

impl Sample {
    pub fn new(timestamp: DateTime<Local>, payload: String) -> Self {
        Self { timestamp, payload }
    }

    /// Local time with microseconds, e.g. `2023-06-01 14:03:59.120417`.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Hands out sample timestamps that strictly increase within a run.
///
/// Readings are truncated to the microsecond precision of the log format. A
/// reading at or before the previous stamp, e.g. after the wall clock was
/// stepped back, becomes the previous stamp plus one microsecond.
#[derive(Debug, Default)]
pub(crate) struct Timeline {
    last: Option<DateTime<Local>>,
}

impl Timeline {
    pub fn stamp(&mut self, now: DateTime<Local>) -> DateTime<Local> {
        let now = now.trunc_subsecs(6);
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64, micros: u32) -> DateTime<Local> {
        Local.timestamp_opt(secs, micros * 1000).unwrap()
    }

    #[test]
    fn clock_going_back_still_moves_forward() {
        let mut timeline = Timeline::default();
        let first = timeline.stamp(at(1_700_000_000, 0));
        let second = timeline.stamp(at(1_699_999_999, 0));
        let third = timeline.stamp(at(1_699_999_999, 500));
        let fourth = timeline.stamp(at(1_700_000_005, 0));

        assert_eq!(first, at(1_700_000_000, 0));
        assert_eq!(second, at(1_700_000_000, 1));
        assert_eq!(third, at(1_700_000_000, 2));
        assert_eq!(fourth, at(1_700_000_005, 0));
    }

    #[test]
    fn same_microsecond_readings_print_distinct() {
        let mut timeline = Timeline::default();
        let base = Local.timestamp_opt(1_700_000_000, 123_456_100).unwrap();
        let first = Sample::new(timeline.stamp(base), "a".to_string());
        let second = Sample::new(
            timeline.stamp(base + Duration::nanoseconds(500)),
            "b".to_string(),
        );

        assert!(first.timestamp < second.timestamp);
        assert_ne!(first.formatted_timestamp(), second.formatted_timestamp());
        assert!(first.formatted_timestamp().ends_with(".123456"));
        assert!(second.formatted_timestamp().ends_with(".123457"));
    }
}
