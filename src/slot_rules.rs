use crate::error::{SchedulingError, SchedulingResult};
use chrono::{Duration, NaiveDate, NaiveTime, Timelike};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Rule checks shared by every mutating path. Pure: the current date is
/// always passed in.
#[derive(Debug, Clone)]
pub struct SlotValidator {
    minimum_duration_minutes: i64,
}

impl Default for SlotValidator {
    fn default() -> Self {
        Self::new(15)
    }
}

impl SlotValidator {
    pub fn new(minimum_duration_minutes: i64) -> Self {
        Self {
            minimum_duration_minutes,
        }
    }

    pub fn validate_window(
        &self,
        today: NaiveDate,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> SchedulingResult<()> {
        if date < today {
            return Err(SchedulingError::PastDate);
        }
        if end <= start {
            return Err(SchedulingError::InvalidOrder);
        }
        if (end - start).num_minutes() < self.minimum_duration_minutes {
            return Err(SchedulingError::TooShort {
                minimum_minutes: self.minimum_duration_minutes,
            });
        }
        Ok(())
    }

    /// `YYYY-MM-DD-HH:MM`, e.g. `2024-06-10-19:00`.
    pub fn derive_id(date: NaiveDate, start: NaiveTime) -> String {
        format!("{}-{}", date.format("%Y-%m-%d"), start.format("%H:%M"))
    }

    /// `start + default_span_minutes`, clamped to the last minute of the day.
    pub fn suggest_end_time(start: NaiveTime, default_span_minutes: i64) -> NaiveTime {
        let (end, overflow) = start.overflowing_add_signed(Duration::minutes(default_span_minutes));
        if overflow != 0 {
            return end_of_day();
        }
        end
    }

    /// Slots have minute granularity.
    pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
        NaiveTime::MIN + Duration::minutes(i64::from(time.hour() * 60 + time.minute()))
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::MIN + Duration::minutes(MINUTES_PER_DAY - 1)
}
