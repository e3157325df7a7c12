use crate::{
    clock::Clock,
    configuration::SchedulingConfig,
    error::{SchedulingError, SchedulingResult},
    slot_rules::SlotValidator,
    types::{CalendarData, TimeSlot},
};
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Input for creating or editing a slot. A missing title falls back to the
/// configured default on create and keeps the current title on edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDraft {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub title: Option<String>,
}

/// What an edit does when the new start leaves an end time that no longer
/// makes a valid window (at or before the start, or below the minimum length).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndTimePolicy {
    /// Move the end to `start + default_slot_minutes`.
    #[default]
    AutoCorrect,
    Reject,
}

/// Owns a calendar in memory and applies every mutation under the slot rules.
#[derive(Clone)]
pub struct SchedulingEngine {
    data: CalendarData,
    validator: SlotValidator,
    config: SchedulingConfig,
    clock: Arc<dyn Clock>,
}

impl SchedulingEngine {
    pub fn new(config: SchedulingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            data: CalendarData::default(),
            validator: SlotValidator::new(config.minimum_slot_minutes),
            config,
            clock,
        }
    }

    pub fn data(&self) -> &CalendarData {
        &self.data
    }

    /// Swaps in an authoritative copy without touching `last_updated`.
    pub fn replace(&mut self, data: CalendarData) {
        self.data = data;
    }

    /// Like `replace`, but leaves out slots dated before today. The store
    /// keeps them until an administrator cleans them up.
    pub fn adopt(&mut self, data: CalendarData) -> usize {
        self.data = data;
        let today = self.today();
        let hidden = self.data.retain(|slot| !slot.is_past(today));
        if hidden > 0 {
            debug!(hidden, "Left out past timeslots");
        }
        hidden
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn create_slot(&mut self, draft: SlotDraft) -> SchedulingResult<TimeSlot> {
        let start = SlotValidator::truncate_to_minute(draft.start_time);
        let end = SlotValidator::truncate_to_minute(draft.end_time);
        self.validator
            .validate_window(self.today(), draft.date, start, end)?;

        let title = self.title_or_default(draft.title.unwrap_or_default());
        let slot = TimeSlot::new(draft.date, start, end, title);
        if self.data.contains(&slot.id) {
            return Err(SchedulingError::DuplicateSlot(slot.id));
        }

        debug!(slot_id = %slot.id, "Created timeslot");
        self.data.insert(slot.clone());
        self.data.touch(self.clock.now());
        Ok(slot)
    }

    /// Slots whose stored date already passed can't be edited, whatever the
    /// new date is. A changed date or start time changes the id, so the slot
    /// is removed and re-inserted under the new one.
    pub fn edit_slot(
        &mut self,
        id: &str,
        draft: SlotDraft,
        policy: EndTimePolicy,
    ) -> SchedulingResult<TimeSlot> {
        let today = self.today();
        let existing = self
            .data
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulingError::NotFound(id.to_string()))?;
        if existing.is_past(today) {
            return Err(SchedulingError::PastDate);
        }

        let start = SlotValidator::truncate_to_minute(draft.start_time);
        let mut end = SlotValidator::truncate_to_minute(draft.end_time);
        if policy == EndTimePolicy::AutoCorrect {
            if let Err(SchedulingError::InvalidOrder | SchedulingError::TooShort { .. }) =
                self.validator.validate_window(today, draft.date, start, end)
            {
                end = SlotValidator::suggest_end_time(start, self.config.default_slot_minutes);
                debug!(slot_id = %id, %end, "Corrected end time");
            }
        }
        self.validator
            .validate_window(today, draft.date, start, end)?;

        let title = match draft.title {
            Some(title) => self.title_or_default(title),
            None => existing.title,
        };
        let mut slot = TimeSlot::new(draft.date, start, end, title);
        slot.available = existing.available;

        if slot.id != existing.id && self.data.contains(&slot.id) {
            return Err(SchedulingError::DuplicateSlot(slot.id));
        }

        self.data.remove(&existing.id);
        self.data.insert(slot.clone());
        self.data.touch(self.clock.now());
        Ok(slot)
    }

    fn title_or_default(&self, title: String) -> String {
        if title.trim().is_empty() {
            self.config.default_slot_title.clone()
        } else {
            title
        }
    }

    pub fn delete_slot(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        let removed = self
            .data
            .remove(id)
            .ok_or_else(|| SchedulingError::NotFound(id.to_string()))?;
        self.data.touch(self.clock.now());
        Ok(removed)
    }

    pub fn toggle_availability(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        let slot = self
            .data
            .get_mut(id)
            .ok_or_else(|| SchedulingError::NotFound(id.to_string()))?;
        slot.available = !slot.available;
        let slot = slot.clone();
        self.data.touch(self.clock.now());
        Ok(slot)
    }

    /// Available -> Reserved. Fails without mutation when the slot is gone,
    /// already taken or lies in the past.
    pub fn reserve(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        let slot = self
            .data
            .get(id)
            .ok_or_else(|| SchedulingError::SlotNotFound(id.to_string()))?;
        if !slot.available {
            return Err(SchedulingError::SlotAlreadyReserved(id.to_string()));
        }
        if slot.is_past(self.today()) {
            return Err(SchedulingError::PastDate);
        }

        self.data.set_availability(id, false)?;
        self.data.touch(self.clock.now());
        self.slot(id)
    }

    /// Reserved -> Available. Releasing an available slot is a no-op.
    pub fn release(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        if self.data.set_availability(id, true)? {
            self.data.touch(self.clock.now());
        }
        self.slot(id)
    }

    pub fn purge_past(&mut self, reference_date: NaiveDate) -> usize {
        let removed = self.data.retain(|slot| !slot.is_past(reference_date));
        if removed > 0 {
            self.data.touch(self.clock.now());
            info!(removed, %reference_date, "Removed past timeslots");
        }
        removed
    }

    pub fn list_for_date(&self, date: NaiveDate) -> Vec<TimeSlot> {
        self.data.slots_for_date(date)
    }

    pub fn list_distinct_dates(&self) -> Vec<NaiveDate> {
        self.data.distinct_dates()
    }

    /// Fills the next `seed_business_days` weekdays (starting tomorrow) with
    /// back-to-back slots across the working hours. Existing slots are kept.
    pub fn seed_working_hours(&mut self) -> usize {
        let span = Duration::minutes(self.config.default_slot_minutes);
        if span <= Duration::zero() {
            return 0;
        }

        let mut seeded = 0;
        let mut business_days = 0;
        let mut date = self.today();
        while business_days < self.config.seed_business_days {
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            business_days += 1;

            let mut start = self.config.working_hours_start;
            while start + span <= self.config.working_hours_end && start + span > start {
                let slot = TimeSlot::new(
                    date,
                    start,
                    start + span,
                    self.config.default_slot_title.clone(),
                );
                if !self.data.contains(&slot.id) {
                    self.data.insert(slot);
                    seeded += 1;
                }
                start = start + span;
            }
        }

        if seeded > 0 {
            self.data.touch(self.clock.now());
            info!(seeded, "Seeded default working-hours timeslots");
        }
        seeded
    }

    fn slot(&self, id: &str) -> SchedulingResult<TimeSlot> {
        self.data
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulingError::SlotNotFound(id.to_string()))
    }
}
