use crate::{
    error::{SchedulingError, SchedulingResult},
    slot_rules::SlotValidator,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub available: bool,
    pub title: String,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime, title: String) -> Self {
        Self {
            id: SlotValidator::derive_id(date, start_time),
            date,
            start_time,
            end_time,
            available: true,
            title,
        }
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.date < today
    }
}

/// The unit that is persisted and exchanged. Slots are keyed by their derived
/// id, so a `(date, start_time)` pair can only ever occur once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarData {
    #[serde(with = "slot_list")]
    slots: BTreeMap<String, TimeSlot>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl CalendarData {
    pub fn from_slots(
        slots: impl IntoIterator<Item = TimeSlot>,
        last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            slots: slots
                .into_iter()
                .map(|slot| (slot.id.clone(), slot))
                .collect(),
            last_updated,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TimeSlot> {
        self.slots.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in chronological order.
    pub fn slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.values()
    }

    /// False only for a calendar that was never written and holds no slots.
    pub fn has_prior_data(&self) -> bool {
        self.last_updated.is_some() || !self.slots.is_empty()
    }

    /// Compares slot content only, ignoring `last_updated`.
    pub fn same_slots(&self, other: &CalendarData) -> bool {
        self.slots == other.slots
    }

    pub(crate) fn insert(&mut self, slot: TimeSlot) {
        self.slots.insert(slot.id.clone(), slot);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<TimeSlot> {
        self.slots.remove(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut TimeSlot> {
        self.slots.get_mut(id)
    }

    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&TimeSlot) -> bool) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| keep(slot));
        before - self.slots.len()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = Some(next_timestamp(self.last_updated, now));
    }

    /// Compare-and-set on `available`. Reserving only succeeds on an available
    /// slot; releasing an available slot changes nothing. Returns whether the
    /// slot changed.
    pub(crate) fn set_availability(&mut self, id: &str, available: bool) -> SchedulingResult<bool> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SchedulingError::SlotNotFound(id.to_string()))?;

        match (slot.available, available) {
            (false, false) => Err(SchedulingError::SlotAlreadyReserved(id.to_string())),
            (true, true) => Ok(false),
            _ => {
                slot.available = available;
                Ok(true)
            }
        }
    }

    pub fn slots_for_date(&self, date: NaiveDate) -> Vec<TimeSlot> {
        self.slots
            .values()
            .filter(|slot| slot.date == date)
            .cloned()
            .collect()
    }

    pub fn distinct_dates(&self) -> Vec<NaiveDate> {
        self.slots
            .values()
            .map(|slot| slot.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Returns a timestamp strictly after `previous`, truncated to milliseconds so
/// it survives a round trip through every store unchanged.
pub fn next_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(3);
    match previous {
        Some(previous) if now <= previous => previous.trunc_subsecs(3) + Duration::milliseconds(1),
        _ => now,
    }
}

/// Who performed an administrator mutation. Used for audit attribution only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorIdentity(pub String);

impl ActorIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn system() -> Self {
        Self("system".into())
    }
}

impl fmt::Display for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

mod slot_list {
    use super::TimeSlot;
    use crate::slot_rules::SlotValidator;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        slots: &BTreeMap<String, TimeSlot>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(slots.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, TimeSlot>, D::Error> {
        let slots = Vec::<TimeSlot>::deserialize(deserializer)?;
        Ok(slots
            .into_iter()
            .map(|mut slot| {
                // the key is always the derived one, whatever the sender put in `id`
                slot.id = SlotValidator::derive_id(slot.date, slot.start_time);
                (slot.id.clone(), slot)
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn slot(date: &str, start: &str, end: &str) -> TimeSlot {
        TimeSlot::new(
            date.parse().unwrap(),
            NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            "Consultation".into(),
        )
    }

    #[test]
    fn test_set_availability_is_compare_and_set() {
        let mut data = CalendarData::from_slots([slot("2024-06-10", "19:00", "19:30")], None);
        let id = "2024-06-10-19:00";

        assert!(data.set_availability(id, false).unwrap());
        assert!(!data.get(id).unwrap().available);
        assert_eq!(
            data.set_availability(id, false).unwrap_err(),
            SchedulingError::SlotAlreadyReserved(id.into())
        );

        assert!(data.set_availability(id, true).unwrap());
        assert!(!data.set_availability(id, true).unwrap());

        assert_eq!(
            data.set_availability("2024-06-10-08:00", false).unwrap_err(),
            SchedulingError::SlotNotFound("2024-06-10-08:00".into())
        );
    }

    #[test]
    fn test_projections() {
        let data = CalendarData::from_slots(
            [
                slot("2024-06-11", "10:00", "10:30"),
                slot("2024-06-10", "19:00", "19:30"),
                slot("2024-06-10", "09:00", "09:30"),
            ],
            None,
        );

        let for_date = data.slots_for_date("2024-06-10".parse().unwrap());
        assert_eq!(for_date.len(), 2);
        assert_eq!(for_date[0].id, "2024-06-10-09:00");
        assert_eq!(for_date[1].id, "2024-06-10-19:00");

        assert_eq!(
            data.distinct_dates(),
            vec![
                "2024-06-10".parse::<NaiveDate>().unwrap(),
                "2024-06-11".parse::<NaiveDate>().unwrap()
            ]
        );
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        assert_eq!(next_timestamp(None, now), now);
        assert_eq!(
            next_timestamp(Some(now), now),
            now + Duration::milliseconds(1)
        );
        assert_eq!(
            next_timestamp(Some(now + Duration::hours(1)), now),
            now + Duration::hours(1) + Duration::milliseconds(1)
        );
        let later = now + Duration::minutes(5);
        assert_eq!(next_timestamp(Some(now), later), later);
    }

    #[test]
    fn test_serialized_slot_ids_are_rederived() {
        let json = r#"{
            "slots": [{
                "id": "bogus",
                "date": "2024-06-10",
                "startTime": "19:00:00",
                "endTime": "19:30:00",
                "available": false,
                "title": "Intro call"
            }],
            "lastUpdated": null
        }"#;

        let data: CalendarData = serde_json::from_str(json).unwrap();
        assert!(data.has_prior_data());
        let slot = data.get("2024-06-10-19:00").unwrap();
        assert!(!slot.available);
        assert_eq!(slot.title, "Intro call");
    }
}
