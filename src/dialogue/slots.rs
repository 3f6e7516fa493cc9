use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// An appointment time offered to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Day as spoken, `d/m/yyyy`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub starts_at: NaiveDateTime,
}

impl Slot {
    pub fn new(starts_at: NaiveDateTime) -> Self {
        Self {
            date: starts_at.format("%-d/%-m/%Y").to_string(),
            time: starts_at.format("%H:%M").to_string(),
            starts_at,
        }
    }
}

/// Source of bookable slots
pub trait SlotProvider: Send + Sync {
    fn available_slots(&self) -> Vec<Slot>;
}

/// Fixed times on the day after today
#[derive(Debug, Clone)]
pub struct TomorrowSlots {
    times: Vec<NaiveTime>,
}

impl TomorrowSlots {
    pub fn new(times: Vec<NaiveTime>) -> Self {
        Self { times }
    }

    pub fn slots_after(&self, today: NaiveDate) -> Vec<Slot> {
        let Some(tomorrow) = today.checked_add_days(Days::new(1)) else {
            return Vec::new();
        };
        self.times
            .iter()
            .map(|time| Slot::new(tomorrow.and_time(*time)))
            .collect()
    }
}

impl Default for TomorrowSlots {
    fn default() -> Self {
        let times = [(10, 30), (15, 0), (17, 30)]
            .into_iter()
            .filter_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
            .collect();
        Self { times }
    }
}

impl SlotProvider for TomorrowSlots {
    fn available_slots(&self) -> Vec<Slot> {
        self.slots_after(Local::now().date_naive())
    }
}
