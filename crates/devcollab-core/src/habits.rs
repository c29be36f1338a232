use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// How often a habit resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Biweekly,
    Triweekly,
    Monthly,
}

impl Frequency {
    /// First day on which a habit completed on `done_on` is due again.
    pub fn next_due(self, done_on: NaiveDate) -> NaiveDate {
        let next = match self {
            Self::Daily => done_on.checked_add_days(Days::new(1)),
            Self::Weekly => done_on.checked_add_days(Days::new(7)),
            Self::Biweekly => done_on.checked_add_days(Days::new(14)),
            Self::Triweekly => done_on.checked_add_days(Days::new(21)),
            Self::Monthly => done_on.checked_add_months(Months::new(1)),
        };
        next.unwrap_or(NaiveDate::MAX)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "DAILY"),
            Self::Weekly => write!(f, "WEEKLY"),
            Self::Biweekly => write!(f, "BIWEEKLY"),
            Self::Triweekly => write!(f, "TRIWEEKLY"),
            Self::Monthly => write!(f, "MONTHLY"),
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "BIWEEKLY" => Ok(Self::Biweekly),
            "TRIWEEKLY" => Ok(Self::Triweekly),
            "MONTHLY" => Ok(Self::Monthly),
            _ => Err(DomainError::UnknownFrequency(s.to_string())),
        }
    }
}

/// Quantity counters of a habit for its current period.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitProgress {
    pub max_quantity: i64,
    pub current_quantity: i64,
    pub done: bool,
    pub date_done: Option<NaiveDate>,
}

impl HabitProgress {
    pub fn new(max_quantity: i64) -> Self {
        Self {
            max_quantity,
            ..Self::default()
        }
    }

    /// Bring the counters up to date for `today`.
    ///
    /// A completed period that has elapsed resets the counters; a period whose
    /// quantity reached the goal is marked done. Returns whether anything
    /// changed.
    pub fn refresh(&mut self, frequency: Frequency, today: NaiveDate) -> bool {
        let mut changed = false;
        if let Some(done_on) = self.date_done {
            if frequency.next_due(done_on) <= today {
                self.done = false;
                self.current_quantity = 0;
                self.date_done = None;
                changed = true;
            }
        }
        if !self.done && self.current_quantity >= self.max_quantity {
            self.done = true;
            self.date_done = Some(today);
            changed = true;
        }
        changed
    }
}
