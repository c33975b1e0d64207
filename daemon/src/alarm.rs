use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

pub const DEFAULT_WINDOW_MINUTES: u32 = 10;
const MINUTES_PER_DAY: u32 = 24 * 60;
const SECONDS_PER_DAY: u32 = MINUTES_PER_DAY * 60;

/// Fields every new alarm must carry, using their on-disk key names.
pub const REQUIRED_FIELDS: [&str; 5] = ["name", "on", "days", "hour", "min"];

/// A recurring wake-up time. `days` uses 0 = Monday … 6 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub name: String,
    pub days: BTreeSet<u8>,
    pub on: bool,
    pub hour: u32,
    #[serde(rename = "min")]
    pub minute: u32,
}

/// The span of the day during which an alarm keeps the radio playing.
/// Both ends are inclusive instants: a 07:55 window of 10 minutes covers
/// 07:55:00 through 08:05:00. A window truncated at midnight runs to the
/// last second of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmWindow {
    start: u32,
    end: u32,
    truncated: bool,
}

impl AlarmWindow {
    /// `(hour, minute)` at which the window opens.
    pub fn start(&self) -> (u32, u32) {
        (self.start / 60, self.start % 60)
    }

    /// `(hour, minute)` of the last minute inside the window.
    pub fn end(&self) -> (u32, u32) {
        (self.end / 60, self.end % 60)
    }

    /// True when the window would have run past 23:59 and was cut off there.
    /// Windows are never carried over into the next day.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn contains(&self, second_of_day: u32) -> bool {
        let last = if self.truncated {
            SECONDS_PER_DAY - 1
        } else {
            self.end * 60
        };
        (self.start * 60..=last).contains(&second_of_day)
    }
}

impl fmt::Display for AlarmWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sh, sm) = self.start();
        let (eh, em) = self.end();
        write!(f, "{sh:02}:{sm:02}-{eh:02}:{em:02}")
    }
}

impl Alarm {
    /// Builds an alarm from an untyped JSON object, reporting the first
    /// missing or invalid field.
    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = value
            .as_object()
            .ok_or_else(|| Error::Validation("an alarm must be a JSON object".to_string()))?;

        for field in REQUIRED_FIELDS {
            if fields.get(field).map_or(true, Value::is_null) {
                return Err(Error::Validation(format!("missing field `{field}`")));
            }
        }
        if fields["days"].as_array().is_some_and(Vec::is_empty) {
            return Err(Error::Validation(
                "`days` must list at least one weekday".to_string(),
            ));
        }

        let alarm: Alarm = serde_json::from_value(value.clone())
            .map_err(|e| Error::Validation(e.to_string()))?;
        alarm.validate()?;
        Ok(alarm)
    }

    /// Checks the invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.days.is_empty() {
            return Err(Error::Validation(
                "`days` must list at least one weekday".to_string(),
            ));
        }
        if let Some(day) = self.days.iter().find(|d| **d > 6) {
            return Err(Error::Validation(format!(
                "day {day} is not a weekday (0 = Monday, 6 = Sunday)"
            )));
        }
        if self.hour > 23 {
            return Err(Error::Validation(format!("hour {} is out of range", self.hour)));
        }
        if self.minute > 59 {
            return Err(Error::Validation(format!("min {} is out of range", self.minute)));
        }
        Ok(())
    }

    /// Canonical JSON form, as stored in the config document.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "days": self.days,
            "on": self.on,
            "hour": self.hour,
            "min": self.minute,
        })
    }

    /// Window of `length_minutes` starting at the alarm time. A minute sum of
    /// 60 or more carries into the next hour; past 23:59 the window is
    /// truncated instead of wrapping.
    pub fn window(&self, length_minutes: u32) -> AlarmWindow {
        let start = self.hour * 60 + self.minute;
        let end = start + length_minutes;
        if end >= MINUTES_PER_DAY {
            AlarmWindow {
                start,
                end: MINUTES_PER_DAY - 1,
                truncated: true,
            }
        } else {
            AlarmWindow {
                start,
                end,
                truncated: false,
            }
        }
    }

    /// Whether `now` falls on one of the alarm's days and inside its window.
    /// The `on` flag is not consulted here.
    pub fn is_active_at(&self, now: NaiveDateTime, length_minutes: u32) -> bool {
        let weekday = now.weekday().num_days_from_monday() as u8;
        if !self.days.contains(&weekday) {
            return false;
        }
        self.window(length_minutes)
            .contains(now.num_seconds_from_midnight())
    }
}
