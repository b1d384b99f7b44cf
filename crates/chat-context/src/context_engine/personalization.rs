//! How often the user's name and the time of day are mentioned to the generator.

use chrono::{DateTime, Local, Timelike, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory_db::{Sender, StoredMessage};

/// Name is re-sent on the 1st, 11th, 21st... user message.
pub const NAME_EVERY_N_USER_MESSAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// morning 05-12, afternoon 12-16, evening 16-22, night otherwise
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=15 => TimeOfDay::Afternoon,
            16..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self {
        Self::from_hour(time.hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCadence {
    pub send_name: bool,
    pub send_time: bool,
    pub time_of_day: TimeOfDay,
}

/// Pure function of the history (including the current user message) and the local clock.
pub fn context_cadence(history: &[StoredMessage], now: DateTime<Local>) -> ContextCadence {
    let time_of_day = TimeOfDay::at(&now);
    if history.len() < 2 {
        return ContextCadence { send_name: true, send_time: true, time_of_day };
    }

    let user_count = history.iter().filter(|m| m.sender == Sender::User).count();
    let send_name = user_count % NAME_EVERY_N_USER_MESSAGES == 1;

    let send_time = history
        .iter()
        .rev()
        .find(|m| m.sender == Sender::Bot)
        .map(|bot| TimeOfDay::at(&bot.created_at.with_timezone(&Local)) != time_of_day)
        .unwrap_or(true);

    ContextCadence { send_name, send_time, time_of_day }
}
