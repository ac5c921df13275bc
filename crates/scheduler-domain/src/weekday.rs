//! Day-of-week value object. See `spec.md` §3.2.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A calendar weekday, Sunday = 0 per `spec.md` §3.2's deterministic mapping.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// Sunday = 0 .. Saturday = 6.
    pub fn day_number(&self) -> u8 {
        match self {
            Weekday::Sunday => 0,
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
        }
    }

    pub fn from_day_number(n: u8) -> Result<Self> {
        match n {
            0 => Ok(Weekday::Sunday),
            1 => Ok(Weekday::Monday),
            2 => Ok(Weekday::Tuesday),
            3 => Ok(Weekday::Wednesday),
            4 => Ok(Weekday::Thursday),
            5 => Ok(Weekday::Friday),
            6 => Ok(Weekday::Saturday),
            other => Err(Error::Validation(format!("day number out of range: {other}"))),
        }
    }

    /// Convert from `chrono`'s Monday=0 weekday numbering.
    pub fn from_chrono(day: chrono::Weekday) -> Self {
        use chrono::Weekday as C;
        match day {
            C::Sun => Weekday::Sunday,
            C::Mon => Weekday::Monday,
            C::Tue => Weekday::Tuesday,
            C::Wed => Weekday::Wednesday,
            C::Thu => Weekday::Thursday,
            C::Fri => Weekday::Friday,
            C::Sat => Weekday::Saturday,
        }
    }

    /// Parse full names, three-letter abbreviations (case-insensitive), and
    /// the collection keywords `weekdays`, `weekends`, `everyday`/`daily`/
    /// `all`. Collection keywords return more than one day — use
    /// [`Weekday::parse_set`] for those.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.trim().to_lowercase();
        match lower.as_str() {
            "sunday" | "sun" => Ok(Weekday::Sunday),
            "monday" | "mon" => Ok(Weekday::Monday),
            "tuesday" | "tue" => Ok(Weekday::Tuesday),
            "wednesday" | "wed" => Ok(Weekday::Wednesday),
            "thursday" | "thu" => Ok(Weekday::Thursday),
            "friday" | "fri" => Ok(Weekday::Friday),
            "saturday" | "sat" => Ok(Weekday::Saturday),
            other => Err(Error::Validation(format!("unrecognized weekday: {other}"))),
        }
    }

    /// Parse a single weekday name or a collection keyword
    /// (`weekdays`, `weekends`, `everyday`, `daily`, `all`) into the set
    /// of weekdays it denotes.
    pub fn parse_set(input: &str) -> Result<Vec<Weekday>> {
        let lower = input.trim().to_lowercase();
        match lower.as_str() {
            "weekdays" => Ok(vec![
                Weekday::Monday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday,
                Weekday::Friday,
            ]),
            "weekends" => Ok(vec![Weekday::Saturday, Weekday::Sunday]),
            "everyday" | "daily" | "all" => Ok(vec![
                Weekday::Sunday,
                Weekday::Monday,
                Weekday::Tuesday,
                Weekday::Wednesday,
                Weekday::Thursday,
                Weekday::Friday,
                Weekday::Saturday,
            ]),
            _ => Weekday::parse(input).map(|d| vec![d]),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Weekday::Sunday => "Sunday",
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
        };
        write!(f, "{name}")
    }
}
