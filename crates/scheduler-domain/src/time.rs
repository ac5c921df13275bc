//! Time-of-day value object — an immutable (hour, minute) pair with
//! parsing and formatting. See `spec.md` §3.1.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// A time of day, minute precision, 24-hour internally.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Time {
    hour: u8,
    minute: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 {
            return Err(Error::Validation(format!("hour out of range: {hour}")));
        }
        if minute > 59 {
            return Err(Error::Validation(format!("minute out of range: {minute}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Minutes since midnight, `0..=1439`.
    pub fn total_minutes(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// Signed difference in minutes: `self - other`.
    pub fn diff_minutes(&self, other: &Time) -> i32 {
        self.total_minutes() as i32 - other.total_minutes() as i32
    }

    pub fn format_24h(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    pub fn format_12h(&self) -> String {
        let (h12, suffix) = to_12_hour(self.hour);
        format!("{}:{:02} {}", h12, self.minute, suffix)
    }

    /// Parse `HH:MM`, `H:MM AM|PM`, `H AM|PM`, a bare hour, or one of the
    /// fixed-default literals `noon`, `midnight`, `morning`, `afternoon`,
    /// `evening`, `night`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(Error::Validation("empty time string".into()));
        }
        let lower = s.to_lowercase();
        if let Some(t) = named_literal(&lower) {
            return Ok(t);
        }

        // `H AM|PM` / `H:MM AM|PM`
        if let Some((num_part, suffix)) = split_ampm(&lower) {
            let (h, m) = parse_hm(num_part.trim())?;
            let hour24 = from_12_hour(h, &suffix)?;
            return Time::new(hour24, m);
        }

        // `HH:MM` or bare hour
        let (h, m) = parse_hm(&lower)?;
        Time::new(h, m)
    }
}

fn named_literal(lower: &str) -> Option<Time> {
    match lower {
        "noon" => Some(Time { hour: 12, minute: 0 }),
        "midnight" => Some(Time { hour: 0, minute: 0 }),
        "morning" => Some(Time { hour: 8, minute: 0 }),
        "afternoon" => Some(Time { hour: 14, minute: 0 }),
        "evening" => Some(Time { hour: 18, minute: 0 }),
        "night" => Some(Time { hour: 21, minute: 0 }),
        _ => None,
    }
}

fn split_ampm(lower: &str) -> Option<(&str, String)> {
    if let Some(rest) = lower.strip_suffix("am") {
        return Some((rest, "am".to_string()));
    }
    if let Some(rest) = lower.strip_suffix("pm") {
        return Some((rest, "pm".to_string()));
    }
    // "9 am" / "9 pm" with a space is handled by the strip_suffix cases
    // above since we don't trim internal whitespace; trim the leftover
    // trailing space from the numeric part on return.
    None
}

fn parse_hm(part: &str) -> Result<(u8, u8)> {
    let part = part.trim();
    if let Some((h, m)) = part.split_once(':') {
        let h: u8 = h
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("bad hour in '{part}'")))?;
        let m: u8 = m
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("bad minute in '{part}'")))?;
        Ok((h, m))
    } else {
        let h: u8 = part
            .parse()
            .map_err(|_| Error::Validation(format!("bad time '{part}'")))?;
        Ok((h, 0))
    }
}

fn from_12_hour(h: u8, suffix: &str) -> Result<u8> {
    if h == 0 || h > 12 {
        return Err(Error::Validation(format!("hour out of 12-hour range: {h}")));
    }
    let hour24 = match (h, suffix) {
        (12, "am") => 0,
        (12, "pm") => 12,
        (h, "am") => h,
        (h, "pm") => h + 12,
        _ => unreachable!(),
    };
    Ok(hour24)
}

fn to_12_hour(hour: u8) -> (u8, &'static str) {
    match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_minutes().cmp(&other.total_minutes())
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_24h())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_out_of_range() {
        assert!(Time::new(24, 0).is_err());
        assert!(Time::new(0, 60).is_err());
        assert!(Time::new(23, 59).is_ok());
    }

    #[test]
    fn total_minutes_and_diff() {
        let a = Time::new(9, 0).unwrap();
        let b = Time::new(9, 30).unwrap();
        assert_eq!(a.total_minutes(), 540);
        assert_eq!(b.diff_minutes(&a), 30);
        assert_eq!(a.diff_minutes(&b), -30);
    }

    #[test]
    fn format_24h_pads() {
        assert_eq!(Time::new(9, 5).unwrap().format_24h(), "09:05");
        assert_eq!(Time::new(0, 0).unwrap().format_24h(), "00:00");
    }

    #[test]
    fn format_12h() {
        assert_eq!(Time::new(0, 0).unwrap().format_12h(), "12:00 AM");
        assert_eq!(Time::new(12, 0).unwrap().format_12h(), "12:00 PM");
        assert_eq!(Time::new(13, 30).unwrap().format_12h(), "1:30 PM");
        assert_eq!(Time::new(9, 5).unwrap().format_12h(), "9:05 AM");
    }

    #[test]
    fn parse_24h() {
        assert_eq!(Time::parse("09:00").unwrap(), Time::new(9, 0).unwrap());
        assert_eq!(Time::parse("23:59").unwrap(), Time::new(23, 59).unwrap());
    }

    #[test]
    fn parse_12h_variants() {
        assert_eq!(Time::parse("9:00 AM").unwrap(), Time::new(9, 0).unwrap());
        assert_eq!(Time::parse("9:00pm").unwrap(), Time::new(21, 0).unwrap());
        assert_eq!(Time::parse("9am").unwrap(), Time::new(9, 0).unwrap());
        assert_eq!(Time::parse("12am").unwrap(), Time::new(0, 0).unwrap());
        assert_eq!(Time::parse("12pm").unwrap(), Time::new(12, 0).unwrap());
    }

    #[test]
    fn parse_bare_hour() {
        assert_eq!(Time::parse("14").unwrap(), Time::new(14, 0).unwrap());
    }

    #[test]
    fn parse_named_literals() {
        assert_eq!(Time::parse("noon").unwrap(), Time::new(12, 0).unwrap());
        assert_eq!(Time::parse("midnight").unwrap(), Time::new(0, 0).unwrap());
        assert_eq!(Time::parse("Morning").unwrap(), Time::new(8, 0).unwrap());
        assert_eq!(Time::parse("afternoon").unwrap(), Time::new(14, 0).unwrap());
        assert_eq!(Time::parse("evening").unwrap(), Time::new(18, 0).unwrap());
        assert_eq!(Time::parse("night").unwrap(), Time::new(21, 0).unwrap());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Time::parse("").is_err());
        assert!(Time::parse("25:00").is_err());
        assert!(Time::parse("13pm").is_err());
        assert!(Time::parse("0am").is_err());
    }

    #[test]
    fn round_trip_format_parse() {
        for h in 0..24u8 {
            for m in [0u8, 15, 30, 45] {
                let t = Time::new(h, m).unwrap();
                assert_eq!(Time::parse(&t.format_24h()).unwrap(), t);
                assert_eq!(Time::parse(&t.format_12h()).unwrap(), t);
            }
        }
    }

    #[test]
    fn ordering() {
        let a = Time::new(9, 0).unwrap();
        let b = Time::new(9, 30).unwrap();
        assert!(a < b);
        assert_eq!(a, Time::new(9, 0).unwrap());
    }
}
