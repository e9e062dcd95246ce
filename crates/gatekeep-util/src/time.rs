//! Wall-clock helpers for gatekeep
//!
//! Sessions are persisted across process death, so everything here works on
//! wall-clock time (`DateTime<Local>`) rather than a monotonic clock.
//!
//! # Mock time
//!
//! Debug builds honour `GATEKEEP_MOCK_TIME` (`YYYY-MM-DD HH:MM:SS`). The mock
//! clock starts at the given instant and then advances with real time.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "GATEKEEP_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SECONDS_PER_DAY: u32 = 24 * 3600;

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)]
fn mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        if !cfg!(debug_assertions) {
            return None;
        }

        let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
        let parsed = NaiveDateTime::parse_from_str(&raw, MOCK_TIME_FORMAT)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).single());

        match parsed {
            Some(mock) => {
                let offset = mock.signed_duration_since(chrono::Local::now());
                tracing::info!(mock_time = %raw, offset_secs = offset.num_seconds(), "Mock time enabled");
                Some(offset)
            }
            None => {
                tracing::warn!(mock_time = %raw, expected_format = MOCK_TIME_FORMAT, "Ignoring invalid mock time");
                None
            }
        }
    })
}

/// Current local time, shifted by `GATEKEEP_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real = chrono::Local::now();
    match mock_time_offset() {
        Some(offset) => real + offset,
        None => real,
    }
}

/// Convert a std duration into a chrono duration, saturating on overflow.
pub fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Time of day with minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn seconds_from_midnight(self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.hour, self.minute).cmp(&(other.hour, other.minute))
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for WallClock {
    type Err = String;

    /// Parse `HH:MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| "Expected HH:MM format".to_string())?;
        let hour: u8 = hour.trim().parse().map_err(|_| "Invalid hour".to_string())?;
        let minute: u8 = minute.trim().parse().map_err(|_| "Invalid minute".to_string())?;

        if hour >= 24 {
            return Err("Hour must be 0-23".into());
        }
        if minute >= 60 {
            return Err("Minute must be 0-59".into());
        }
        Ok(Self { hour, minute })
    }
}

/// Set of weekdays stored as a bitmask (bit 0 = Monday)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const ALL_DAYS: DaysOfWeek = DaysOfWeek(0x7F);
    pub const WEEKDAYS: DaysOfWeek = DaysOfWeek(0x1F);
    pub const WEEKENDS: DaysOfWeek = DaysOfWeek(0x60);
    pub const NONE: DaysOfWeek = DaysOfWeek(0);

    pub fn new(mask: u8) -> Self {
        Self(mask & 0x7F)
    }

    pub fn from_weekdays(days: impl IntoIterator<Item = Weekday>) -> Self {
        days.into_iter()
            .fold(Self::NONE, |acc, day| Self(acc.0 | Self::bit(day)))
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn mask(&self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for DaysOfWeek {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A recurring daily window, possibly crossing midnight.
///
/// For an overnight window (`end < start`) the part after midnight belongs to
/// the previous day, so `days` is checked against the weekday the window
/// opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: DaysOfWeek,
    pub start: WallClock,
    pub end: WallClock,
}

impl TimeWindow {
    pub fn new(days: DaysOfWeek, start: WallClock, end: WallClock) -> Self {
        Self { days, start, end }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    /// A window whose start equals its end never contains anything
    pub fn is_empty(&self) -> bool {
        self.start == self.end || self.days.is_empty()
    }

    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        let time = WallClock::from_naive_time(dt.time());
        let today = dt.weekday();

        if self.start < self.end {
            self.days.contains(today) && time >= self.start && time < self.end
        } else if self.crosses_midnight() {
            (time >= self.start && self.days.contains(today))
                || (time < self.end && self.days.contains(today.pred()))
        } else {
            false
        }
    }

    /// Time left until the window closes, if `dt` is inside it
    pub fn remaining(&self, dt: &DateTime<Local>) -> Option<Duration> {
        if !self.contains(dt) {
            return None;
        }

        let now_secs = dt.time().num_seconds_from_midnight();
        let end_secs = self.end.seconds_from_midnight();
        let secs = if end_secs > now_secs {
            end_secs - now_secs
        } else {
            SECONDS_PER_DAY - now_secs + end_secs
        };
        Some(Duration::from_secs(u64::from(secs)))
    }
}

/// Human-readable duration such as `1h 5m 3s`
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m {seconds}s"),
        _ => format!("{hours}h {minutes}m {seconds}s"),
    }
}
