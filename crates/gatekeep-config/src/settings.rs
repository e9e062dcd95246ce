//! Validated settings structures

use crate::schema::{
    RawBackgroundConfig, RawConfig, RawPreset, RawPresetKind, RawServiceConfig, RawSessionsConfig,
};
use crate::validation::{parse_days, parse_time, parse_trigger};
use gatekeep_api::{Coordinate, Recurrence, RestrictionSet, SessionVariant, TriggerMode};
use gatekeep_util::{DaysOfWeek, ItemId, WallClock, default_data_dir};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WINDOW_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_TERMINATION_THRESHOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_SENSOR_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(25);

const ENFORCEMENT_FILENAME: &str = "enforced.json";

/// Validated configuration ready for use by the coordinator and the service
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub sessions: SessionsConfig,
    pub background: BackgroundConfig,
    pub selections: BTreeMap<String, RestrictionSet>,
    pub presets: Vec<Preset>,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            sessions: SessionsConfig::from_raw(raw.sessions),
            background: BackgroundConfig::from_raw(raw.background),
            presets: raw.presets.into_iter().filter_map(Preset::from_raw).collect(),
            selections: raw.selections,
        }
    }

    /// Get preset by name
    pub fn preset(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Restriction set a preset refers to
    pub fn preset_selection(&self, preset: &Preset) -> Option<&RestrictionSet> {
        preset.selection.as_ref().and_then(|name| self.selections.get(name))
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub enforcement_file: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let data_dir = raw.data_dir.unwrap_or_else(default_data_dir);
        let enforcement_file = raw
            .enforcement_file
            .unwrap_or_else(|| data_dir.join(ENFORCEMENT_FILENAME));
        Self {
            data_dir,
            enforcement_file,
        }
    }

    /// Move the data directory. An enforcement file inside it moves along.
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        if let Ok(relative) = self.enforcement_file.strip_prefix(&self.data_dir) {
            self.enforcement_file = data_dir.join(relative);
        }
        self.data_dir = data_dir;
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Coordinator tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SessionsConfig {
    pub window_check_interval: Duration,
    pub history_limit: usize,
    pub termination_threshold: Duration,
}

impl SessionsConfig {
    fn from_raw(raw: RawSessionsConfig) -> Self {
        Self {
            window_check_interval: raw
                .window_check_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WINDOW_CHECK_INTERVAL),
            history_limit: raw.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            termination_threshold: raw
                .termination_threshold_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TERMINATION_THRESHOLD),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self::from_raw(RawSessionsConfig::default())
    }
}

/// Background wake-up cadence and budget
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundConfig {
    pub session_check_interval: Duration,
    pub sensor_refresh_interval: Duration,
    pub time_budget: Duration,
}

impl BackgroundConfig {
    fn from_raw(raw: RawBackgroundConfig) -> Self {
        Self {
            session_check_interval: raw
                .session_check_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SESSION_CHECK_INTERVAL),
            sensor_refresh_interval: raw
                .sensor_refresh_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SENSOR_REFRESH_INTERVAL),
            time_budget: raw
                .time_budget_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIME_BUDGET),
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self::from_raw(RawBackgroundConfig::default())
    }
}

/// Validated session template
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub selection: Option<String>,
    pub variant: SessionVariant,
}

impl Preset {
    /// `None` only for presets validation would have rejected
    fn from_raw(raw: RawPreset) -> Option<Self> {
        let variant = convert_kind(raw.kind)?;
        Some(Self {
            name: raw.name,
            selection: raw.selection,
            variant,
        })
    }
}

fn convert_kind(raw: RawPresetKind) -> Option<SessionVariant> {
    let variant = match raw {
        RawPresetKind::Timed { duration_seconds } => {
            SessionVariant::timed(Duration::from_secs(duration_seconds))
        }
        RawPresetKind::Scheduled { days, start, end } => SessionVariant::scheduled(
            recurrence_for(parse_days(&days).ok()?),
            parse_time(&start).ok()?,
            parse_time(&end).ok()?,
        ),
        RawPresetKind::Checklist { items } => {
            SessionVariant::checklist(items.into_iter().map(ItemId::new))
        }
        RawPresetKind::Geofenced {
            latitude,
            longitude,
            radius_meters,
            trigger,
        } => SessionVariant::geofenced(
            Coordinate {
                latitude,
                longitude,
            },
            radius_meters,
            parse_trigger(&trigger).unwrap_or(TriggerMode::WhileInside),
        ),
        RawPresetKind::StepGoal {
            target,
            daily_reset,
        } => SessionVariant::step_goal(target, daily_reset),
        RawPresetKind::SleepWindow {
            days,
            bedtime,
            wake,
        } => {
            let bedtime: WallClock = parse_time(&bedtime).ok()?;
            SessionVariant::sleep_window(bedtime, parse_time(&wake).ok()?, parse_days(&days).ok()?)
        }
    };
    Some(variant)
}

fn recurrence_for(days: DaysOfWeek) -> Recurrence {
    match days {
        DaysOfWeek::ALL_DAYS => Recurrence::Daily,
        DaysOfWeek::WEEKDAYS => Recurrence::Weekdays,
        DaysOfWeek::WEEKENDS => Recurrence::Weekends,
        other => Recurrence::Custom(other),
    }
}
