//! Raw configuration schema (as parsed from TOML)

use gatekeep_api::RestrictionSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub sessions: RawSessionsConfig,

    #[serde(default)]
    pub background: RawBackgroundConfig,

    /// Named restriction sets presets can refer to
    #[serde(default)]
    pub selections: BTreeMap<String, RestrictionSet>,

    /// Session templates
    #[serde(default)]
    pub presets: Vec<RawPreset>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Where the desktop enforcer writes the merged restriction set
    pub enforcement_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSessionsConfig {
    /// How often scheduled and sleep windows are re-evaluated
    pub window_check_interval_seconds: Option<u64>,

    /// Number of completed sessions kept in history
    pub history_limit: Option<usize>,

    /// Foreground/background gap that flags an uncontrolled termination
    pub termination_threshold_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBackgroundConfig {
    pub session_check_interval_seconds: Option<u64>,
    pub sensor_refresh_interval_seconds: Option<u64>,

    /// Upper bound for a single background wake-up
    pub time_budget_seconds: Option<u64>,
}

/// Session template
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawPreset {
    pub name: String,

    /// Name of a `[selections.<name>]` table
    pub selection: Option<String>,

    pub kind: RawPresetKind,
}

/// Kind-specific preset parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawPresetKind {
    Timed {
        duration_seconds: u64,
    },
    Scheduled {
        days: RawDays,
        start: String,
        end: String,
    },
    Checklist {
        items: Vec<String>,
    },
    Geofenced {
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        /// "on_enter", "while_inside" or "on_exit"
        #[serde(default = "default_trigger")]
        trigger: String,
    },
    StepGoal {
        target: u64,
        #[serde(default)]
        daily_reset: bool,
    },
    SleepWindow {
        #[serde(default = "default_sleep_days")]
        days: RawDays,
        bedtime: String,
        wake: String,
    },
}

/// Days specification
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDays {
    Preset(String),
    List(Vec<String>),
}

fn default_trigger() -> String {
    "while_inside".to_string()
}

fn default_sleep_days() -> RawDays {
    RawDays::Preset("all".to_string())
}
