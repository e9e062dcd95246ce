//! Configuration validation

use crate::schema::{RawConfig, RawDays, RawPreset, RawPresetKind};
use gatekeep_api::{MAX_TIMED_DURATION, TriggerMode};
use gatekeep_util::{DaysOfWeek, WallClock};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Preset '{preset}': {message}")]
    PresetError { preset: String, message: String },

    #[error("Duplicate preset name: {0}")]
    DuplicatePresetName(String),

    #[error("Preset '{preset}' refers to unknown selection '{selection}'")]
    UnknownSelection { preset: String, selection: String },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Invalid day specification: {0}")]
    InvalidDaySpec(String),

    #[error("Setting '{key}' must be positive")]
    NonPositiveSetting { key: &'static str },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let positive = [
        (
            "sessions.window_check_interval_seconds",
            config.sessions.window_check_interval_seconds,
        ),
        ("sessions.history_limit", config.sessions.history_limit.map(|n| n as u64)),
        (
            "background.session_check_interval_seconds",
            config.background.session_check_interval_seconds,
        ),
        (
            "background.sensor_refresh_interval_seconds",
            config.background.sensor_refresh_interval_seconds,
        ),
        ("background.time_budget_seconds", config.background.time_budget_seconds),
    ];
    for (key, value) in positive {
        if value == Some(0) {
            errors.push(ValidationError::NonPositiveSetting { key });
        }
    }

    if let (Some(budget), Some(interval)) = (
        config.background.time_budget_seconds,
        config.background.session_check_interval_seconds,
    ) && budget >= interval
        && interval > 0
    {
        errors.push(ValidationError::GlobalError(format!(
            "background time budget ({budget}s) must be shorter than the session check interval ({interval}s)"
        )));
    }

    let mut seen_names = HashSet::new();
    for preset in &config.presets {
        if !seen_names.insert(&preset.name) {
            errors.push(ValidationError::DuplicatePresetName(preset.name.clone()));
        }
    }

    for preset in &config.presets {
        errors.extend(validate_preset(preset, config));
    }

    errors
}

fn validate_preset(preset: &RawPreset, config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let fail = |message: &str| ValidationError::PresetError {
        preset: preset.name.clone(),
        message: message.to_string(),
    };

    if preset.name.trim().is_empty() {
        errors.push(fail("name cannot be empty"));
    }

    match &preset.kind {
        RawPresetKind::Timed { duration_seconds } => {
            if *duration_seconds == 0 {
                errors.push(fail("duration_seconds must be positive"));
            } else if *duration_seconds > MAX_TIMED_DURATION.as_secs() {
                errors.push(fail("duration_seconds is longer than a year"));
            }
        }
        RawPresetKind::Checklist { items } => {
            if items.is_empty() {
                errors.push(fail("checklist needs at least one item"));
            }
            if items.iter().any(|item| item.trim().is_empty()) {
                errors.push(fail("checklist item ids cannot be empty"));
            }
        }
        RawPresetKind::Geofenced {
            latitude,
            longitude,
            radius_meters,
            trigger,
        } => {
            if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) {
                errors.push(fail("center coordinate is out of range"));
            }
            if *radius_meters <= 0.0 {
                errors.push(fail("radius_meters must be positive"));
            }
            if let Err(e) = parse_trigger(trigger) {
                errors.push(fail(&e));
            }
        }
        RawPresetKind::StepGoal { target, .. } => {
            if *target == 0 {
                errors.push(fail("step target must be positive"));
            }
        }
        RawPresetKind::Scheduled { days, start, end } => {
            errors.extend(validate_window(&preset.name, days, start, end));
        }
        RawPresetKind::SleepWindow { days, bedtime, wake } => {
            errors.extend(validate_window(&preset.name, days, bedtime, wake));
        }
    }

    if let Some(selection) = &preset.selection
        && !config.selections.contains_key(selection)
    {
        errors.push(ValidationError::UnknownSelection {
            preset: preset.name.clone(),
            selection: selection.clone(),
        });
    }

    errors
}

fn validate_window(preset: &str, days: &RawDays, start: &str, end: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(e) = parse_days(days) {
        errors.push(ValidationError::InvalidDaySpec(e));
    }

    let parsed_start = parse_time(start).map_err(|e| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: start.to_string(),
            message: e,
        })
    });
    let parsed_end = parse_time(end).map_err(|e| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: end.to_string(),
            message: e,
        })
    });

    if let (Ok(start), Ok(end)) = (parsed_start, parsed_end)
        && start == end
    {
        errors.push(ValidationError::PresetError {
            preset: preset.to_string(),
            message: "window start and end are equal".into(),
        });
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<WallClock, String> {
    s.parse()
}

/// Parse days specification
pub fn parse_days(days: &RawDays) -> Result<DaysOfWeek, String> {
    match days {
        RawDays::Preset(preset) => match preset.to_lowercase().as_str() {
            "all" | "every" | "daily" => Ok(DaysOfWeek::ALL_DAYS),
            "weekdays" => Ok(DaysOfWeek::WEEKDAYS),
            "weekends" => Ok(DaysOfWeek::WEEKENDS),
            other => Err(format!("Unknown day preset: {}", other)),
        },
        RawDays::List(list) => {
            let mut mask = 0u8;
            for day in list {
                let bit = match day.to_lowercase().as_str() {
                    "mon" | "monday" => 1 << 0,
                    "tue" | "tuesday" => 1 << 1,
                    "wed" | "wednesday" => 1 << 2,
                    "thu" | "thursday" => 1 << 3,
                    "fri" | "friday" => 1 << 4,
                    "sat" | "saturday" => 1 << 5,
                    "sun" | "sunday" => 1 << 6,
                    other => return Err(format!("Unknown day: {}", other)),
                };
                mask |= bit;
            }
            if mask == 0 {
                return Err("Day list is empty".into());
            }
            Ok(DaysOfWeek::new(mask))
        }
    }
}

/// Parse a geofence trigger mode
pub fn parse_trigger(s: &str) -> Result<TriggerMode, String> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "on_enter" => Ok(TriggerMode::OnEnter),
        "while_inside" => Ok(TriggerMode::WhileInside),
        "on_exit" => Ok(TriggerMode::OnExit),
        other => Err(format!("Unknown trigger mode: {}", other)),
    }
}
