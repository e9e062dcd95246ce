//! Config validation CLI tool
//!
//! Validates a gatekeep configuration file and reports any errors.

use gatekeep_api::SessionVariant;
use gatekeep_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a gatekeep configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match gatekeep_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", gatekeep_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", settings.service.data_dir.display());
            println!(
                "  Window check: every {}",
                format_duration(settings.sessions.window_check_interval)
            );
            println!("  Selections: {}", settings.selections.len());
            println!("  Presets: {}", settings.presets.len());

            if !settings.presets.is_empty() {
                println!();
                println!("Presets:");
                for preset in &settings.presets {
                    let detail = match &preset.variant {
                        SessionVariant::Timed(t) => format_duration(t.duration),
                        SessionVariant::Scheduled(s) => format!("{}-{}", s.start, s.end),
                        SessionVariant::Checklist(c) => format!("{} items", c.items.len()),
                        SessionVariant::Geofenced(g) => format!("{}m radius", g.radius_meters),
                        SessionVariant::StepGoal(s) => format!("{} steps", s.target),
                        SessionVariant::SleepWindow(s) => format!("{}-{}", s.bedtime, s.wake),
                    };
                    println!(
                        "  - {} [{}]: {}",
                        preset.name,
                        preset.variant.kind(),
                        detail
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                gatekeep_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                gatekeep_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                gatekeep_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                gatekeep_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        gatekeep_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
