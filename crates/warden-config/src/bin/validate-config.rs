//! Config validation CLI tool
//!
//! Validates a warden configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use warden_util::default_config_path;

fn main() -> ExitCode {
    let config_path = match std::env::args().nth(1) {
        Some(arg) if arg == "-h" || arg == "--help" => {
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a warden configuration file.");
            eprintln!("Without a path, validates {}", default_config_path().display());
            return ExitCode::from(2);
        }
        Some(path) => PathBuf::from(path),
        None => default_config_path(),
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match warden_config::load_config(&config_path) {
        Ok(profile) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", warden_config::CURRENT_CONFIG_VERSION);
            println!("  Program: {}", profile.command.display_name());
            if !profile.command.args.is_empty() {
                println!("  Arguments: {}", profile.command.args.join(" "));
            }
            println!(
                "  Restart: up to {} failures within {}ms ({:?})",
                profile.restart.max_failures,
                profile.restart.within.as_millis(),
                profile.restart.trip
            );
            println!("  Split: {}", profile.split);
            println!("  Max token: {} bytes", profile.options.max_token_size);
            println!("  Shutdown grace: {}ms", profile.grace.as_millis());

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                warden_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                warden_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                warden_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                warden_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        warden_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
