//! Configuration validation

use crate::schema::{RawCommand, RawConfig, RawFlagValue, RawSplit};
use thiserror::Error;
use warden_task::{Delimiters, RegexDelimiter};

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Command: {0}")]
    CommandError(String),

    #[error("Flag '{name}': {message}")]
    FlagError { name: String, message: String },

    #[error("Restart: {0}")]
    RestartError(String),

    #[error("Output split: {0}")]
    SplitError(String),

    #[error("Output: {0}")]
    OutputError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_command(&config.command);

    if config.restart.max_failures == Some(0) {
        errors.push(ValidationError::RestartError(
            "max_failures must be at least 1".into(),
        ));
    }
    if config.restart.within_ms == Some(0) {
        errors.push(ValidationError::RestartError(
            "within_ms must be greater than 0".into(),
        ));
    }

    if let Some(split) = &config.output.split
        && let Err(e) = validate_split(split)
    {
        errors.push(e);
    }

    if config.output.max_token_bytes == Some(0) {
        errors.push(ValidationError::OutputError(
            "max_token_bytes must be greater than 0".into(),
        ));
    }

    errors
}

fn validate_command(command: &RawCommand) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if command.program.trim().is_empty() {
        errors.push(ValidationError::CommandError("program cannot be empty".into()));
    }

    for (name, value) in &command.flags {
        if name.is_empty() {
            errors.push(ValidationError::FlagError {
                name: name.clone(),
                message: "name cannot be empty".into(),
            });
        } else if name.starts_with('-') {
            errors.push(ValidationError::FlagError {
                name: name.clone(),
                message: "name must not include its prefix".into(),
            });
        }

        if let RawFlagValue::List(values) = value
            && values.is_empty()
        {
            errors.push(ValidationError::FlagError {
                name: name.clone(),
                message: "list cannot be empty".into(),
            });
        }
    }

    if let Some(cwd) = &command.cwd
        && cwd.as_os_str().is_empty()
    {
        errors.push(ValidationError::CommandError("cwd cannot be empty".into()));
    }

    errors
}

/// Check that a split policy can be built
pub fn validate_split(split: &RawSplit) -> Result<(), ValidationError> {
    match split {
        RawSplit::Lines => Ok(()),
        RawSplit::Delimiters { bytes } => Delimiters::new(bytes.as_bytes())
            .map(|_| ())
            .map_err(|e| ValidationError::SplitError(e.to_string())),
        RawSplit::Regex { pattern } => RegexDelimiter::new(pattern)
            .map(|_| ())
            .map_err(|e| ValidationError::SplitError(e.to_string())),
    }
}
