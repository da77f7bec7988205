//! Validated profile structures

use crate::schema::{RawCommand, RawConfig, RawFlagValue, RawSplit, RawTrip};
use crate::validation::ValidationError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{Supervisor, TripCondition};
use warden_task::{
    CommandBuilder, CommandSpec, Delimiters, FlagValue, Lines, RegexDelimiter, SplitConfigError,
    Splitter, TaskOptions, DEFAULT_MAX_TOKEN_SIZE,
};

pub const DEFAULT_MAX_FAILURES: usize = 5;
pub const DEFAULT_WITHIN: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Validated configuration ready for supervision
#[derive(Debug, Clone)]
pub struct Profile {
    pub command: CommandSpec,
    pub split: SplitPolicy,
    pub restart: RestartPolicy,
    pub options: TaskOptions,
    /// Time between SIGTERM and SIGKILL on shutdown
    pub grace: Duration,
}

impl Profile {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let max_token_size = raw.output.max_token_bytes.unwrap_or(DEFAULT_MAX_TOKEN_SIZE);

        Self {
            command: build_command(raw.command),
            split: raw.output.split.map(SplitPolicy::from).unwrap_or_default(),
            restart: RestartPolicy {
                max_failures: raw
                    .restart
                    .max_failures
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_MAX_FAILURES),
                within: raw
                    .restart
                    .within_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WITHIN),
                trip: raw.restart.trip.map(TripCondition::from).unwrap_or_default(),
            },
            options: TaskOptions {
                max_token_size,
                ..TaskOptions::default()
            },
            grace: raw
                .shutdown
                .grace_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_GRACE),
        }
    }

    /// Defaults for a bare command line
    pub fn for_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: CommandBuilder::new(program).args(args).build(),
            split: SplitPolicy::default(),
            restart: RestartPolicy::default(),
            options: TaskOptions::default(),
            grace: DEFAULT_GRACE,
        }
    }
}

fn build_command(raw: RawCommand) -> CommandSpec {
    let mut builder = CommandBuilder::new(raw.program);
    for (name, value) in raw.flags {
        builder = builder.flag(name, FlagValue::from(value));
    }
    if let Some(separator) = raw.flags_separator {
        builder = builder.separator(separator);
    }

    let mut spec = builder
        .args(raw.args)
        .build()
        .inherit_env(raw.inherit_env.unwrap_or(true));
    spec.env.extend(raw.env);
    spec.cwd = raw.cwd;
    spec
}

impl From<RawFlagValue> for FlagValue {
    fn from(value: RawFlagValue) -> Self {
        match value {
            RawFlagValue::Bool(b) => FlagValue::Bool(b),
            RawFlagValue::Int(n) => FlagValue::Int(n),
            RawFlagValue::Str(s) => FlagValue::Str(s),
            RawFlagValue::List(values) => FlagValue::List(values),
        }
    }
}

impl From<RawTrip> for TripCondition {
    fn from(trip: RawTrip) -> Self {
        match trip {
            RawTrip::OldestExpired => TripCondition::OldestExpired,
            RawTrip::WithinDuration => TripCondition::WithinDuration,
        }
    }
}

/// Failure window settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_failures: usize,
    pub within: Duration,
    pub trip: TripCondition,
}

impl RestartPolicy {
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.max_failures, self.within).with_trip(self.trip)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            within: DEFAULT_WITHIN,
            trip: TripCondition::default(),
        }
    }
}

/// How task output is cut into events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SplitPolicy {
    #[default]
    Lines,
    Delimiters(Vec<u8>),
    Regex(String),
}

impl SplitPolicy {
    pub fn splitter(&self) -> Result<Arc<dyn Splitter>, SplitConfigError> {
        Ok(match self {
            SplitPolicy::Lines => Arc::new(Lines),
            SplitPolicy::Delimiters(bytes) => Arc::new(Delimiters::new(bytes)?),
            SplitPolicy::Regex(pattern) => Arc::new(RegexDelimiter::new(pattern)?),
        })
    }
}

impl From<RawSplit> for SplitPolicy {
    fn from(raw: RawSplit) -> Self {
        match raw {
            RawSplit::Lines => SplitPolicy::Lines,
            RawSplit::Delimiters { bytes } => SplitPolicy::Delimiters(bytes.into_bytes()),
            RawSplit::Regex { pattern } => SplitPolicy::Regex(pattern),
        }
    }
}

/// Parses `lines`, `delimiters:<bytes>` or `regex:<pattern>`
impl FromStr for SplitPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = match s.split_once(':') {
            None if s == "lines" => RawSplit::Lines,
            Some(("delimiters", bytes)) => RawSplit::Delimiters {
                bytes: bytes.to_string(),
            },
            Some(("regex", pattern)) => RawSplit::Regex {
                pattern: pattern.to_string(),
            },
            _ => {
                return Err(ValidationError::SplitError(format!(
                    "unknown split '{}', expected lines, delimiters:<bytes> or regex:<pattern>",
                    s
                )));
            }
        };
        crate::validate_split(&raw)?;
        Ok(raw.into())
    }
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitPolicy::Lines => write!(f, "lines"),
            SplitPolicy::Delimiters(bytes) => write!(f, "delimiters:{}", bytes.escape_ascii()),
            SplitPolicy::Regex(pattern) => write!(f, "regex:{}", pattern),
        }
    }
}
