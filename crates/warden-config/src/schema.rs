//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// The supervised program
    pub command: RawCommand,

    #[serde(default)]
    pub restart: RawRestart,

    #[serde(default)]
    pub output: RawOutput,

    #[serde(default)]
    pub shutdown: RawShutdown,
}

/// Program to run, expanded through the command builder
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCommand {
    pub program: String,

    /// Positional arguments, after all flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Flags by name; single-character names get a `-` prefix, others `--`
    #[serde(default)]
    pub flags: BTreeMap<String, RawFlagValue>,

    /// Placed between the flags and the positional arguments
    pub flags_separator: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Start from the parent's environment (default: true)
    pub inherit_env: Option<bool>,

    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawFlagValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

/// Failure window settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRestart {
    pub max_failures: Option<u64>,
    pub within_ms: Option<u64>,
    pub trip: Option<RawTrip>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTrip {
    OldestExpired,
    WithinDuration,
}

/// Output tokenization settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawOutput {
    pub split: Option<RawSplit>,
    pub max_token_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawSplit {
    Lines,
    Delimiters {
        /// Every byte of this string is a delimiter
        bytes: String,
    },
    Regex {
        pattern: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawShutdown {
    /// Time between SIGTERM and SIGKILL
    pub grace_ms: Option<u64>,
}
