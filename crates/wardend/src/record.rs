//! Rendering of task events on stdout

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, Write};
use warden_task::{Event, Payload};
use warden_util::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Output chunks as lines, task ends as annotated lines
    Text,
    /// One JSON object per event
    Json,
}

/// Serialisable view of one event
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    pub task_id: TaskId,
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub kind: RecordKind<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind<'a> {
    Output {
        chunk: &'a str,
    },
    Ended {
        error: Option<String>,
        exit_code: Option<i32>,
        signal: Option<i32>,
    },
}

impl<'a> EventRecord<'a> {
    pub fn new(event: &'a Event, timestamp: DateTime<Local>) -> Self {
        let kind = match event.payload() {
            Payload::Output { chunk } => RecordKind::Output { chunk },
            Payload::Ended { error } => {
                let status = error.as_ref().and_then(|e| e.exit_status());
                RecordKind::Ended {
                    error: error.as_ref().map(ToString::to_string),
                    exit_code: status.and_then(|s| s.code),
                    signal: status.and_then(|s| s.signal),
                }
            }
        };

        Self {
            task_id: event.task_id(),
            timestamp,
            kind,
        }
    }
}

pub fn write_event(out: &mut impl Write, format: OutputFormat, event: &Event) -> io::Result<()> {
    match format {
        OutputFormat::Text => match event.chunk() {
            Some(chunk) => writeln!(out, "{}", chunk)?,
            None => writeln!(out, "[warden] {}", event)?,
        },
        OutputFormat::Json => {
            let record = EventRecord::new(event, warden_util::now());
            serde_json::to_writer(&mut *out, &record)?;
            writeln!(out)?;
        }
    }
    out.flush()
}
