//! Events emitted by tasks

use std::fmt;
use std::sync::Arc;
use warden_util::TaskId;

use crate::{TaskError, TaskHandle};

/// What happened
#[derive(Debug)]
pub enum Payload {
    /// One token of terminal output, decoded lossily as UTF-8
    Output { chunk: String },

    /// The task has finished. This is always the last event of a task.
    /// `error` is `None` only for a clean exit.
    Ended { error: Option<TaskError> },
}

/// An event tagged with the task that produced it
#[derive(Debug)]
pub struct Event {
    source: Arc<TaskHandle>,
    payload: Payload,
}

impl Event {
    pub(crate) fn output(source: &Arc<TaskHandle>, token: Vec<u8>) -> Self {
        let chunk = match String::from_utf8(token) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Self {
            source: Arc::clone(source),
            payload: Payload::Output { chunk },
        }
    }

    pub(crate) fn ended(source: &Arc<TaskHandle>, error: Option<TaskError>) -> Self {
        Self {
            source: Arc::clone(source),
            payload: Payload::Ended { error },
        }
    }

    /// The task this event came from. Use it to kill or respawn the task.
    pub fn source(&self) -> &Arc<TaskHandle> {
        &self.source
    }

    pub fn task_id(&self) -> TaskId {
        self.source.id()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.payload, Payload::Ended { .. })
    }

    /// Output text, if this is an output event
    pub fn chunk(&self) -> Option<&str> {
        match &self.payload {
            Payload::Output { chunk } => Some(chunk),
            Payload::Ended { .. } => None,
        }
    }

    /// Failure carried by an `Ended` event
    pub fn error(&self) -> Option<&TaskError> {
        match &self.payload {
            Payload::Ended { error } => error.as_ref(),
            Payload::Output { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Output { chunk } => write!(f, "{}: {}", self.source, chunk),
            Payload::Ended { error: None } => write!(f, "{}: ended", self.source),
            Payload::Ended { error: Some(e) } => write!(f, "{}: ended: {}", self.source, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandSpec, ExitStatus};

    #[test]
    fn output_is_lossy_utf8() {
        let handle = TaskHandle::unstarted(CommandSpec::new("cat"));
        let event = Event::output(&handle, vec![b'o', b'k', 0xff]);
        assert_eq!(event.chunk(), Some("ok\u{fffd}"));
        assert!(!event.is_ended());
        assert!(event.error().is_none());
    }

    #[test]
    fn ended_carries_error() {
        let handle = TaskHandle::unstarted(CommandSpec::new("false"));
        let event = Event::ended(&handle, Some(TaskError::Exited(ExitStatus::with_code(1))));

        assert!(event.is_ended());
        assert_eq!(event.task_id(), handle.id());
        assert_eq!(
            event.error().and_then(TaskError::exit_status),
            Some(ExitStatus::with_code(1))
        );
        assert!(event.to_string().ends_with("ended: Process exited unsuccessfully: exit code 1"));

        match event.into_payload() {
            Payload::Ended {
                error: Some(TaskError::Exited(status)),
            } => assert_eq!(status.code, Some(1)),
            other => panic!("expected an unsuccessful end, got {:?}", other),
        }
    }
}
