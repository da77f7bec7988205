//! Restart decisions over a sliding window of failures

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_task::{Event, Task};
use warden_util::MonotonicInstant;

use crate::{SupervisorError, SupervisorResult};

/// When a full failure window counts as exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TripCondition {
    /// Give up once the oldest strike is at least `within` old.
    ///
    /// This is the historical policy: a full window of failures spread over
    /// more than `within` trips, while a burst inside `within` keeps
    /// shifting the window and respawning.
    #[default]
    OldestExpired,

    /// Give up once the whole window of failures happened within `within`
    WithinDuration,
}

/// Outcome of one failure against the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The window had room; the strike was appended
    Recorded,
    /// The window was full; the oldest strike was dropped for this one
    Shifted,
    /// Too many failures; the window has been cleared
    Exhausted,
}

/// Result of feeding an event to the supervisor
#[derive(Debug)]
pub enum Supervised {
    /// Not an end of task; keep reading the same task
    Continue,
    /// The task ended and was replaced; read from this one from now on
    Respawned(Task),
}

/// Decides, for every `Ended` event, whether to respawn the task.
///
/// Holds up to `max_failures` failure timestamps, oldest first. Only the
/// single loop consuming a task's events should drive it.
#[derive(Debug)]
pub struct Supervisor {
    max_failures: usize,
    within: Duration,
    trip: TripCondition,
    window: VecDeque<MonotonicInstant>,
    exhausted: bool,
}

impl Supervisor {
    pub fn new(max_failures: usize, within: Duration) -> Self {
        Self {
            max_failures,
            within,
            trip: TripCondition::default(),
            window: VecDeque::with_capacity(max_failures),
            exhausted: false,
        }
    }

    pub fn with_trip(mut self, trip: TripCondition) -> Self {
        self.trip = trip;
        self
    }

    pub fn max_failures(&self) -> usize {
        self.max_failures
    }

    pub fn within(&self) -> Duration {
        self.within
    }

    pub fn trip(&self) -> TripCondition {
        self.trip
    }

    /// Failures currently held in the window
    pub fn failures(&self) -> usize {
        self.window.len()
    }

    /// Whether exhaustion has been reported and not yet reset
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Empty the window and accept events again after exhaustion
    pub fn reset(&mut self) {
        debug!("Supervisor reset");
        self.window.clear();
        self.exhausted = false;
    }

    /// Apply `event`, respawning its task if it ended and the window allows.
    ///
    /// After an [`SupervisorError::Exhausted`] every further `Ended` event is
    /// refused with [`SupervisorError::Stopped`] until [`reset`](Self::reset).
    pub fn handle_event(&mut self, event: &Event) -> SupervisorResult<Supervised> {
        self.handle_event_at(event, MonotonicInstant::now())
    }

    pub fn handle_event_at(
        &mut self,
        event: &Event,
        now: MonotonicInstant,
    ) -> SupervisorResult<Supervised> {
        if !event.is_ended() {
            return Ok(Supervised::Continue);
        }
        if self.exhausted {
            warn!(task_id = %event.task_id(), "Supervision already exhausted, not respawning");
            return Err(SupervisorError::Stopped);
        }

        if self.record_failure_at(now) == Verdict::Exhausted {
            let last = event.error().map(ToString::to_string);
            warn!(
                task_id = %event.task_id(),
                max_failures = self.max_failures,
                within_ms = self.within.as_millis() as u64,
                last_error = last.as_deref().unwrap_or("none"),
                "Supervision exhausted"
            );
            return Err(SupervisorError::Exhausted {
                max_failures: self.max_failures,
                within: self.within,
                last,
            });
        }

        let task = event.source().respawn()?;
        info!(
            old_task_id = %event.task_id(),
            task_id = %task.id(),
            failures = self.window.len(),
            "Task respawned"
        );
        Ok(Supervised::Respawned(task))
    }

    /// Record one failure at `now` and decide what follows
    pub fn record_failure_at(&mut self, now: MonotonicInstant) -> Verdict {
        if self.window.len() < self.max_failures {
            self.window.push_back(now);
            debug!(failures = self.window.len(), "Failure recorded");
            return Verdict::Recorded;
        }

        let tripped = match self.window.front() {
            Some(&oldest) => {
                let age = now.duration_since(oldest);
                match self.trip {
                    TripCondition::OldestExpired => age >= self.within,
                    TripCondition::WithinDuration => age < self.within,
                }
            }
            // A window without capacity trips on the first failure
            None => true,
        };

        if tripped {
            self.window.clear();
            self.exhausted = true;
            return Verdict::Exhausted;
        }

        self.window.pop_front();
        self.window.push_back(now);
        debug!(failures = self.window.len(), "Failure window shifted");
        Verdict::Shifted
    }
}
