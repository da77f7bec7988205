//! The supervising loop

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use warden_task::{Event, Task};
use warden_util::TaskId;

use crate::{Supervised, Supervisor, SupervisorError, SupervisorResult};

/// How a supervised run stopped on request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown {
    /// Task that was live when shutdown was requested
    pub task_id: TaskId,
    /// Whether the grace period ran out and the task had to be killed
    pub forced: bool,
}

enum Step {
    Event(Option<Event>),
    Shutdown,
}

/// Drive `task` under `supervisor` until supervision fails or `shutdown`
/// resolves.
///
/// Every event, including those of respawned tasks, is passed to `on_event`
/// before the supervisor sees it. On shutdown the live task gets SIGTERM and
/// `grace` to end before it is killed; its remaining events are still
/// reported.
pub async fn supervise<S, F>(
    mut task: Task,
    supervisor: &mut Supervisor,
    shutdown: S,
    grace: Duration,
    mut on_event: F,
) -> SupervisorResult<Shutdown>
where
    S: Future<Output = ()>,
    F: FnMut(&Event),
{
    tokio::pin!(shutdown);

    loop {
        let step = tokio::select! {
            _ = &mut shutdown => Step::Shutdown,
            event = task.recv() => Step::Event(event),
        };

        let event = match step {
            Step::Shutdown => return Ok(shut_down(task, grace, &mut on_event).await),
            Step::Event(Some(event)) => event,
            Step::Event(None) => return Err(SupervisorError::SourceClosed),
        };

        on_event(&event);

        match supervisor.handle_event(&event)? {
            Supervised::Continue => {}
            Supervised::Respawned(next) => task = next,
        }
    }
}

async fn shut_down<F>(mut task: Task, grace: Duration, on_event: &mut F) -> Shutdown
where
    F: FnMut(&Event),
{
    info!(task_id = %task.id(), grace_ms = grace.as_millis() as u64, "Shutting down task");

    if let Err(e) = task.terminate() {
        warn!(task_id = %task.id(), error = %e, "Failed to terminate task");
    }

    let forced = timeout(grace, drain(&mut task, on_event)).await.is_err();
    if forced {
        warn!(task_id = %task.id(), "Task outlived grace period, killing");
        if let Err(e) = task.kill() {
            warn!(task_id = %task.id(), error = %e, "Failed to kill task");
        }
        drain(&mut task, on_event).await;
    }

    info!(task_id = %task.id(), forced, "Task shut down");
    Shutdown {
        task_id: task.id(),
        forced,
    }
}

async fn drain<F>(task: &mut Task, on_event: &mut F)
where
    F: FnMut(&Event),
{
    while let Some(event) = task.recv().await {
        on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TripCondition;
    use std::future;
    use warden_task::{CommandSpec, Lines};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn follows_respawns_until_exhausted() {
        let task = Task::spawn(sh("echo run; exit 1"), Lines).unwrap();
        let mut sup = Supervisor::new(2, Duration::from_secs(5)).with_trip(TripCondition::WithinDuration);

        let mut outputs = 0;
        let mut ends = 0;
        let result = timeout(
            Duration::from_secs(20),
            supervise(task, &mut sup, future::pending(), Duration::from_secs(1), |event| {
                if event.is_ended() {
                    ends += 1;
                } else {
                    outputs += 1;
                }
            }),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(SupervisorError::Exhausted { max_failures: 2, .. })));
        assert_eq!(ends, 3);
        assert_eq!(outputs, 3);
    }

    #[tokio::test]
    async fn graceful_shutdown() {
        let task = Task::spawn(CommandSpec::new("sleep").arg("30"), Lines).unwrap();
        let id = task.id();
        let mut sup = Supervisor::new(1, Duration::from_secs(1));

        let mut ended = false;
        let outcome = supervise(
            task,
            &mut sup,
            tokio::time::sleep(Duration::from_millis(100)),
            Duration::from_secs(5),
            |event| ended |= event.is_ended(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, Shutdown { task_id: id, forced: false });
        assert!(ended);
        // Shutdown is not a failure
        assert_eq!(sup.failures(), 0);
    }

    #[tokio::test]
    async fn kill_after_grace_period() {
        let task = Task::spawn(sh("trap '' TERM; sleep 30"), Lines).unwrap();
        let mut sup = Supervisor::new(1, Duration::from_secs(1));

        let outcome = supervise(
            task,
            &mut sup,
            tokio::time::sleep(Duration::from_millis(300)),
            Duration::from_millis(200),
            |_| {},
        )
        .await
        .unwrap();

        assert!(outcome.forced);
    }
}
