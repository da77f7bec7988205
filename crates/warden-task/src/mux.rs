//! Fan-in of task event sources

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{Event, Task, TaskHandle, TaskInput};

/// Merges any number of event sources into one stream.
///
/// Events from one source keep their order; events from different sources
/// interleave arbitrarily. The merged stream never closes on its own, even
/// when every source has: callers that need to stop must count the `Ended`
/// events they expect.
#[derive(Debug)]
pub struct Mux {
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl Mux {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    /// Register `source` and return the merged stream, which is the same
    /// for every call.
    ///
    /// Must be called within a tokio runtime.
    pub fn add(&mut self, mut source: mpsc::Receiver<Event>) -> &mut mpsc::Receiver<Event> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Mux source closed");
        });
        &mut self.rx
    }

    /// Register a task's output, handing back what is needed to control it
    pub fn add_task(&mut self, task: Task) -> (Arc<TaskHandle>, TaskInput) {
        let (handle, input, output) = task.into_parts();
        self.add(output);
        (handle, input)
    }

    /// The merged stream
    pub fn out(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.rx
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandSpec, Lines};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;
    use warden_util::TaskId;

    fn source(handle: &Arc<TaskHandle>, chunks: &[&str]) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        for chunk in chunks {
            tx.try_send(Event::output(handle, chunk.as_bytes().to_vec())).unwrap();
        }
        tx.try_send(Event::ended(handle, None)).unwrap();
        rx
    }

    #[tokio::test]
    async fn merges_and_keeps_per_source_order() {
        let a = TaskHandle::unstarted(CommandSpec::new("a"));
        let b = TaskHandle::unstarted(CommandSpec::new("b"));

        let mut mux = Mux::new();
        mux.add(source(&a, &["a1", "a2", "a3"]));
        mux.add(source(&b, &["b1", "b2"]));

        let mut seen: HashMap<TaskId, Vec<String>> = HashMap::new();
        let mut ended = 0;
        while ended < 2 {
            let event = timeout(Duration::from_secs(5), mux.recv()).await.unwrap().unwrap();
            match event.chunk() {
                Some(chunk) => seen.entry(event.task_id()).or_default().push(chunk.to_string()),
                None => ended += 1,
            }
        }

        assert_eq!(seen[&a.id()], ["a1", "a2", "a3"]);
        assert_eq!(seen[&b.id()], ["b1", "b2"]);
    }

    #[tokio::test]
    async fn stays_open_after_sources_close() {
        let a = TaskHandle::unstarted(CommandSpec::new("a"));
        let mut mux = Mux::default();
        mux.add(source(&a, &[]));

        assert!(mux.recv().await.unwrap().is_ended());
        // Nothing left, but the stream is not closed
        assert!(timeout(Duration::from_millis(100), mux.recv()).await.is_err());
    }

    #[tokio::test]
    async fn add_returns_the_same_stream() {
        let a = TaskHandle::unstarted(CommandSpec::new("a"));
        let b = TaskHandle::unstarted(CommandSpec::new("b"));
        let mut mux = Mux::new();

        let first: *const mpsc::Receiver<Event> = mux.add(source(&a, &[]));
        let second: *const mpsc::Receiver<Event> = mux.add(source(&b, &[]));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn merges_live_tasks() {
        let mut mux = Mux::new();
        let spec = CommandSpec::new("sh").args(["-c", "echo out"]);
        let (one, _) = mux.add_task(Task::spawn(spec.clone(), Lines).unwrap());
        let (two, _) = mux.add_task(Task::spawn(spec, Lines).unwrap());

        let mut ended = Vec::new();
        while ended.len() < 2 {
            let event = timeout(Duration::from_secs(10), mux.recv()).await.unwrap().unwrap();
            if event.is_ended() {
                assert!(event.error().is_none());
                ended.push(event.task_id());
            }
        }
        ended.sort_by_key(|id| *id.as_uuid());
        let mut expected = vec![one.id(), two.id()];
        expected.sort_by_key(|id| *id.as_uuid());
        assert_eq!(ended, expected);
    }
}
