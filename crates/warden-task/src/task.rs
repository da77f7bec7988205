//! A process on a pseudo-terminal with its reader and writer workers

use nix::sys::signal::Signal;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::process::Child;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use warden_util::TaskId;

use crate::process::{signal_group, spawn_in_terminal};
use crate::pty::{self, PtyReader, WindowSize};
use crate::scanner::{Scanner, DEFAULT_MAX_TOKEN_SIZE};
use crate::{
    CommandSpec, Event, ExitStatus, InputClosed, ProcessError, SpawnError, SpawnResult, Splitter,
    TaskError, TokenizeError,
};

/// Channel depth between a task's workers and its consumer.
///
/// A single slot keeps producers in lockstep with consumers.
const CHANNEL_CAPACITY: usize = 1;

/// Per-task settings that survive respawns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    pub window: WindowSize,
    pub max_token_size: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            window: WindowSize::default(),
            max_token_size: DEFAULT_MAX_TOKEN_SIZE,
        }
    }
}

pub(crate) enum InputMessage {
    Data(Vec<u8>),
    /// Sent by the reader once the process has been reaped
    Close,
}

/// Shared identity and control of a task.
///
/// Every event carries one, so a consumer can kill or respawn the task that
/// produced it.
pub struct TaskHandle {
    id: TaskId,
    spec: CommandSpec,
    splitter: Arc<dyn Splitter>,
    options: TaskOptions,
    /// Process group of the live process, 0 once it has been reaped
    pid: AtomicI32,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn options(&self) -> TaskOptions {
        self.options
    }

    /// Pid of the live process
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid as u32),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }

    /// Send SIGKILL to the task's process group.
    ///
    /// Safe to call at any time: a task whose process never started or has
    /// already been reaped is left alone.
    pub fn kill(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGKILL)
    }

    /// Send SIGTERM to the task's process group
    pub fn terminate(&self) -> Result<(), ProcessError> {
        self.signal(Signal::SIGTERM)
    }

    fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        let pid = self.pid.load(Ordering::Acquire);
        if pid <= 0 {
            debug!(task_id = %self.id, signal = %signal, "No live process to signal");
            return Ok(());
        }
        info!(task_id = %self.id, pid, signal = %signal, "Signalling task");
        signal_group(pid, signal)
    }

    /// Start a new task running the same command with the same split
    /// function. Nothing is shared with this task's process or terminal.
    pub fn respawn(&self) -> SpawnResult<Task> {
        debug!(task_id = %self.id, "Respawning task");
        Task::spawn_with(self.spec.clone(), Arc::clone(&self.splitter), self.options)
    }

    fn mark_exited(&self) {
        self.pid.store(0, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn unstarted(spec: CommandSpec) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::new(),
            spec,
            splitter: Arc::new(crate::Lines),
            options: TaskOptions::default(),
            pid: AtomicI32::new(0),
        })
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("program", &self.spec.program)
            .field("pid", &self.pid())
            .finish()
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.spec.display_name(), self.id)
    }
}

/// Input endpoint of a task. Bytes are written to the terminal verbatim.
#[derive(Clone)]
pub struct TaskInput {
    tx: mpsc::Sender<InputMessage>,
}

impl TaskInput {
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), InputClosed> {
        self.tx
            .send(InputMessage::Data(data.into()))
            .await
            .map_err(|_| InputClosed)
    }

    /// Send from synchronous code. Panics inside an async runtime.
    pub fn blocking_send(&self, data: impl Into<Vec<u8>>) -> Result<(), InputClosed> {
        self.tx
            .blocking_send(InputMessage::Data(data.into()))
            .map_err(|_| InputClosed)
    }

    /// Whether the writer has stopped accepting input
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for TaskInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInput")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A running task.
///
/// The output source yields `Output` events in the order the split function
/// cut them, then exactly one `Ended`, then closes. Dropping a task does not
/// kill its process.
#[derive(Debug)]
pub struct Task {
    handle: Arc<TaskHandle>,
    input: TaskInput,
    output: mpsc::Receiver<Event>,
}

impl Task {
    /// Spawn `spec` with default options
    pub fn spawn(spec: CommandSpec, splitter: impl Splitter + 'static) -> SpawnResult<Task> {
        Self::spawn_with(spec, Arc::new(splitter), TaskOptions::default())
    }

    pub fn spawn_with(
        spec: CommandSpec,
        splitter: Arc<dyn Splitter>,
        options: TaskOptions,
    ) -> SpawnResult<Task> {
        let pty = pty::open(options.window)?;
        debug!(program = %spec.display_name(), "Terminal allocated in raw mode");

        let terminal_in = pty.master.try_clone().map_err(SpawnError::Handle)?;

        let mut child = spawn_in_terminal(&spec, &pty.slave)?;
        // Only the child may hold the slave, or the reader never sees EOF
        drop(pty.slave);

        let pid = child.id() as i32;
        let handle = Arc::new(TaskHandle {
            id: TaskId::new(),
            spec,
            splitter,
            options,
            pid: AtomicI32::new(pid),
        });

        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let writer = {
            let handle = Arc::clone(&handle);
            thread::Builder::new()
                .name(format!("warden-writer-{}", pid))
                .spawn(move || write_input(File::from(terminal_in), input_rx, handle))
        };
        let writer = match writer {
            Ok(writer) => writer,
            Err(source) => {
                abandon(&handle, &mut child);
                return Err(SpawnError::Worker {
                    role: "writer",
                    source,
                });
            }
        };

        let scanner = Scanner::with_max_token_size(
            PtyReader::new(pty.master),
            Arc::clone(&handle.splitter),
            options.max_token_size,
        );
        let reader = Reader {
            handle: Arc::clone(&handle),
            scanner,
            child,
            writer,
            input: input_tx.clone(),
            events: event_tx,
        };

        if let Err(source) = thread::Builder::new()
            .name(format!("warden-reader-{}", pid))
            .spawn(move || reader.run())
        {
            // The child went down with the closure; its group can still be killed
            if let Err(e) = handle.kill() {
                warn!(task_id = %handle.id, error = %e, "Failed to kill orphaned process");
            }
            return Err(SpawnError::Worker {
                role: "reader",
                source,
            });
        }

        info!(
            task_id = %handle.id,
            pid,
            program = %handle.spec.display_name(),
            "Task spawned"
        );

        Ok(Task {
            handle,
            input: TaskInput { tx: input_tx },
            output: event_rx,
        })
    }

    pub fn id(&self) -> TaskId {
        self.handle.id
    }

    pub fn handle(&self) -> &Arc<TaskHandle> {
        &self.handle
    }

    pub fn input(&self) -> &TaskInput {
        &self.input
    }

    /// Next event, `None` once `Ended` has been delivered
    pub async fn recv(&mut self) -> Option<Event> {
        self.output.recv().await
    }

    /// Next event from synchronous code. Panics inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        self.output.blocking_recv()
    }

    pub fn kill(&self) -> Result<(), ProcessError> {
        self.handle.kill()
    }

    pub fn terminate(&self) -> Result<(), ProcessError> {
        self.handle.terminate()
    }

    pub fn respawn(&self) -> SpawnResult<Task> {
        self.handle.respawn()
    }

    /// Split into handle, input endpoint and output source, e.g. to hand
    /// the output to a [`Mux`](crate::Mux)
    pub fn into_parts(self) -> (Arc<TaskHandle>, TaskInput, mpsc::Receiver<Event>) {
        (self.handle, self.input, self.output)
    }
}

/// Kill and reap a child whose workers could not be started
fn abandon(handle: &TaskHandle, child: &mut Child) {
    if let Err(e) = handle.kill() {
        warn!(task_id = %handle.id, error = %e, "Failed to kill abandoned process");
    }
    if let Err(e) = child.wait() {
        warn!(task_id = %handle.id, error = %e, "Failed to reap abandoned process");
    }
    handle.mark_exited();
}

fn write_input(
    mut terminal: File,
    mut input: mpsc::Receiver<InputMessage>,
    handle: Arc<TaskHandle>,
) -> Result<(), TaskError> {
    debug!(task_id = %handle.id, "Writer started");

    while let Some(message) = input.blocking_recv() {
        match message {
            InputMessage::Data(bytes) => {
                if let Err(e) = terminal.write_all(&bytes).and_then(|_| terminal.flush()) {
                    error!(task_id = %handle.id, error = %e, "Failed to write task input");
                    if let Err(e) = handle.kill() {
                        warn!(task_id = %handle.id, error = %e, "Failed to kill task after write failure");
                    }
                    return Err(TaskError::Io(e));
                }
            }
            InputMessage::Close => break,
        }
    }

    debug!(task_id = %handle.id, "Writer stopped");
    Ok(())
}

struct Reader {
    handle: Arc<TaskHandle>,
    scanner: Scanner<PtyReader>,
    child: Child,
    writer: JoinHandle<Result<(), TaskError>>,
    input: mpsc::Sender<InputMessage>,
    events: mpsc::Sender<Event>,
}

impl Reader {
    fn run(mut self) {
        let id = self.handle.id;
        debug!(task_id = %id, "Reader started");

        let mut consumer_gone = false;
        let fault = loop {
            match self.scanner.next_token() {
                Ok(Some(token)) => {
                    // Keep draining after the consumer left so the child never
                    // blocks on a full terminal
                    if consumer_gone {
                        continue;
                    }
                    if self.events.blocking_send(Event::output(&self.handle, token)).is_err() {
                        debug!(task_id = %id, "Output dropped by consumer");
                        consumer_gone = true;
                    }
                }
                Ok(None) => break None,
                Err(e) => {
                    error!(task_id = %id, error = %e, "Tokenizer failed, killing task");
                    if let Err(e) = self.handle.kill() {
                        warn!(task_id = %id, error = %e, "Failed to kill task");
                    }
                    break Some(e);
                }
            }
        };

        let status = self.child.wait();
        self.handle.mark_exited();

        // Stop the writer before announcing the end
        let _ = self.input.blocking_send(InputMessage::Close);
        drop(self.input);
        let write_fault = match self.writer.join() {
            Ok(result) => result.err(),
            Err(_) => Some(TaskError::Io(io::Error::other("writer panicked"))),
        };

        let error = ended_error(fault, status, write_fault);
        match &error {
            None => info!(task_id = %id, "Task ended"),
            Some(e) => info!(task_id = %id, error = %e, "Task ended with error"),
        }

        if self.events.blocking_send(Event::ended(&self.handle, error)).is_err() {
            debug!(task_id = %id, "End of task not observed by consumer");
        }
        debug!(task_id = %id, "Reader stopped");
    }
}

/// Pick the error reported by `Ended`. A tokenizer or write fault explains
/// the kill that follows it, so either outranks the exit status.
fn ended_error(
    fault: Option<TokenizeError>,
    status: io::Result<std::process::ExitStatus>,
    write_fault: Option<TaskError>,
) -> Option<TaskError> {
    if let Some(fault) = fault {
        return Some(TaskError::Tokenize(fault));
    }
    if write_fault.is_some() {
        return write_fault;
    }
    match status {
        Ok(status) => {
            let status = ExitStatus::from(status);
            (!status.is_success()).then_some(TaskError::Exited(status))
        }
        Err(e) => Some(TaskError::Wait(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Lines, Payload, Split};
    use std::time::Duration;
    use tokio::time::timeout;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    async fn next(task: &mut Task) -> Option<Event> {
        timeout(TIMEOUT, task.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn output_then_clean_end() {
        let mut task = Task::spawn(sh("echo hello world"), Lines).unwrap();

        let event = next(&mut task).await.unwrap();
        assert_eq!(event.chunk(), Some("hello world"));
        assert_eq!(event.task_id(), task.id());

        let event = next(&mut task).await.unwrap();
        assert!(matches!(event.payload(), Payload::Ended { error: None }));

        assert!(next(&mut task).await.is_none());
        assert!(!task.handle().is_running());
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let mut task = Task::spawn(sh("exit 3"), Lines).unwrap();

        let event = next(&mut task).await.unwrap();
        let error = event.error().unwrap();
        assert_eq!(error.exit_status(), Some(ExitStatus::with_code(3)));
        assert!(next(&mut task).await.is_none());
    }

    #[tokio::test]
    async fn input_reaches_process() {
        let mut task = Task::spawn(CommandSpec::new("cat"), Lines).unwrap();

        task.input().send("ping\n").await.unwrap();
        let event = next(&mut task).await.unwrap();
        // Raw mode: no echo of the input, only cat's copy
        assert_eq!(event.chunk(), Some("ping"));

        task.kill().unwrap();
        let event = next(&mut task).await.unwrap();
        let status = event.error().and_then(TaskError::exit_status).unwrap();
        assert_eq!(status.signal, Some(Signal::SIGKILL as i32));
        assert!(next(&mut task).await.is_none());

        // Idempotent once the process is gone
        assert!(task.kill().is_ok());
        assert!(task.terminate().is_ok());
    }

    #[tokio::test]
    async fn terminate_ends_task() {
        let mut task = Task::spawn(CommandSpec::new("sleep").arg("30"), Lines).unwrap();
        assert!(task.handle().pid().is_some());

        task.terminate().unwrap();
        let event = next(&mut task).await.unwrap();
        let status = event.error().and_then(TaskError::exit_status).unwrap();
        assert_eq!(status.signal, Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn kill_without_process_is_noop() {
        let handle = TaskHandle::unstarted(CommandSpec::new("cat"));
        assert!(handle.kill().is_ok());
        assert!(handle.terminate().is_ok());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn respawn_keeps_command_with_new_identity() {
        let spec = sh("echo $WARDEN_TEST; sleep 30").env("WARDEN_TEST", "again");
        let mut first = Task::spawn(spec, Lines).unwrap();
        assert_eq!(next(&mut first).await.unwrap().chunk(), Some("again"));

        let mut second = first.respawn().unwrap();
        assert_ne!(second.id(), first.id());
        assert_ne!(second.handle().pid(), first.handle().pid());
        assert_eq!(second.handle().spec().args, first.handle().spec().args);
        assert_eq!(second.handle().spec().env, first.handle().spec().env);
        assert_eq!(next(&mut second).await.unwrap().chunk(), Some("again"));

        first.kill().unwrap();
        second.kill().unwrap();
        assert!(next(&mut first).await.unwrap().is_ended());
        assert!(next(&mut second).await.unwrap().is_ended());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let result = Task::spawn(CommandSpec::new("/nonexistent/warden-test"), Lines);
        assert!(matches!(result, Err(SpawnError::Start { .. })));
    }

    #[tokio::test]
    async fn input_closed_after_end() {
        let mut task = Task::spawn(sh("true"), Lines).unwrap();
        while next(&mut task).await.is_some() {}
        assert!(task.input().send("late").await.is_err());
        assert!(task.input().is_closed());
    }

    struct Reject;

    impl Splitter for Reject {
        fn split<'a>(&self, _data: &'a [u8], _at_eof: bool) -> Result<Split<'a>, TokenizeError> {
            Err(TokenizeError::Split("rejected".into()))
        }
    }

    #[tokio::test]
    async fn tokenizer_fault_ends_task() {
        let mut task = Task::spawn(sh("echo data; sleep 30"), Reject).unwrap();

        let event = next(&mut task).await.unwrap();
        assert!(matches!(
            event.error(),
            Some(TaskError::Tokenize(TokenizeError::Split(_)))
        ));
        assert!(next(&mut task).await.is_none());
    }

    #[tokio::test]
    async fn partial_line_at_exit_is_one_token() {
        let mut task = Task::spawn(sh("printf 'no newline'"), Lines).unwrap();
        assert_eq!(next(&mut task).await.unwrap().chunk(), Some("no newline"));
        assert!(next(&mut task).await.unwrap().is_ended());
    }

    #[tokio::test]
    async fn options_survive_respawn() {
        let options = TaskOptions {
            window: WindowSize { cols: 120, rows: 40 },
            max_token_size: 1024,
        };
        let task = Task::spawn_with(sh("true"), Arc::new(Lines), options).unwrap();
        let again = task.respawn().unwrap();
        assert_eq!(again.handle().options(), options);
    }

    #[test]
    fn blocking_endpoints_outside_runtime() {
        let mut task = Task::spawn(CommandSpec::new("cat"), Lines).unwrap();

        task.input().blocking_send("sync\n").unwrap();
        assert_eq!(task.blocking_recv().unwrap().chunk(), Some("sync"));

        task.kill().unwrap();
        assert!(task.blocking_recv().unwrap().is_ended());
        assert!(task.blocking_recv().is_none());
    }

    fn exited(raw: i32) -> io::Result<std::process::ExitStatus> {
        use std::os::unix::process::ExitStatusExt;
        Ok(std::process::ExitStatus::from_raw(raw))
    }

    fn write_fault() -> Option<TaskError> {
        Some(TaskError::Io(io::Error::from_raw_os_error(nix::libc::EIO)))
    }

    #[test]
    fn ended_error_priority() {
        // Clean exit, nothing else wrong
        assert!(ended_error(None, exited(0), None).is_none());

        // Tokenizer fault outranks everything
        let error = ended_error(Some(TokenizeError::NoProgress { remaining: 4 }), exited(9), write_fault());
        assert!(matches!(error, Some(TaskError::Tokenize(TokenizeError::NoProgress { .. }))));

        // Wait failure
        let error = ended_error(None, Err(io::Error::other("no child")), None);
        assert!(matches!(error, Some(TaskError::Wait(_))));

        // Non-zero exit
        let error = ended_error(None, exited(3 << 8), None);
        assert_eq!(
            error.as_ref().and_then(TaskError::exit_status),
            Some(ExitStatus::with_code(3))
        );

        // Write fault with an otherwise clean exit
        let error = ended_error(None, exited(0), write_fault());
        assert!(matches!(error, Some(TaskError::Io(_))));

        // Write fault and the SIGKILL the writer sent because of it
        let error = ended_error(None, exited(Signal::SIGKILL as i32), write_fault());
        assert!(matches!(error, Some(TaskError::Io(_))));
    }
}
