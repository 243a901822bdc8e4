use std::{
    fmt,
    io::{BufReader, Read},
    process::{Child, Command, Stdio},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{
    at, bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use log::{debug, error, info, warn};

use super::log_sink::LogSink;
use crate::error::SupervisorError;

pub const DEFAULT_SHELL: &str = "sh";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long output readers get after the process group is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// What a command left behind after exiting on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}

/// Receives the output of a normal exit and returns whether the exit was
/// accepted as the task's completion. Only accepted exits are logged.
pub type ExitCallback = Box<dyn FnOnce(&ExecutionOutput) -> bool + Send + 'static>;

/// Starts shell commands on dedicated worker threads.
#[derive(Clone)]
pub struct ProcessSupervisor {
    log: Arc<LogSink>,
    shell: String,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    pub fn new(log: Arc<LogSink>) -> Self {
        Self {
            log,
            shell: DEFAULT_SHELL.to_owned(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Program invoked as `<shell> -c <command line>`.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs `command_line` through the shell without waiting for it.
    ///
    /// `on_normal_exit` is called at most once, on the worker thread, if the
    /// process exits before a stop is requested. It is never called after
    /// [`ExecutionHandle::request_stop`].
    pub fn spawn(
        &self,
        task_name: &str,
        command_line: &str,
        on_normal_exit: ExitCallback,
    ) -> Result<ExecutionHandle, SupervisorError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so signals reach everything the shell starts.
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            command: command_line.to_owned(),
            source,
        })?;
        let pid = child.id();
        info!("Task '{}' started as pid {}.", task_name, pid);

        // Both readers hold a sender, so the channel disconnects once every
        // output pipe is closed.
        let (output_tx, output_rx) = unbounded();
        if let Some(stdout) = child.stdout.take() {
            drain(stdout, Stream::Stdout, output_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain(stderr, Stream::Stderr, output_tx);
        }
        let (stop_tx, stop_rx) = bounded(1);

        let worker = Worker {
            child,
            pid,
            task_name: task_name.to_owned(),
            output_rx,
            stdout: String::new(),
            stderr: String::new(),
            stop_rx,
            log: Arc::clone(&self.log),
            stop_timeout: self.stop_timeout,
            poll_interval: self.poll_interval,
        };
        let thread = thread::spawn(move || worker.run(on_normal_exit));

        Ok(ExecutionHandle {
            pid,
            stop_tx,
            worker: Some(thread),
        })
    }
}

/// The live worker of one execution.
///
/// Dropping the handle without calling [`ExecutionHandle::stop`] also stops
/// the process, but does not wait for it.
pub struct ExecutionHandle {
    pid: u32,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<Result<(), SupervisorError>>>,
}

impl ExecutionHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Asks the worker to end the process. Repeated calls, or calls after the
    /// process already exited, do nothing.
    pub fn request_stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Blocks until the worker thread has returned.
    pub fn join(mut self) -> Result<(), SupervisorError> {
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or(Err(SupervisorError::WorkerPanicked)),
            None => Ok(()),
        }
    }

    /// Requests a stop and waits for the worker, which takes at most the stop
    /// timeout plus a short grace period for the output readers.
    pub fn stop(self) -> Result<(), SupervisorError> {
        self.request_stop();
        self.join()
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

struct Worker {
    child: Child,
    pid: u32,
    task_name: String,
    output_rx: Receiver<(Stream, String)>,
    stdout: String,
    stderr: String,
    stop_rx: Receiver<()>,
    log: Arc<LogSink>,
    stop_timeout: Duration,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self, on_normal_exit: ExitCallback) -> Result<(), SupervisorError> {
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    error!("Failed to wait for task '{}': {}", self.task_name, err);
                    // The wait error is what the caller needs to see.
                    let _ = self.shutdown();
                    return Err(SupervisorError::Wait(err));
                }
            }
            match self.stop_rx.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return self.shutdown(),
                Err(RecvTimeoutError::Timeout) => {}
            }
        };

        // Background jobs of the shell may still hold the output pipes.
        // They get `stop_timeout` to finish before the group is stopped.
        let outputs = self.output_rx.clone();
        let stop = self.stop_rx.clone();
        let linger = at(Instant::now() + self.stop_timeout);
        loop {
            select! {
                recv(outputs) -> item => match item {
                    Ok(item) => self.store(item),
                    Err(_) => break,
                },
                recv(stop) -> _ => return self.shutdown(),
                recv(linger) -> _ => {
                    warn!(
                        "Task '{}' exited but left processes holding its output, stopping them.",
                        self.task_name
                    );
                    if let Err(err) = self.shutdown() {
                        warn!("Leftover processes of task '{}': {}", self.task_name, err);
                    }
                    break;
                }
            }
        }

        if !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty)) {
            debug!(
                "Task '{}' exited while being stopped, skipping completion.",
                self.task_name
            );
            return Ok(());
        }

        let output = ExecutionOutput {
            stdout: std::mem::take(&mut self.stdout),
            stderr: std::mem::take(&mut self.stderr),
            exit_code: status.code(),
        };
        info!("Task '{}' exited with {}.", self.task_name, status);
        if !on_normal_exit(&output) {
            debug!("Exit of task '{}' was not accepted, not logged.", self.task_name);
            return Ok(());
        }
        match self.log.write_entry(&self.task_name, &output) {
            Ok(entry) => debug!("Task '{}' written to log entry {}.", self.task_name, entry),
            Err(err) => error!("Failed to write log for task '{}': {}", self.task_name, err),
        }
        Ok(())
    }

    /// SIGTERM to the group, bounded wait for the shell and for every pipe
    /// holder, then SIGKILL. Works whether or not the shell was reaped.
    fn shutdown(&mut self) -> Result<(), SupervisorError> {
        info!("Stopping task '{}' (pid {}).", self.task_name, self.pid);
        send_signal(&mut self.child, Signal::Terminate);

        let deadline = Instant::now() + self.stop_timeout;
        let exited = match self.wait_exit(deadline) {
            Ok(exited) => exited,
            Err(err) => {
                send_signal(&mut self.child, Signal::Kill);
                let _ = self.child.wait();
                self.gather_output(Instant::now() + OUTPUT_GRACE);
                return Err(SupervisorError::Wait(err));
            }
        };

        // Closed pipes are the only sign that the rest of the group is gone.
        let result = if exited && self.gather_output(deadline) {
            Ok(())
        } else {
            warn!(
                "Task '{}' ignored SIGTERM for {:?}, killing process group {}.",
                self.task_name, self.stop_timeout, self.pid
            );
            send_signal(&mut self.child, Signal::Kill);
            let _ = self.child.wait();
            Err(SupervisorError::StopTimedOut {
                pid: self.pid,
                timeout: self.stop_timeout,
            })
        };

        if !self.gather_output(Instant::now() + OUTPUT_GRACE) {
            warn!("Output of task '{}' is still held open, detaching readers.", self.task_name);
        }
        info!("Task '{}' stopped.", self.task_name);
        result
    }

    fn wait_exit(&mut self, deadline: Instant) -> std::io::Result<bool> {
        loop {
            match self.child.try_wait()? {
                Some(_) => return Ok(true),
                None if Instant::now() >= deadline => return Ok(false),
                None => thread::sleep(self.poll_interval),
            }
        }
    }

    /// Collects reader results until every pipe is closed or `deadline`
    /// passes. Returns whether every pipe closed.
    fn gather_output(&mut self, deadline: Instant) -> bool {
        loop {
            match self.output_rx.recv_deadline(deadline) {
                Ok(item) => self.store(item),
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    fn store(&mut self, (stream, text): (Stream, String)) {
        match stream {
            Stream::Stdout => self.stdout = text,
            Stream::Stderr => self.stderr = text,
        }
    }
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: Signal) {
    let signal = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // Negative pid: the whole process group led by the shell. The group
    // outlives the shell as long as one of its members does.
    unsafe {
        libc::kill(-(child.id() as libc::pid_t), signal);
    }
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: Signal) {
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(stream: R, kind: Stream, results: Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(err) = BufReader::new(stream).read_to_end(&mut bytes) {
            warn!("Failed to read command {:?}: {}", kind, err);
        }
        let _ = results.send((kind, String::from_utf8_lossy(&bytes).into_owned()));
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::worker::log_sink::tests::SharedBuffer;
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};

    struct Harness {
        supervisor: ProcessSupervisor,
        log: SharedBuffer,
    }

    #[fixture]
    fn harness() -> Harness {
        let log = SharedBuffer::default();
        let sink = Arc::new(LogSink::new(log.clone(), Arc::new(DefaultClock)));
        Harness {
            supervisor: ProcessSupervisor::new(sink)
                .with_stop_timeout(Duration::from_millis(500))
                .with_poll_interval(Duration::from_millis(10)),
            log,
        }
    }

    fn recording_callback(accept: bool) -> (ExitCallback, Receiver<ExecutionOutput>) {
        let (tx, rx) = unbounded();
        let callback: ExitCallback = Box::new(move |output: &ExecutionOutput| {
            let _ = tx.send(output.clone());
            accept
        });
        (callback, rx)
    }

    #[rstest]
    fn captures_stdout_and_stderr_separately(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness
            .supervisor
            .spawn("split", "echo out; echo err 1>&2; exit 3", callback)
            .unwrap();

        let output = outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(3));
        handle.join().unwrap();

        let log = harness.log.contents();
        assert!(log.contains("[split] exit=3"));
        assert!(log.contains("out"));
        assert!(log.contains("err"));
    }

    #[rstest]
    fn rejected_exit_is_not_logged(harness: Harness) {
        let (callback, outputs) = recording_callback(false);
        let handle = harness.supervisor.spawn("late", "echo done", callback).unwrap();

        outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(harness.log.contents().is_empty());
    }

    #[rstest]
    fn stop_ends_long_running_command_without_callback(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness.supervisor.spawn("sleeper", "sleep 30", callback).unwrap();

        let started = Instant::now();
        handle.stop().unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outputs.try_recv().is_err());
        assert!(harness.log.contents().is_empty());
    }

    #[rstest]
    fn stop_reaches_every_process_in_the_pipeline(harness: Harness) {
        let (callback, _outputs) = recording_callback(true);
        let handle = harness
            .supervisor
            .spawn("pipeline", "sleep 30 | sleep 30", callback)
            .unwrap();

        let started = Instant::now();
        handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[rstest]
    fn stop_reaches_background_jobs_after_the_shell_exits(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness
            .supervisor
            .spawn("orphaning", "sleep 30 & echo started", callback)
            .unwrap();
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        handle.stop().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(outputs.try_recv().is_err());
    }

    #[rstest]
    fn lingering_background_jobs_are_stopped_before_completion(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let started = Instant::now();
        let handle = harness
            .supervisor
            .spawn("orphaning", "sleep 30 & echo started", callback)
            .unwrap();

        let output = outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(output.stdout, "started\n");
        assert_eq!(output.exit_code, Some(0));
        handle.join().unwrap();
    }

    #[rstest]
    fn request_stop_after_exit_is_a_no_op(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness.supervisor.spawn("quick", "true", callback).unwrap();

        outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        while !handle.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        handle.request_stop();
        handle.request_stop();
        handle.stop().unwrap();
    }

    #[rstest]
    fn stubborn_process_is_killed_after_timeout(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness
            .supervisor
            .spawn("stubborn", "trap '' TERM; sleep 30", callback)
            .unwrap();
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let result = handle.stop();

        assert!(matches!(result, Err(SupervisorError::StopTimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outputs.try_recv().is_err());
    }

    #[rstest]
    fn dropping_the_handle_stops_the_worker(harness: Harness) {
        let (callback, outputs) = recording_callback(true);
        let handle = harness.supervisor.spawn("dropped", "sleep 30", callback).unwrap();
        drop(handle);

        assert!(outputs.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[rstest]
    fn missing_shell_is_a_spawn_error(harness: Harness) {
        let (callback, _outputs) = recording_callback(true);
        let result = harness
            .supervisor
            .with_shell("/nonexistent/shell")
            .spawn("shell-less", "true", callback);

        assert!(matches!(result, Err(SupervisorError::Spawn { ref command, .. }) if command == "true"));
    }
}
