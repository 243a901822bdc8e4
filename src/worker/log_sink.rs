use std::{
    fs::OpenOptions,
    io::{self, Read, Write},
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use mockable::{Clock, DefaultClock};

use super::supervisor::ExecutionOutput;

struct SinkState {
    next_entry: u64,
    writer: Box<dyn Write + Send>,
}

/// Append-only log of completed command executions, shared by every worker.
///
/// One lock covers the whole entry so concurrent completions never
/// interleave, and the guard is dropped on every path out of
/// [`LogSink::write_entry`].
pub struct LogSink {
    state: Mutex<SinkState>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl LogSink {
    pub fn new(writer: impl Write + Send + 'static, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self::continuing(writer, clock, 0)
    }

    fn continuing(
        writer: impl Write + Send + 'static,
        clock: Arc<dyn Clock + Send + Sync>,
        last_entry: u64,
    ) -> Self {
        Self {
            state: Mutex::new(SinkState {
                next_entry: last_entry + 1,
                writer: Box::new(writer),
            }),
            clock,
        }
    }

    /// Appends to the log at `path`. Entry ids continue after the highest one
    /// already in the file.
    pub fn open(path: &Path, clock: Arc<dyn Clock + Send + Sync>) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut existing = Vec::new();
        file.read_to_end(&mut existing)?;
        let last_entry = last_entry_id(&String::from_utf8_lossy(&existing));
        Ok(Self::continuing(file, clock, last_entry))
    }

    /// Discards every entry.
    pub fn disabled() -> Self {
        Self::new(io::sink(), Arc::new(DefaultClock))
    }

    /// Writes one entry and returns its sequence number.
    pub fn write_entry(&self, task_name: &str, output: &ExecutionOutput) -> io::Result<u64> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let entry_id = state.next_entry;
        state.next_entry += 1;

        let exit = output
            .exit_code
            .map_or_else(|| "signal".to_owned(), |code| code.to_string());
        let text = format!(
            "#{entry_id} {timestamp} [{task_name}] exit={exit}\n[stdout]\n{stdout}\n[stderr]\n{stderr}\n\n",
            timestamp = self.clock.utc().to_rfc3339(),
            stdout = output.stdout.trim_end(),
            stderr = output.stderr.trim_end(),
        );
        state.writer.write_all(text.as_bytes())?;
        state.writer.flush()?;
        Ok(entry_id)
    }
}

/// Highest id among lines shaped like `#<id> <timestamp> [<task>] exit=...`.
fn last_entry_id(log: &str) -> u64 {
    log.lines()
        .filter(|line| line.contains("] exit="))
        .filter_map(|line| line.strip_prefix('#')?.split(' ').next()?.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}
