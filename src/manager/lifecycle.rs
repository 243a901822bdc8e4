//! Task lifecycle orchestration.
//!
//! [`TaskLifecycle`] owns every task and is the only place their lifecycle
//! fields change. Operations on one task must be issued by a single caller
//! at a time; the registry lock only makes each individual call atomic.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use mockable::Clock;

use super::{
    ids::TaskFactory,
    validator::{
        validate_change_command, validate_finish, validate_pause, validate_start,
        validate_terminate,
    },
};
use crate::error::{Result, TaskError};
use crate::models::{
    record::TaskRecord,
    task::{NewTask, Task, TaskId},
};
use crate::worker::supervisor::{ExecutionOutput, ExitCallback, ProcessSupervisor};

type Registry = Arc<Mutex<HashMap<TaskId, Task>>>;
type SharedClock = Arc<dyn Clock + Send + Sync>;

pub struct TaskLifecycle {
    tasks: Registry,
    factory: TaskFactory,
    supervisor: ProcessSupervisor,
    clock: SharedClock,
}

impl TaskLifecycle {
    pub fn new(factory: TaskFactory, supervisor: ProcessSupervisor, clock: SharedClock) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            factory,
            supervisor,
            clock,
        }
    }

    pub fn create(&self, new: NewTask) -> TaskId {
        self.insert(self.factory.create_unfinished(new))
    }

    /// Registers a task built by the same factory. A task already stored
    /// under that id is replaced.
    pub fn insert(&self, task: Task) -> TaskId {
        let id = task.id();
        info!("Task '{}' registered with id {}.", task.name(), id);
        if lock(&self.tasks).insert(id, task).is_some() {
            warn!("Task {} replaced an existing entry.", id);
        }
        id
    }

    /// Restores persisted records, each under a freshly allocated id.
    pub fn load(&self, records: Vec<TaskRecord>) -> Result<Vec<TaskId>> {
        let tasks = records
            .into_iter()
            .map(|record| self.factory.rehydrate(record))
            .collect::<Result<Vec<_>>>()?;

        let mut registry = lock(&self.tasks);
        Ok(tasks
            .into_iter()
            .map(|task| {
                let id = task.id();
                registry.insert(id, task);
                id
            })
            .collect())
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        lock(&self.tasks)
            .get(&id)
            .map(Task::to_record)
            .ok_or(TaskError::TaskNotFound(id))
    }

    /// Snapshots of every task, ordered by id.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = lock(&self.tasks).values().map(Task::to_record).collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub fn remove(&self, id: TaskId) -> Result<TaskRecord> {
        let mut tasks = lock(&self.tasks);
        let task = tasks.get(&id).ok_or(TaskError::TaskNotFound(id))?;
        if task.has_execution() {
            return Err(TaskError::NotAllowedOperation(
                "can't remove a task while its command is running, terminate it first",
            ));
        }
        let record = task.to_record();
        tasks.remove(&id);
        info!("Task {} removed.", id);
        Ok(record)
    }

    /// Launches the task's command and returns without waiting for it.
    ///
    /// A paused task whose process is still alive is only flipped back to
    /// `InProgress`.
    pub fn start(&self, id: TaskId) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        let task = tasks.get_mut(&id).ok_or(TaskError::TaskNotFound(id))?;
        validate_start(task.state())?;

        let now = self.clock.utc();
        if task.has_execution() {
            task.mark_in_progress(now);
            info!("Task {} resumed.", id);
            return Ok(());
        }

        let on_exit = completion_handler(Arc::downgrade(&self.tasks), Arc::clone(&self.clock), id);
        match self.supervisor.spawn(task.name(), task.command(), on_exit) {
            Ok(handle) => {
                task.mark_in_progress(now);
                task.attach_execution(handle);
                Ok(())
            }
            Err(err) => {
                error!("Task {} could not be started: {}", id, err);
                task.mark_terminated(now);
                Err(err.into())
            }
        }
    }

    /// Stops the running command and blocks until its worker has exited.
    ///
    /// The task ends up `Terminated` even when the supervisor reports a
    /// failure; that failure is returned afterwards.
    pub fn terminate(&self, id: TaskId) -> Result<()> {
        let handle = {
            let mut tasks = lock(&self.tasks);
            let task = tasks.get_mut(&id).ok_or(TaskError::TaskNotFound(id))?;
            validate_terminate(task.state(), task.finish_date())?;
            task.detach_execution()
        };

        // The registry stays unlocked while joining: the worker may be
        // waiting for it inside the completion handler.
        let stopped = match handle {
            Some(handle) => handle.stop(),
            None => Ok(()),
        };

        let now = self.clock.utc();
        if let Some(task) = lock(&self.tasks).get_mut(&id) {
            task.mark_terminated(now);
        }
        info!("Task {} terminated.", id);
        stopped.map_err(TaskError::from)
    }

    /// Marks the task paused. The process keeps running.
    pub fn pause(&self, id: TaskId) -> Result<()> {
        self.with_task(id, |task| {
            validate_pause(task.state())?;
            task.mark_paused();
            Ok(())
        })
    }

    /// Only affects later starts, never a process that is already running.
    pub fn change_command(&self, id: TaskId, command: impl Into<String>) -> Result<()> {
        let command = command.into();
        self.with_task(id, |task| {
            validate_change_command(task.state())?;
            task.set_command(command);
            Ok(())
        })
    }

    pub fn change_description(&self, id: TaskId, description: impl Into<String>) -> Result<()> {
        let description = description.into();
        self.with_task(id, |task| {
            task.set_description(description);
            Ok(())
        })
    }

    /// Terminates every task that still owns a process.
    ///
    /// Returns the failures; tasks that failed to stop cleanly are still
    /// `Terminated`.
    pub fn terminate_all(&self) -> Vec<(TaskId, TaskError)> {
        let running: Vec<TaskId> = lock(&self.tasks)
            .values()
            .filter(|task| task.has_execution())
            .map(Task::id)
            .collect();

        running
            .into_iter()
            .filter_map(|id| match self.terminate(id) {
                // Finished on its own since the snapshot above.
                Ok(()) | Err(TaskError::InvalidStateChange(_)) => None,
                Err(err) => {
                    warn!("Failed to terminate task {}: {}", id, err);
                    Some((id, err))
                }
            })
            .collect()
    }

    fn with_task<T>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> Result<T>) -> Result<T> {
        let mut tasks = lock(&self.tasks);
        let task = tasks.get_mut(&id).ok_or(TaskError::TaskNotFound(id))?;
        f(task)
    }
}

/// Called on the worker thread when the command exits by itself.
fn completion_handler(
    tasks: Weak<Mutex<HashMap<TaskId, Task>>>,
    clock: SharedClock,
    id: TaskId,
) -> ExitCallback {
    Box::new(move |_output: &ExecutionOutput| {
        let Some(tasks) = tasks.upgrade() else {
            return false;
        };
        let mut tasks = lock(&tasks);
        match tasks.get_mut(&id) {
            Some(task) => finish_internally(task, clock.utc()),
            None => false,
        }
    })
}

/// Returns whether the exit became the task's completion.
fn finish_internally(task: &mut Task, now: DateTime<Utc>) -> bool {
    // No attached execution means terminate already claimed this run.
    let Some(handle) = task.detach_execution() else {
        debug!("Task {} was terminated before its command exited.", task.id());
        return false;
    };
    if let Err(err) = validate_finish(task.state(), task.finish_date()) {
        error!("Task {} finished in an unexpected state: {}", task.id(), err);
        return false;
    }
    task.mark_finished(now);
    info!("Task {} finished.", task.id());
    // Dropping the handle from its own worker just detaches the thread.
    drop(handle);
    true
}

fn lock(tasks: &Mutex<HashMap<TaskId, Task>>) -> MutexGuard<'_, HashMap<TaskId, Task>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}
