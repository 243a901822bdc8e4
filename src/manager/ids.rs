use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::error::{Result, TaskError};
use crate::models::{
    record::TaskRecord,
    task::{NewTask, Task, TaskId, TaskState},
};

/// Source of task ids. Implementations must never hand out the same id twice.
pub trait IdAllocator: Send + Sync {
    fn next_id(&self) -> TaskId;
}

/// Monotonic counter starting after `last`.
#[derive(Debug, Default)]
pub struct SequentialIds {
    last: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

impl IdAllocator for SequentialIds {
    fn next_id(&self) -> TaskId {
        TaskId::new(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Builds tasks with ids drawn from an injected allocator.
#[derive(Clone)]
pub struct TaskFactory {
    ids: Arc<dyn IdAllocator>,
}

impl TaskFactory {
    pub fn new(ids: Arc<dyn IdAllocator>) -> Self {
        Self { ids }
    }

    pub fn create_unfinished(&self, new: NewTask) -> Task {
        Task::unfinished(self.ids.next_id(), new)
    }

    /// Restores a persisted task under a fresh id.
    ///
    /// A record saved while running has no process after reload and comes
    /// back as `Paused`.
    pub fn rehydrate(&self, record: TaskRecord) -> Result<Task> {
        let state = record.state;
        if record.finish_date.is_some() != state.is_terminal() {
            return Err(TaskError::CorruptedState(
                "finish date must be set exactly when the task is finished or terminated",
            ));
        }
        if record.begin_date.is_some() != state.has_started() {
            return Err(TaskError::CorruptedState(
                "begin date must be set exactly when the task has been started",
            ));
        }

        let state = match state {
            TaskState::InProgress => TaskState::Paused,
            other => other,
        };
        let begin_date = record.begin_date;
        let finish_date = record.finish_date;
        Ok(Task::restored(
            self.ids.next_id(),
            record.into_new_task(),
            state,
            begin_date,
            finish_date,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{TaskCategory, TaskPriority};
    use chrono::Utc;
    use rstest::{fixture, rstest};

    #[fixture]
    fn factory() -> TaskFactory {
        TaskFactory::new(Arc::new(SequentialIds::new()))
    }

    fn new_task() -> NewTask {
        NewTask {
            name: "build".to_owned(),
            priority: TaskPriority::UrgentImportant,
            category: TaskCategory::Work,
            description: String::new(),
            deadline: Utc::now(),
            command: "true".to_owned(),
        }
    }

    #[rstest]
    fn ids_are_sequential_and_unique(factory: TaskFactory) {
        let ids: Vec<u64> = (0..4)
            .map(|_| factory.create_unfinished(new_task()).id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn allocator_can_resume_after_known_id() {
        let ids = SequentialIds::starting_after(41);
        assert_eq!(ids.next_id(), TaskId::new(42));
        assert_eq!(ids.next_id(), TaskId::new(43));
    }

    #[test]
    fn shared_allocator_never_repeats_across_threads() {
        let ids = Arc::new(SequentialIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<TaskId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[rstest]
    fn fresh_task_starts_in_todo_without_dates(factory: TaskFactory) {
        let task = factory.create_unfinished(new_task());
        assert_eq!(task.state(), TaskState::ToDo);
        assert!(task.begin_date().is_none());
        assert!(task.finish_date().is_none());
        assert!(!task.has_execution());
    }

    #[rstest]
    fn rehydrate_assigns_fresh_id(factory: TaskFactory) {
        let original = factory.create_unfinished(new_task()).to_record();
        let restored = factory.rehydrate(original.clone()).unwrap();

        assert_ne!(restored.id(), original.id);
        assert_eq!(restored.command(), original.command);
    }

    #[rstest]
    fn rehydrate_rejects_finish_date_on_open_task(factory: TaskFactory) {
        let mut record = factory.create_unfinished(new_task()).to_record();
        record.finish_date = Some(Utc::now());

        assert!(matches!(
            factory.rehydrate(record),
            Err(TaskError::CorruptedState(_))
        ));
    }

    #[rstest]
    fn rehydrate_rejects_started_task_without_begin_date(factory: TaskFactory) {
        let mut record = factory.create_unfinished(new_task()).to_record();
        record.state = TaskState::Paused;

        assert!(matches!(
            factory.rehydrate(record),
            Err(TaskError::CorruptedState(_))
        ));
    }

    #[rstest]
    fn running_record_comes_back_paused(factory: TaskFactory) {
        let mut record = factory.create_unfinished(new_task()).to_record();
        record.state = TaskState::InProgress;
        record.begin_date = Some(Utc::now());

        let task = factory.rehydrate(record).unwrap();
        assert_eq!(task.state(), TaskState::Paused);
        assert!(task.begin_date().is_some());
    }
}
