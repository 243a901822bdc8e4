use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UnknownCode;
use crate::worker::supervisor::ExecutionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskState {
    ToDo,
    InProgress,
    Finished,
    Terminated,
    Paused,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::ToDo,
        TaskState::InProgress,
        TaskState::Finished,
        TaskState::Terminated,
        TaskState::Paused,
    ];

    pub const fn code(self) -> u8 {
        match self {
            TaskState::ToDo => 1,
            TaskState::InProgress => 2,
            TaskState::Finished => 3,
            TaskState::Terminated => 4,
            TaskState::Paused => 5,
        }
    }

    /// Finished and Terminated admit no further transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Terminated)
    }

    pub const fn has_started(self) -> bool {
        !matches!(self, TaskState::ToDo)
    }
}

impl From<TaskState> for u8 {
    fn from(state: TaskState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for TaskState {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.code() == code)
            .ok_or(UnknownCode { kind: "state", code })
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::ToDo => "ToDo",
            TaskState::InProgress => "InProgress",
            TaskState::Finished => "Finished",
            TaskState::Terminated => "Terminated",
            TaskState::Paused => "Paused",
        };
        f.pad(label)
    }
}

/// Eisenhower matrix quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskPriority {
    UrgentImportant,
    NotUrgentImportant,
    UrgentNotImportant,
    NotUrgentNotImportant,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::UrgentImportant,
        TaskPriority::NotUrgentImportant,
        TaskPriority::UrgentNotImportant,
        TaskPriority::NotUrgentNotImportant,
    ];

    pub const fn code(self) -> u8 {
        match self {
            TaskPriority::UrgentImportant => 1,
            TaskPriority::NotUrgentImportant => 2,
            TaskPriority::UrgentNotImportant => 3,
            TaskPriority::NotUrgentNotImportant => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TaskPriority::UrgentImportant => "UrgentImportant",
            TaskPriority::NotUrgentImportant => "NotUrgentImportant",
            TaskPriority::UrgentNotImportant => "UrgentNotImportant",
            TaskPriority::NotUrgentNotImportant => "NotUrgentNotImportant",
        }
    }
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> Self {
        priority.code()
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TaskPriority::ALL
            .into_iter()
            .find(|priority| priority.code() == code)
            .ok_or(UnknownCode { kind: "priority", code })
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskCategory {
    Work,
    Personal,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 2] = [TaskCategory::Work, TaskCategory::Personal];

    pub const fn code(self) -> u8 {
        match self {
            TaskCategory::Work => 1,
            TaskCategory::Personal => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TaskCategory::Work => "work",
            TaskCategory::Personal => "personal",
        }
    }
}

impl From<TaskCategory> for u8 {
    fn from(category: TaskCategory) -> Self {
        category.code()
    }
}

impl TryFrom<u8> for TaskCategory {
    type Error = UnknownCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TaskCategory::ALL
            .into_iter()
            .find(|category| category.code() == code)
            .ok_or(UnknownCode { kind: "category", code })
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Caller-supplied fields of a task that has never run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub command: String,
}

/// A named shell command and its lifecycle data.
///
/// Fields are read through accessors; every mutation goes through
/// [`TaskLifecycle`](crate::manager::lifecycle::TaskLifecycle).
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    name: String,
    description: String,
    command: String,
    priority: TaskPriority,
    category: TaskCategory,
    state: TaskState,
    begin_date: Option<DateTime<Utc>>,
    finish_date: Option<DateTime<Utc>>,
    deadline_date: DateTime<Utc>,
    execution: Option<ExecutionHandle>,
}

impl Task {
    pub(crate) fn unfinished(id: TaskId, new: NewTask) -> Self {
        Self {
            id,
            name: new.name,
            description: new.description,
            command: new.command,
            priority: new.priority,
            category: new.category,
            state: TaskState::ToDo,
            begin_date: None,
            finish_date: None,
            deadline_date: new.deadline,
            execution: None,
        }
    }

    pub(crate) fn restored(
        id: TaskId,
        new: NewTask,
        state: TaskState,
        begin_date: Option<DateTime<Utc>>,
        finish_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            state,
            begin_date,
            finish_date,
            ..Self::unfinished(id, new)
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn category(&self) -> TaskCategory {
        self.category
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn begin_date(&self) -> Option<DateTime<Utc>> {
        self.begin_date
    }

    pub fn finish_date(&self) -> Option<DateTime<Utc>> {
        self.finish_date
    }

    pub fn deadline_date(&self) -> DateTime<Utc> {
        self.deadline_date
    }

    /// Pid of the live child process, if a worker is attached.
    pub fn pid(&self) -> Option<u32> {
        self.execution.as_ref().map(ExecutionHandle::pid)
    }

    pub fn has_execution(&self) -> bool {
        self.execution.is_some()
    }

    pub(crate) fn mark_in_progress(&mut self, now: DateTime<Utc>) {
        self.begin_date.get_or_insert(now);
        self.state = TaskState::InProgress;
    }

    pub(crate) fn mark_paused(&mut self) {
        self.state = TaskState::Paused;
    }

    pub(crate) fn mark_finished(&mut self, now: DateTime<Utc>) {
        self.finish_date = Some(now);
        self.state = TaskState::Finished;
    }

    pub(crate) fn mark_terminated(&mut self, now: DateTime<Utc>) {
        self.begin_date.get_or_insert(now);
        self.finish_date = Some(now);
        self.state = TaskState::Terminated;
    }

    pub(crate) fn set_command(&mut self, command: String) {
        self.command = command;
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = description;
    }

    pub(crate) fn attach_execution(&mut self, handle: ExecutionHandle) {
        self.execution = Some(handle);
    }

    pub(crate) fn detach_execution(&mut self) -> Option<ExecutionHandle> {
        self.execution.take()
    }
}
