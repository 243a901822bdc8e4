use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{NewTask, Task, TaskCategory, TaskId, TaskPriority, TaskState};

/// Flat, serialisable snapshot of a [`Task`].
///
/// Enum fields are written as their integer codes and dates as RFC 3339
/// strings or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub description: String,
    pub begin_date: Option<DateTime<Utc>>,
    pub finish_date: Option<DateTime<Utc>>,
    pub deadline_date: DateTime<Utc>,
    pub command: String,
    #[serde(skip)]
    pub pid: Option<u32>,
}

impl TaskRecord {
    pub(crate) fn into_new_task(self) -> NewTask {
        NewTask {
            name: self.name,
            priority: self.priority,
            category: self.category,
            description: self.description,
            deadline: self.deadline_date,
            command: self.command,
        }
    }
}

impl Task {
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id(),
            name: self.name().to_owned(),
            state: self.state(),
            priority: self.priority(),
            category: self.category(),
            description: self.description().to_owned(),
            begin_date: self.begin_date(),
            finish_date: self.finish_date(),
            deadline_date: self.deadline_date(),
            command: self.command().to_owned(),
            pid: self.pid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_task() -> Task {
        let new = NewTask {
            name: "backup".to_owned(),
            priority: TaskPriority::UrgentNotImportant,
            category: TaskCategory::Personal,
            description: "nightly copy".to_owned(),
            deadline: Utc.with_ymd_and_hms(2025, 5, 28, 0, 0, 0).unwrap(),
            command: "cp -r a b".to_owned(),
        };
        Task::restored(
            TaskId::new(7),
            new,
            TaskState::Finished,
            Some(Utc.with_ymd_and_hms(2025, 5, 20, 8, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2025, 5, 20, 8, 5, 0).unwrap()),
        )
    }

    #[test]
    fn record_serialises_codes_and_iso_dates() {
        let value = serde_json::to_value(sample_task().to_record()).unwrap();

        assert_eq!(
            value,
            json!({
                "id": 7,
                "name": "backup",
                "state": 3,
                "priority": 3,
                "category": 2,
                "description": "nightly copy",
                "beginDate": "2025-05-20T08:00:00Z",
                "finishDate": "2025-05-20T08:05:00Z",
                "deadlineDate": "2025-05-28T00:00:00Z",
                "command": "cp -r a b",
            })
        );
    }

    #[test]
    fn unfinished_task_renders_null_dates() {
        let mut record = sample_task().to_record();
        record.state = TaskState::ToDo;
        record.begin_date = None;
        record.finish_date = None;

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], json!(1));
        assert!(value["beginDate"].is_null());
        assert!(value["finishDate"].is_null());
    }

    #[test]
    fn unknown_state_code_is_rejected() {
        let mut value = serde_json::to_value(sample_task().to_record()).unwrap();
        value["state"] = json!(9);

        let err = serde_json::from_value::<TaskRecord>(value).unwrap_err();
        assert!(err.to_string().contains("unknown state code 9"));
    }

    #[test]
    fn record_reads_back_from_json() {
        let record = sample_task().to_record();
        let text = serde_json::to_string(&record).unwrap();

        let parsed: TaskRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }
}
