use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::record::TaskRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("tasks can't be sorted by {0}")]
    NotSortable(ListField),

    #[error("{0} is already shown")]
    AlreadyShown(ListField),

    #[error("{0} is not shown")]
    NotShown(ListField),
}

/// A column of the task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListField {
    Id,
    Name,
    State,
    Priority,
    Category,
    Description,
    BeginDate,
    FinishDate,
    DeadlineDate,
    Command,
    Pid,
}

impl ListField {
    /// Display order of shown fields.
    pub const ALL: [ListField; 11] = [
        ListField::Id,
        ListField::Name,
        ListField::State,
        ListField::Priority,
        ListField::Category,
        ListField::Description,
        ListField::BeginDate,
        ListField::FinishDate,
        ListField::DeadlineDate,
        ListField::Command,
        ListField::Pid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ListField::Id => "id",
            ListField::Name => "name",
            ListField::State => "state",
            ListField::Priority => "priority",
            ListField::Category => "category",
            ListField::Description => "description",
            ListField::BeginDate => "beginDate",
            ListField::FinishDate => "finishDate",
            ListField::DeadlineDate => "deadlineDate",
            ListField::Command => "command",
            ListField::Pid => "pid",
        }
    }

    pub fn is_sortable(self) -> bool {
        !matches!(self, ListField::Description | ListField::Command | ListField::Pid)
    }

    fn value(self, record: &TaskRecord) -> String {
        let date = |value: Option<DateTime<Utc>>| value.map_or_else(|| "-".to_owned(), |d| d.to_rfc3339());
        match self {
            ListField::Id => record.id.to_string(),
            ListField::Name => record.name.clone(),
            ListField::State => record.state.to_string(),
            ListField::Priority => record.priority.to_string(),
            ListField::Category => record.category.to_string(),
            ListField::Description => record.description.clone(),
            ListField::BeginDate => date(record.begin_date),
            ListField::FinishDate => date(record.finish_date),
            ListField::DeadlineDate => record.deadline_date.to_rfc3339(),
            ListField::Command => record.command.clone(),
            ListField::Pid => record.pid.map_or_else(|| "NONE".to_owned(), |pid| pid.to_string()),
        }
    }

    fn compare(self, a: &TaskRecord, b: &TaskRecord) -> Ordering {
        match self {
            ListField::Id => a.id.cmp(&b.id),
            ListField::Name => a.name.cmp(&b.name),
            ListField::State => a.state.code().cmp(&b.state.code()),
            ListField::Priority => a.priority.cmp(&b.priority),
            ListField::Category => a.category.cmp(&b.category),
            ListField::BeginDate => a.begin_date.cmp(&b.begin_date),
            ListField::FinishDate => a.finish_date.cmp(&b.finish_date),
            ListField::DeadlineDate => a.deadline_date.cmp(&b.deadline_date),
            ListField::Description | ListField::Command | ListField::Pid => Ordering::Equal,
        }
    }
}

impl fmt::Display for ListField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for ListField {
    type Err = ViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListField::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ViewError::UnknownField(s.to_owned()))
    }
}

/// How `list` orders tasks and which fields it prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSettings {
    sort: ListField,
    ascending: bool,
    shown: Vec<ListField>,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            sort: ListField::Id,
            ascending: true,
            shown: vec![ListField::Id, ListField::Name, ListField::Command, ListField::State],
        }
    }
}

impl ListSettings {
    pub fn sort_field(&self) -> ListField {
        self.sort
    }

    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    pub fn change_sort(&mut self, field: ListField) -> Result<(), ViewError> {
        if !field.is_sortable() {
            return Err(ViewError::NotSortable(field));
        }
        self.sort = field;
        Ok(())
    }

    pub fn toggle_direction(&mut self) {
        self.ascending = !self.ascending;
    }

    pub fn show(&mut self, field: ListField) -> Result<(), ViewError> {
        if self.shown.contains(&field) {
            return Err(ViewError::AlreadyShown(field));
        }
        self.shown.push(field);
        Ok(())
    }

    pub fn hide(&mut self, field: ListField) -> Result<(), ViewError> {
        let before = self.shown.len();
        self.shown.retain(|shown| *shown != field);
        if self.shown.len() == before {
            return Err(ViewError::NotShown(field));
        }
        Ok(())
    }

    /// Sorts in place. Ties keep id order.
    pub fn sort(&self, records: &mut [TaskRecord]) {
        records.sort_by(|a, b| {
            let order = self.sort.compare(a, b).then_with(|| a.id.cmp(&b.id));
            if self.ascending {
                order
            } else {
                order.reverse()
            }
        });
    }

    /// One line per task: `field [value], ...` in the fixed field order.
    pub fn render(&self, records: &[TaskRecord]) -> String {
        let mut sorted = records.to_vec();
        self.sort(&mut sorted);
        sorted
            .iter()
            .map(|record| {
                ListField::ALL
                    .into_iter()
                    .filter(|field| self.shown.contains(field))
                    .map(|field| format!("{field} [{}]", field.value(record)))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
