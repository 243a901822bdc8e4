use std::{collections::BTreeMap, fmt::Write};

use chrono::Duration;

use crate::models::{
    record::TaskRecord,
    task::{TaskCategory, TaskId, TaskPriority},
};

pub fn count_by_category(records: &[TaskRecord]) -> BTreeMap<TaskCategory, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.category).or_insert(0) += 1;
    }
    counts
}

pub fn count_by_priority(records: &[TaskRecord]) -> BTreeMap<TaskPriority, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.priority).or_insert(0) += 1;
    }
    counts
}

/// Time from begin to finish of every finished or terminated task.
pub fn completion_times(records: &[TaskRecord]) -> BTreeMap<TaskId, Duration> {
    records
        .iter()
        .filter(|record| record.state.is_terminal())
        .filter_map(|record| Some((record.id, record.finish_date? - record.begin_date?)))
        .collect()
}

pub fn render(records: &[TaskRecord]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Tasks by category:");
    for (category, count) in count_by_category(records) {
        let _ = writeln!(out, "  {:<24}{}", category, count);
    }

    let _ = writeln!(out, "Tasks by priority:");
    for (priority, count) in count_by_priority(records) {
        let _ = writeln!(out, "  {:<24}{}", priority, count);
    }

    let times = completion_times(records);
    if times.is_empty() {
        let _ = writeln!(out, "No finished or terminated tasks yet.");
    } else {
        let _ = writeln!(out, "Completion time (ms):");
        for (id, elapsed) in times {
            let _ = writeln!(out, "  task {:<19}{}", id, elapsed.num_milliseconds());
        }
    }
    out
}
