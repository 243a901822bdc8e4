//! Preconditions for every lifecycle transition.
//!
//! These functions only look at the current state; they never mutate.

use chrono::{DateTime, Utc};

use crate::error::{Result, TaskError};
use crate::models::task::TaskState;

pub fn validate_start(state: TaskState) -> Result<()> {
    match state {
        TaskState::Finished => Err(TaskError::InvalidStateChange(
            "can't start a task that's already finished, consider creating a new task",
        )),
        TaskState::InProgress => Err(TaskError::InvalidStateChange(
            "can't start a task that's already running",
        )),
        TaskState::Terminated => Err(TaskError::InvalidStateChange(
            "can't start a task that has already been terminated",
        )),
        TaskState::ToDo | TaskState::Paused => Ok(()),
    }
}

pub fn validate_terminate(state: TaskState, finish_date: Option<DateTime<Utc>>) -> Result<()> {
    match state {
        TaskState::Finished => Err(TaskError::InvalidStateChange(
            "can't terminate a task that's already finished",
        )),
        TaskState::Terminated => Err(TaskError::InvalidStateChange(
            "can't terminate a task that has already been terminated",
        )),
        TaskState::ToDo => Err(TaskError::InvalidStateChange(
            "can't terminate a task that hasn't been started yet",
        )),
        TaskState::InProgress | TaskState::Paused => ensure_no_finish_date(finish_date),
    }
}

/// Checked before a worker reports a normal exit.
pub fn validate_finish(state: TaskState, finish_date: Option<DateTime<Utc>>) -> Result<()> {
    match state {
        TaskState::Finished => Err(TaskError::InvalidStateChange(
            "can't finish a task that's already finished",
        )),
        TaskState::Terminated => Err(TaskError::InvalidStateChange(
            "can't finish a task that has already been terminated",
        )),
        TaskState::ToDo => Err(TaskError::InvalidStateChange(
            "can't finish a task that hasn't been started yet",
        )),
        TaskState::InProgress | TaskState::Paused => ensure_no_finish_date(finish_date),
    }
}

pub fn validate_change_command(state: TaskState) -> Result<()> {
    if state == TaskState::InProgress {
        return Err(TaskError::NotAllowedOperation(
            "can't modify a task's command while it is running, pause the task first",
        ));
    }
    Ok(())
}

pub fn validate_pause(state: TaskState) -> Result<()> {
    match state {
        TaskState::Terminated => Err(TaskError::InvalidStateChange(
            "can't pause a task that has already been terminated",
        )),
        TaskState::Finished => Err(TaskError::InvalidStateChange(
            "can't pause a task that has already been finished",
        )),
        TaskState::ToDo => Err(TaskError::InvalidStateChange(
            "can't pause a task that hasn't been started yet",
        )),
        TaskState::Paused => Err(TaskError::InvalidStateChange(
            "can't pause a task that is already paused",
        )),
        TaskState::InProgress => Ok(()),
    }
}

/// A finish date on a non-terminal task means an earlier transition went wrong.
fn ensure_no_finish_date(finish_date: Option<DateTime<Utc>>) -> Result<()> {
    if finish_date.is_some() {
        return Err(TaskError::CorruptedState(
            "task already has a finish date but is neither finished nor terminated",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn is_invalid_change(result: Result<()>) -> bool {
        matches!(result, Err(TaskError::InvalidStateChange(_)))
    }

    #[rstest]
    #[case(TaskState::ToDo, true)]
    #[case(TaskState::Paused, true)]
    #[case(TaskState::InProgress, false)]
    #[case(TaskState::Finished, false)]
    #[case(TaskState::Terminated, false)]
    fn start_allowed_only_from_todo_or_paused(#[case] state: TaskState, #[case] allowed: bool) {
        let result = validate_start(state);
        if allowed {
            assert!(result.is_ok());
        } else {
            assert!(is_invalid_change(result));
        }
    }

    #[test]
    fn start_rejections_carry_distinct_reasons() {
        let reasons: Vec<String> = [TaskState::Finished, TaskState::InProgress, TaskState::Terminated]
            .into_iter()
            .map(|state| validate_start(state).unwrap_err().to_string())
            .collect();

        assert_ne!(reasons[0], reasons[1]);
        assert_ne!(reasons[1], reasons[2]);
        assert_ne!(reasons[0], reasons[2]);
    }

    #[rstest]
    #[case(TaskState::InProgress, true)]
    #[case(TaskState::Paused, true)]
    #[case(TaskState::ToDo, false)]
    #[case(TaskState::Finished, false)]
    #[case(TaskState::Terminated, false)]
    fn terminate_allowed_only_while_started(#[case] state: TaskState, #[case] allowed: bool) {
        let result = validate_terminate(state, None);
        if allowed {
            assert!(result.is_ok());
        } else {
            assert!(is_invalid_change(result));
        }
    }

    #[rstest]
    #[case(TaskState::InProgress)]
    #[case(TaskState::Paused)]
    fn terminate_detects_stray_finish_date(#[case] state: TaskState) {
        let result = validate_terminate(state, Some(Utc::now()));
        assert!(matches!(result, Err(TaskError::CorruptedState(_))));
    }

    #[test]
    fn finish_rejects_second_completion() {
        assert!(is_invalid_change(validate_finish(TaskState::Finished, Some(Utc::now()))));
        assert!(is_invalid_change(validate_finish(TaskState::Terminated, Some(Utc::now()))));
        assert!(matches!(
            validate_finish(TaskState::InProgress, Some(Utc::now())),
            Err(TaskError::CorruptedState(_))
        ));
        assert!(validate_finish(TaskState::Paused, None).is_ok());
    }

    #[rstest]
    #[case(TaskState::ToDo)]
    #[case(TaskState::Paused)]
    #[case(TaskState::Finished)]
    #[case(TaskState::Terminated)]
    fn command_editable_unless_running(#[case] state: TaskState) {
        assert!(validate_change_command(state).is_ok());
    }

    #[test]
    fn command_locked_while_running() {
        assert!(matches!(
            validate_change_command(TaskState::InProgress),
            Err(TaskError::NotAllowedOperation(_))
        ));
    }

    #[rstest]
    #[case(TaskState::ToDo)]
    #[case(TaskState::Paused)]
    #[case(TaskState::Finished)]
    #[case(TaskState::Terminated)]
    fn pause_rejected_outside_in_progress(#[case] state: TaskState) {
        assert!(is_invalid_change(validate_pause(state)));
    }

    #[test]
    fn pause_allowed_while_running() {
        assert!(validate_pause(TaskState::InProgress).is_ok());
    }
}
