use std::{
    error::Error,
    io::{self, Write},
};

use chrono::{DateTime, NaiveDate, Utc};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute, terminal,
};

use super::{
    stats,
    store::JsonTaskStore,
    view::{ListField, ListSettings},
};
use crate::manager::lifecycle::TaskLifecycle;
use crate::models::{
    record::TaskRecord,
    task::{NewTask, TaskCategory, TaskId, TaskPriority},
};

const HELP: &str = "\
Commands:
  create <name> <priority> <category> <deadline YYYY-MM-DD> <command...>
  start <id> | pause <id> | terminate <id> | status <id> | remove <id>
  command <id> <new command...>
  describe <id> <text...>
  list | stats | save | help | exit
  sort <field> | reverse | show <field> | hide <field>
Priorities: 1 UrgentImportant, 2 NotUrgentImportant, 3 UrgentNotImportant, 4 NotUrgentNotImportant
Categories: 1 work, 2 personal
Fields: id name state priority category description beginDate finishDate deadlineDate command pid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Create(NewTask),
    Start(TaskId),
    Pause(TaskId),
    Terminate(TaskId),
    Status(TaskId),
    Remove(TaskId),
    ChangeCommand(TaskId, String),
    Describe(TaskId, String),
    List,
    Sort(ListField),
    ReverseSort,
    Show(ListField),
    Hide(ListField),
    Stats,
    Save,
    Help,
    Exit,
}

pub fn run_cli(lifecycle: &TaskLifecycle, store: &JsonTaskStore) -> io::Result<()> {
    println!("Task supervisor started. Enter a command, 'help' for usage or 'exit' to quit.");
    let mut history: Vec<String> = Vec::new();
    let mut settings = ListSettings::default();

    loop {
        let input = read_line(&history)?;
        if input.trim().is_empty() {
            continue;
        }
        history.push(input.clone());

        match parse_command(&input) {
            Ok(CliCommand::Exit) => break,
            Ok(command) => {
                if let Err(err) = execute(lifecycle, store, &mut settings, command) {
                    println!("Error: {err}");
                }
            }
            Err(message) => println!("{message}"),
        }
    }

    println!("Trying to terminate all the running tasks...");
    for (id, err) in lifecycle.terminate_all() {
        println!("Failed to terminate task {id}: {err}");
    }
    save(lifecycle, store);
    println!("Exiting the program...");
    Ok(())
}

fn execute(
    lifecycle: &TaskLifecycle,
    store: &JsonTaskStore,
    settings: &mut ListSettings,
    command: CliCommand,
) -> Result<(), Box<dyn Error>> {
    match command {
        CliCommand::Create(new) => {
            let id = lifecycle.create(new);
            println!("Created task with ID: {id}");
            println!("Use `start {id}` to run it");
        }
        CliCommand::Start(id) => {
            lifecycle.start(id)?;
            println!("Task {id} started");
        }
        CliCommand::Pause(id) => {
            lifecycle.pause(id)?;
            println!("Task {id} paused (its command keeps running)");
        }
        CliCommand::Terminate(id) => {
            lifecycle.terminate(id)?;
            println!("Task {id} terminated");
        }
        CliCommand::Status(id) => print_details(&lifecycle.get(id)?),
        CliCommand::Remove(id) => {
            let record = lifecycle.remove(id)?;
            println!("Task {} '{}' removed", record.id, record.name);
        }
        CliCommand::ChangeCommand(id, text) => {
            lifecycle.change_command(id, text)?;
            println!("Command of task {id} updated");
        }
        CliCommand::Describe(id, text) => {
            lifecycle.change_description(id, text)?;
            println!("Description of task {id} updated");
        }
        CliCommand::List => print_list(settings, &lifecycle.list()),
        CliCommand::Sort(field) => {
            settings.change_sort(field)?;
            println!("Tasks are sorted by {field}");
        }
        CliCommand::ReverseSort => {
            settings.toggle_direction();
            let direction = if settings.is_ascending() { "ascending" } else { "descending" };
            println!("Sorting by {} {direction}", settings.sort_field());
        }
        CliCommand::Show(field) => {
            settings.show(field)?;
            println!("Listing now shows {field}");
        }
        CliCommand::Hide(field) => {
            settings.hide(field)?;
            println!("Listing no longer shows {field}");
        }
        CliCommand::Stats => print!("{}", stats::render(&lifecycle.list())),
        CliCommand::Save => save(lifecycle, store),
        CliCommand::Help => println!("{HELP}"),
        CliCommand::Exit => {}
    }
    Ok(())
}

fn save(lifecycle: &TaskLifecycle, store: &JsonTaskStore) {
    match store.save_all(&lifecycle.list()) {
        Ok(()) => println!("Tasks saved to {:?}", store.dir()),
        Err(err) => println!("Failed to save tasks: {err}"),
    }
}

fn print_list(settings: &ListSettings, records: &[TaskRecord]) {
    if records.is_empty() {
        println!("No tasks");
        return;
    }
    println!("{}", settings.render(records));
}

fn print_details(record: &TaskRecord) {
    let date = |value: Option<DateTime<Utc>>| value.map_or_else(|| "-".to_owned(), |d| d.to_rfc3339());
    println!("Task {} '{}'", record.id, record.name);
    println!("  state:       {}", record.state);
    println!("  priority:    {}", record.priority);
    println!("  category:    {}", record.category);
    println!("  description: {}", record.description);
    println!("  command:     {}", record.command);
    println!("  begin:       {}", date(record.begin_date));
    println!("  finish:      {}", date(record.finish_date));
    println!("  deadline:    {}", record.deadline_date.to_rfc3339());
}

pub fn parse_command(input: &str) -> Result<CliCommand, String> {
    let mut args = input.split_whitespace();
    let Some(verb) = args.next() else {
        return Err("Empty command.".to_owned());
    };

    match verb {
        "create" => {
            let name = args.next().ok_or("Task name must be specified.")?.to_owned();
            let priority = parse_priority(args.next().ok_or("Priority must be specified.")?)?;
            let category = parse_category(args.next().ok_or("Category must be specified.")?)?;
            let deadline = parse_deadline(args.next().ok_or("Deadline must be specified.")?)?;
            let command = rest(args);
            if command.is_empty() {
                return Err("Command to execute must be specified.".to_owned());
            }
            Ok(CliCommand::Create(NewTask {
                name,
                priority,
                category,
                description: String::new(),
                deadline,
                command,
            }))
        }
        "start" => parse_id(args.next()).map(CliCommand::Start),
        "pause" => parse_id(args.next()).map(CliCommand::Pause),
        "terminate" | "stop" => parse_id(args.next()).map(CliCommand::Terminate),
        "status" => parse_id(args.next()).map(CliCommand::Status),
        "remove" => parse_id(args.next()).map(CliCommand::Remove),
        "command" => {
            let id = parse_id(args.next())?;
            let command = rest(args);
            if command.is_empty() {
                return Err("New command must be specified.".to_owned());
            }
            Ok(CliCommand::ChangeCommand(id, command))
        }
        "describe" => {
            let id = parse_id(args.next())?;
            Ok(CliCommand::Describe(id, rest(args)))
        }
        "list" => Ok(CliCommand::List),
        "sort" => parse_field(args.next()).map(CliCommand::Sort),
        "reverse" => Ok(CliCommand::ReverseSort),
        "show" => parse_field(args.next()).map(CliCommand::Show),
        "hide" => parse_field(args.next()).map(CliCommand::Hide),
        "stats" => Ok(CliCommand::Stats),
        "save" => Ok(CliCommand::Save),
        "help" => Ok(CliCommand::Help),
        "exit" | "quit" => Ok(CliCommand::Exit),
        other => Err(format!("Unknown command: {other}. Type 'help' for usage.")),
    }
}

fn rest<'a>(args: impl Iterator<Item = &'a str>) -> String {
    args.collect::<Vec<_>>().join(" ")
}

fn parse_id(arg: Option<&str>) -> Result<TaskId, String> {
    let arg = arg.ok_or("Task ID must be specified.")?;
    arg.parse::<u64>()
        .map(TaskId::new)
        .map_err(|_| "Invalid task ID format.".to_owned())
}

fn parse_field(arg: Option<&str>) -> Result<ListField, String> {
    arg.ok_or("Field name must be specified.")?
        .parse::<ListField>()
        .map_err(|err| err.to_string())
}

fn parse_priority(arg: &str) -> Result<TaskPriority, String> {
    if let Ok(code) = arg.parse::<u8>() {
        return TaskPriority::try_from(code).map_err(|err| err.to_string());
    }
    TaskPriority::ALL
        .into_iter()
        .find(|priority| priority.label().eq_ignore_ascii_case(arg))
        .ok_or_else(|| format!("Unknown priority: {arg}"))
}

fn parse_category(arg: &str) -> Result<TaskCategory, String> {
    if let Ok(code) = arg.parse::<u8>() {
        return TaskCategory::try_from(code).map_err(|err| err.to_string());
    }
    TaskCategory::ALL
        .into_iter()
        .find(|category| category.label().eq_ignore_ascii_case(arg))
        .ok_or_else(|| format!("Unknown category: {arg}"))
}

fn parse_deadline(arg: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(arg, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(arg)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| format!("Invalid deadline: {arg}, expected e.g. 2025-05-28"))
}

/// Reads one line in raw mode, with Up/Down walking through `history`.
fn read_line(history: &[String]) -> io::Result<String> {
    terminal::enable_raw_mode()?;
    let line = edit_line(history);
    terminal::disable_raw_mode()?;
    println!();
    line
}

fn edit_line(history: &[String]) -> io::Result<String> {
    let mut input = String::new();
    let mut history_index = history.len();
    redraw(&input)?;

    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind != KeyEventKind::Press {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => return Ok(input),
            KeyCode::Char('c' | 'd') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok("exit".to_owned());
            }
            KeyCode::Up => {
                history_index = history_index.saturating_sub(1);
                if let Some(command) = history.get(history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if history_index < history.len() {
                    history_index += 1;
                }
                input = history.get(history_index).cloned().unwrap_or_default();
                redraw(&input)?;
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{c}");
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    print!(">>> {input}");
    io::stdout().flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[test]
    fn create_collects_the_trailing_command() {
        let command = parse_command("create backup 1 work 2025-05-28 tar czf out.tgz src").unwrap();

        assert_eq!(
            command,
            CliCommand::Create(NewTask {
                name: "backup".to_owned(),
                priority: TaskPriority::UrgentImportant,
                category: TaskCategory::Work,
                description: String::new(),
                deadline: Utc.with_ymd_and_hms(2025, 5, 28, 0, 0, 0).unwrap(),
                command: "tar czf out.tgz src".to_owned(),
            })
        );
    }

    #[test]
    fn priorities_and_categories_accept_labels() {
        let CliCommand::Create(new) =
            parse_command("create x notUrgentNotImportant PERSONAL 2025-01-01T10:00:00Z true").unwrap()
        else {
            panic!("expected create");
        };
        assert_eq!(new.priority, TaskPriority::NotUrgentNotImportant);
        assert_eq!(new.category, TaskCategory::Personal);
        assert_eq!(new.deadline, Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap());
    }

    #[rstest]
    #[case("start 4", CliCommand::Start(TaskId::new(4)))]
    #[case("pause 4", CliCommand::Pause(TaskId::new(4)))]
    #[case("stop 4", CliCommand::Terminate(TaskId::new(4)))]
    #[case("terminate 4", CliCommand::Terminate(TaskId::new(4)))]
    #[case("command 4 ls -la", CliCommand::ChangeCommand(TaskId::new(4), "ls -la".to_owned()))]
    #[case("describe 4", CliCommand::Describe(TaskId::new(4), String::new()))]
    #[case("list", CliCommand::List)]
    #[case("sort deadlineDate", CliCommand::Sort(ListField::DeadlineDate))]
    #[case("reverse", CliCommand::ReverseSort)]
    #[case("show priority", CliCommand::Show(ListField::Priority))]
    #[case("hide command", CliCommand::Hide(ListField::Command))]
    #[case("exit", CliCommand::Exit)]
    fn simple_commands_parse(#[case] input: &str, #[case] expected: CliCommand) {
        assert_eq!(parse_command(input).unwrap(), expected);
    }

    #[rstest]
    #[case("start", "Task ID must be specified.")]
    #[case("start abc", "Invalid task ID format.")]
    #[case("create x 9 work 2025-01-01 true", "unknown priority code 9")]
    #[case("create x 1 hobby 2025-01-01 true", "Unknown category: hobby")]
    #[case("create x 1 work tomorrow true", "Invalid deadline: tomorrow")]
    #[case("create x 1 work 2025-01-01", "Command to execute must be specified.")]
    #[case("fly 1", "Unknown command: fly")]
    #[case("sort", "Field name must be specified.")]
    #[case("show owner", "unknown field 'owner'")]
    fn bad_input_is_explained(#[case] input: &str, #[case] message: &str) {
        assert!(parse_command(input).unwrap_err().contains(message));
    }
}
