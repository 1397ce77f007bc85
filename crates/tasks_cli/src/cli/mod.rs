use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasks_core::config::ConfigOverrides;
use tasks_core::error::AppError;
use tasks_core::model::{TaskId, TaskStatus, TaskUpdate, parse_date};
use tasks_core::store::TaskFilter;
use time::Date;

#[derive(Parser, Debug)]
#[command(name = "tasks", author, version, about = "Track personal tasks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Task file to use (overrides TASKS_STORE_PATH and the config file)
    #[arg(long, value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            store_path: self.store.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task
    ///
    /// Example: tasks add "Buy milk" -d "semi-skimmed" --due 2026-10-20
    Add {
        name: String,
        #[arg(short = 'd', long, default_value = "")]
        description: String,
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date_arg)]
        due: Option<Date>,
        #[arg(long, value_parser = parse_status_arg)]
        status: Option<TaskStatus>,
    },
    /// Show details of a task
    ///
    /// Example: tasks show 1
    Show { id: TaskId },
    /// Change fields of a task
    ///
    /// Example: tasks edit 1 --name "Buy oat milk" --status in_progress
    /// Example: tasks edit 1 --clear-due
    Edit {
        id: TaskId,
        #[arg(long)]
        name: Option<String>,
        #[arg(short = 'd', long)]
        description: Option<String>,
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date_arg, conflicts_with = "clear_due")]
        due: Option<Date>,
        #[arg(long)]
        clear_due: bool,
        #[arg(long, value_parser = parse_status_arg)]
        status: Option<TaskStatus>,
    },
    /// Mark a task as in progress
    ///
    /// Example: tasks start 1
    Start { id: TaskId },
    /// Mark a task as completed
    ///
    /// Example: tasks done 1
    Done { id: TaskId },
    /// Delete a task
    ///
    /// Example: tasks delete 1
    Delete { id: TaskId },
    /// List all tasks
    List,
    /// Search task names and descriptions
    ///
    /// Example: tasks search milk
    Search { text: String },
    /// List tasks matching every given condition
    ///
    /// Example: tasks filter --status pending --from 2026-10-01 --to 2026-10-31
    Filter {
        #[arg(long, value_parser = parse_status_arg)]
        status: Option<TaskStatus>,
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date_arg)]
        from: Option<Date>,
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date_arg)]
        to: Option<Date>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List open tasks whose due date has passed
    Overdue,
    /// Show task counts and completion rate
    Stats,
    /// Write all tasks to another file
    ///
    /// Example: tasks export backup.json
    Export { path: PathBuf },
    /// Replace all tasks with the contents of a file
    ///
    /// Example: tasks import backup.json
    Import { path: PathBuf },
    /// Delete every task
    Clear,
}

impl Command {
    /// The partial update described by `edit`, `start` or `done`.
    pub fn task_update(&self) -> Option<(TaskId, TaskUpdate)> {
        match self {
            Command::Edit {
                id,
                name,
                description,
                due,
                clear_due,
                status,
            } => {
                let due_date = if *clear_due { Some(None) } else { due.map(Some) };
                Some((
                    *id,
                    TaskUpdate {
                        name: name.clone(),
                        description: description.clone(),
                        due_date,
                        status: *status,
                    },
                ))
            }
            Command::Start { id } => Some((*id, TaskUpdate::status(TaskStatus::InProgress))),
            Command::Done { id } => Some((*id, TaskUpdate::status(TaskStatus::Completed))),
            _ => None,
        }
    }

    pub fn task_filter(&self) -> Option<TaskFilter> {
        match self {
            Command::Filter {
                status,
                from,
                to,
                name,
            } => Some(TaskFilter {
                status: *status,
                date_from: *from,
                date_to: *to,
                name_contains: name.clone(),
            }),
            _ => None,
        }
    }
}

pub fn parse_date_arg(raw: &str) -> Result<Date, String> {
    parse_date(raw).map_err(|err| err.message())
}

pub fn parse_status_arg(raw: &str) -> Result<TaskStatus, String> {
    raw.trim()
        .to_ascii_lowercase()
        .replace('-', "_")
        .parse::<TaskStatus>()
        .map_err(|err| err.message())
}

/// Reduces a clap error to its first line, without the `error: ` prefix.
pub fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::validation(message)
}

/// Splits an interactive input line into arguments, honouring double quotes.
pub fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            quoted = true;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() || quoted {
                args.push(std::mem::take(&mut current));
                quoted = false;
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::validation("unterminated quote in command"));
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    Ok(args)
}
