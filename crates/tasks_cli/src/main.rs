use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use flexi_logger::{Logger, LoggerHandle};
use log::{info, warn};
use std::io::{self, BufRead, IsTerminal};
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tasks_cli::cli::{Cli, Command, normalize_parse_error, split_command_line};
use tasks_core::config::{load_config_with_fallback, merge_overrides, resolve_store_path};
use tasks_core::error::AppError;
use tasks_core::model::{NewTask, Task, TaskId, format_date};
use tasks_core::store::{TaskStatistics, TaskStore, local_today};
use time::Date;

const DESCRIPTION_PREVIEW_CHARS: usize = 30;

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: TaskId,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Due")]
    due: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn status_text(task: &Task, today: Date) -> String {
    if task.is_overdue(today) {
        format!("{} (overdue)", task.status())
    } else {
        task.status().to_string()
    }
}

fn due_text(task: &Task) -> Result<String, AppError> {
    match task.due_date() {
        Some(date) => format_date(date),
        None => Ok("-".to_string()),
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= DESCRIPTION_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(DESCRIPTION_PREVIEW_CHARS - 3).collect();
    format!("{cut}...")
}

fn task_json(task: &Task) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(task.to_record()?).map_err(|err| AppError::validation(err.to_string()))
}

fn print_tasks(tasks: &[&Task], json: bool) -> Result<(), AppError> {
    if json {
        let payload = tasks
            .iter()
            .map(|task| task_json(task))
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", serde_json::Value::Array(payload));
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let today = local_today();
    let mut rows = Vec::with_capacity(tasks.len());
    for task in tasks {
        rows.push(TaskRow {
            id: task.id(),
            status: status_text(task, today),
            name: task.name().to_string(),
            due: due_text(task)?,
            description: preview(task.description()),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::psql());
    println!("{table}");
    Ok(())
}

fn print_task(label: &str, task: &Task, json: bool) -> Result<(), AppError> {
    if json {
        println!("{}", task_json(task)?);
    } else {
        println!("{label}: {} ({})", task.name(), task.id());
    }
    Ok(())
}

fn print_task_details(task: &Task, json: bool) -> Result<(), AppError> {
    if json {
        println!("{}", task_json(task)?);
        return Ok(());
    }

    let record = task.to_record()?;
    println!("Task #{}", record.id);
    println!("  Name:        {}", record.name);
    if record.description.is_empty() {
        println!("  Description: -");
    } else {
        println!("  Description: {}", record.description);
    }
    println!("  Status:      {}", status_text(task, local_today()));
    println!("  Due:         {}", record.due_date.as_deref().unwrap_or("-"));
    println!("  Created:     {}", record.created_at);
    if let Some(updated_at) = record.updated_at.as_deref() {
        println!("  Updated:     {updated_at}");
    }
    if let Some(completed_at) = record.completed_at.as_deref() {
        println!("  Completed:   {completed_at}");
    }
    Ok(())
}

fn print_statistics(stats: &TaskStatistics, json: bool) -> Result<(), AppError> {
    if json {
        let value =
            serde_json::to_value(stats).map_err(|err| AppError::validation(err.to_string()))?;
        println!("{value}");
        return Ok(());
    }

    println!("Total:           {}", stats.total);
    println!("Pending:         {}", stats.pending);
    println!("In progress:     {}", stats.in_progress);
    println!("Completed:       {}", stats.completed);
    println!("Overdue:         {}", stats.overdue);
    println!("Completion rate: {:.1}%", stats.completion_rate * 100.0);
    Ok(())
}

fn print_count(label: &str, count: usize, path: Option<&Path>, json: bool) {
    if json {
        let json = serde_json::json!({
            "count": count,
            "path": path.map(|path| path.display().to_string()),
        });
        println!("{json}");
    } else {
        match path {
            Some(path) => println!("{label} {count} task(s): {}", path.display()),
            None => println!("{label} {count} task(s)"),
        }
    }
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn run_command(cli: &Cli, store: &mut TaskStore) -> Result<(), AppError> {
    match &cli.command {
        Command::Add {
            name,
            description,
            due,
            status,
        } => {
            let draft = NewTask {
                name: name.clone(),
                description: description.clone(),
                due_date: *due,
                status: *status,
            };
            let task = store.create(draft)?;
            print_task("Added task", &task, cli.json)?;
        }
        Command::Show { id } => {
            print_task_details(store.get(*id)?, cli.json)?;
        }
        Command::Edit { .. } | Command::Start { .. } | Command::Done { .. } => {
            if let Some((id, changes)) = cli.command.task_update() {
                if changes.is_empty() {
                    return Err(AppError::validation("nothing to change"));
                }
                let task = store.update(id, &changes)?;
                print_task("Updated task", &task, cli.json)?;
            }
        }
        Command::Delete { id } => {
            let task = store.delete(*id)?;
            print_task("Deleted task", &task, cli.json)?;
        }
        Command::List => {
            let tasks: Vec<&Task> = store.list().iter().collect();
            print_tasks(&tasks, cli.json)?;
        }
        Command::Search { text } => {
            print_tasks(&store.search(text), cli.json)?;
        }
        Command::Filter { .. } => {
            if let Some(criteria) = cli.command.task_filter() {
                print_tasks(&store.filter(&criteria), cli.json)?;
            }
        }
        Command::Overdue => {
            print_tasks(&store.overdue(), cli.json)?;
        }
        Command::Stats => {
            print_statistics(&store.statistics(), cli.json)?;
        }
        Command::Export { path } => {
            store.export(path)?;
            print_count("Exported", store.len(), Some(path.as_path()), cli.json);
        }
        Command::Import { path } => {
            let count = store.import(path)?;
            print_count("Imported", count, Some(path.as_path()), cli.json);
        }
        Command::Clear => {
            let count = store.clear()?;
            print_count("Deleted", count, None, cli.json);
        }
    }

    Ok(())
}

fn run_interactive(store_path: &Path) -> Result<(), AppError> {
    let mut store = TaskStore::open(store_path)?;
    let mut input = String::new();
    let stdin = io::stdin();
    let interactive_terminal = stdin.is_terminal();
    let mut stdin_lock = stdin.lock();

    if interactive_terminal {
        println!("tasks: type 'help' for commands, 'exit' to quit");
    }

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::persistence(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("tasks".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) if is_informational(&err) => {
                let _ = err.print();
                continue;
            }
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        let result = match cli.store.as_deref() {
            Some(path) => {
                TaskStore::open(path).and_then(|mut scoped| run_command(&cli, &mut scoped))
            }
            None => run_command(&cli, &mut store),
        };
        if let Err(err) = result {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

fn is_informational(err: &clap::Error) -> bool {
    matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

fn init_logging(level: &str) -> Option<LoggerHandle> {
    let started = Logger::try_with_env_or_str(level).and_then(|logger| {
        logger
            .log_to_stderr()
            .format(flexi_logger::default_format)
            .start()
    });
    match started {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("WARN: logging disabled: {err}");
            None
        }
    }
}

fn main() {
    let mut args = std::env::args_os();
    args.next();
    let interactive = args.next().is_none();

    let cli = if interactive {
        None
    } else {
        match Cli::try_parse() {
            Ok(cli) => Some(cli),
            Err(err) if is_informational(&err) => err.exit(),
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                std::process::exit(1);
            }
        }
    };

    let overrides = cli.as_ref().map(Cli::overrides).unwrap_or_default();
    let loaded = load_config_with_fallback();
    let config = merge_overrides(&loaded.config, &overrides);
    let _logger = init_logging(config.log_level());
    if let Some(err) = loaded.error.as_ref() {
        warn!("event=config_load module=cli status=fallback error={err}");
    }

    let store_path = resolve_store_path(&loaded.config, &overrides);
    info!(
        "event=cli_start module=cli interactive={interactive} store={}",
        store_path.display()
    );

    let result = match cli {
        Some(cli) => {
            TaskStore::open(&store_path).and_then(|mut store| run_command(&cli, &mut store))
        }
        None => run_interactive(&store_path),
    };

    if let Err(err) = result {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
