use crate::error::AppError;
use crate::model::{Task, TaskId, TaskRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

pub const STORE_FILE_NAME: &str = "tasks.json";
pub const FIRST_TASK_ID: TaskId = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredTasks<T> {
    next_id: TaskId,
    tasks: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub tasks: Vec<Task>,
    pub next_id: TaskId,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: FIRST_TASK_ID,
        }
    }
}

/// Reads the state at `path`. A missing file is an empty state.
pub fn load_state(path: &Path) -> Result<TaskState, AppError> {
    if !path.exists() {
        debug!(
            "event=store_load module=json_store status=missing path={}",
            path.display()
        );
        return Ok(TaskState::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::persistence(format!("{}: {}", path.display(), err)))?;
    decode_state(&content)
        .map_err(|err| AppError::persistence(format!("{}: {}", path.display(), err.message())))
}

/// Decodes a whole document; any malformed record fails the entire decode.
pub fn decode_state(content: &str) -> Result<TaskState, AppError> {
    let stored: StoredTasks<serde_json::Value> = serde_json::from_str(content)
        .map_err(|err| AppError::persistence(format!("invalid task file: {err}")))?;

    let mut tasks = Vec::with_capacity(stored.tasks.len());
    let mut seen = HashSet::with_capacity(stored.tasks.len());
    for (index, value) in stored.tasks.into_iter().enumerate() {
        let task = Task::from_value(value)
            .map_err(|err| AppError::persistence(format!("record {index}: {}", err.message())))?;
        if !seen.insert(task.id()) {
            return Err(AppError::persistence(format!(
                "record {index}: duplicate id {}",
                task.id()
            )));
        }
        tasks.push(task);
    }

    // Repair a counter that lags behind the stored ids so they are never handed out twice.
    let mut floor = FIRST_TASK_ID;
    for (index, task) in tasks.iter().enumerate() {
        let after = task.id().checked_add(1).ok_or_else(|| {
            AppError::persistence(format!("record {index}: id space exhausted"))
        })?;
        floor = floor.max(after);
    }
    let next_id = stored.next_id.max(floor);

    Ok(TaskState { tasks, next_id })
}

pub fn encode_state(state: &TaskState) -> Result<String, AppError> {
    let records = state
        .tasks
        .iter()
        .map(Task::to_record)
        .collect::<Result<Vec<TaskRecord>, AppError>>()?;
    let stored = StoredTasks {
        next_id: state.next_id,
        tasks: records,
    };
    serde_json::to_string_pretty(&stored).map_err(|err| AppError::persistence(err.to_string()))
}

/// Writes the whole state through a temp file in the target directory, then
/// renames it over `path`.
pub fn save_state(path: &Path, state: &TaskState) -> Result<(), AppError> {
    let content = encode_state(state)?;
    write_atomic(path, content.as_bytes())?;
    debug!(
        "event=store_save module=json_store status=ok path={} tasks={}",
        path.display(),
        state.tasks.len()
    );
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let io_err = |err: std::io::Error| AppError::persistence(format!("{}: {}", path.display(), err));

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(file.path(), permissions).map_err(io_err)?;
    }

    file.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}
