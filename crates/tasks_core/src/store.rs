//! In-memory task collection with write-through persistence.
//!
//! Every mutating call applies its change, rewrites the whole file, and
//! rolls the in-memory state back if the write fails, so memory and disk
//! never disagree after an error.

use crate::error::AppError;
use crate::model::{NewTask, Task, TaskId, TaskStatus, TaskUpdate};
use crate::storage::json_store::{self, TaskState};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::{Date, OffsetDateTime, UtcOffset};

/// Match conditions combined with logical AND. `None` skips a condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Inclusive lower bound on `due_date`.
    pub date_from: Option<Date>,
    /// Inclusive upper bound on `due_date`.
    pub date_to: Option<Date>,
    /// Case-insensitive substring of the task name.
    pub name_contains: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status
            && task.status() != status
        {
            return false;
        }

        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(due) = task.due_date() else {
                return false;
            };
            if self.date_from.is_some_and(|from| due < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| due > to) {
                return false;
            }
        }

        if let Some(needle) = self.name_contains.as_deref() {
            return contains_ignore_case(task.name(), needle);
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub overdue: usize,
    /// `completed / total`, or `0.0` for an empty store.
    pub completion_rate: f64,
}

#[derive(Debug)]
pub struct TaskStore {
    path: PathBuf,
    tasks: Vec<Task>,
    next_id: TaskId,
}

impl TaskStore {
    /// Creates an empty store bound to `path` without touching the disk.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let state = TaskState::default();
        Self {
            path: path.into(),
            tasks: state.tasks,
            next_id: state.next_id,
        }
    }

    /// Creates a store bound to `path` and loads whatever it holds.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, AppError> {
        let mut store = Self::new(path);
        store.load()?;
        info!(
            "event=store_open module=store status=ok path={} tasks={} next_id={}",
            store.path.display(),
            store.tasks.len(),
            store.next_id
        );
        Ok(store)
    }

    pub fn next_id(&self) -> TaskId {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn create(&mut self, draft: NewTask) -> Result<Task, AppError> {
        let following = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| AppError::persistence("id space exhausted"))?;
        let task = Task::new(self.next_id, draft, OffsetDateTime::now_utc())?;
        let created = self.commit(|store| {
            store.next_id = following;
            store.tasks.push(task.clone());
            Ok(task)
        })?;
        info!(
            "event=task_create module=store status=ok id={} status={}",
            created.id(),
            created.status()
        );
        Ok(created)
    }

    pub fn get(&self, id: TaskId) -> Result<&Task, AppError> {
        self.tasks
            .iter()
            .find(|task| task.id() == id)
            .ok_or(AppError::NotFound(id))
    }

    pub fn update(&mut self, id: TaskId, changes: &TaskUpdate) -> Result<Task, AppError> {
        let index = self.index_of(id)?;
        if changes.is_empty() {
            return Ok(self.tasks[index].clone());
        }

        let updated = self.commit(|store| {
            let task = &mut store.tasks[index];
            task.update(changes, OffsetDateTime::now_utc())?;
            Ok(task.clone())
        })?;
        info!(
            "event=task_update module=store status=ok id={} task_status={}",
            id,
            updated.status()
        );
        Ok(updated)
    }

    pub fn delete(&mut self, id: TaskId) -> Result<Task, AppError> {
        let index = self.index_of(id)?;
        let removed = self.commit(|store| Ok(store.tasks.remove(index)))?;
        info!("event=task_delete module=store status=ok id={id}");
        Ok(removed)
    }

    /// Removes every task. The id counter keeps running.
    pub fn clear(&mut self) -> Result<usize, AppError> {
        let removed = self.commit(|store| {
            let count = store.tasks.len();
            store.tasks.clear();
            Ok(count)
        })?;
        info!("event=store_clear module=store status=ok removed={removed}");
        Ok(removed)
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks whose name or description contains `text`, ignoring case.
    pub fn search(&self, text: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| {
                contains_ignore_case(task.name(), text)
                    || contains_ignore_case(task.description(), text)
            })
            .collect()
    }

    pub fn filter(&self, criteria: &TaskFilter) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| criteria.matches(task))
            .collect()
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.filter(&TaskFilter {
            status: Some(status),
            ..TaskFilter::default()
        })
    }

    /// Open tasks whose due date is before today's local date.
    pub fn overdue(&self) -> Vec<&Task> {
        self.overdue_on(local_today())
    }

    pub fn overdue_on(&self, today: Date) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.is_overdue(today))
            .collect()
    }

    pub fn statistics(&self) -> TaskStatistics {
        self.statistics_on(local_today())
    }

    pub fn statistics_on(&self, today: Date) -> TaskStatistics {
        let count = |status: TaskStatus| {
            self.tasks
                .iter()
                .filter(|task| task.status() == status)
                .count()
        };
        let total = self.tasks.len();
        let completed = count(TaskStatus::Completed);
        let completion_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64
        };

        TaskStatistics {
            total,
            pending: count(TaskStatus::Pending),
            in_progress: count(TaskStatus::InProgress),
            completed,
            overdue: self.overdue_on(today).len(),
            completion_rate,
        }
    }

    pub fn save(&self) -> Result<(), AppError> {
        json_store::save_state(&self.path, &self.snapshot())
    }

    /// Replaces the in-memory state with the file contents. On error the
    /// current state is kept.
    pub fn load(&mut self) -> Result<(), AppError> {
        let state = json_store::load_state(&self.path)?;
        self.restore(state);
        Ok(())
    }

    pub fn export(&self, path: &Path) -> Result<(), AppError> {
        json_store::save_state(path, &self.snapshot())?;
        info!(
            "event=store_export module=store status=ok path={} tasks={}",
            path.display(),
            self.tasks.len()
        );
        Ok(())
    }

    /// Replaces the whole collection with the state stored at `path` and
    /// persists it. Nothing changes unless the file decodes cleanly.
    pub fn import(&mut self, path: &Path) -> Result<usize, AppError> {
        if !path.is_file() {
            return Err(AppError::persistence(format!(
                "{}: no such file",
                path.display()
            )));
        }
        let imported = json_store::load_state(path)?;

        let count = self.commit(|store| {
            // Keep the counter monotonic across imports.
            let next_id = imported.next_id.max(store.next_id);
            let count = imported.tasks.len();
            store.tasks = imported.tasks;
            store.next_id = next_id;
            Ok(count)
        })?;
        info!(
            "event=store_import module=store status=ok path={} tasks={count}",
            path.display()
        );
        Ok(count)
    }

    fn index_of(&self, id: TaskId) -> Result<usize, AppError> {
        self.tasks
            .iter()
            .position(|task| task.id() == id)
            .ok_or(AppError::NotFound(id))
    }

    fn snapshot(&self) -> TaskState {
        TaskState {
            tasks: self.tasks.clone(),
            next_id: self.next_id,
        }
    }

    fn restore(&mut self, state: TaskState) {
        self.tasks = state.tasks;
        self.next_id = state.next_id;
    }

    /// Runs `mutate`, then saves. Any failure restores the prior state.
    fn commit<T>(
        &mut self,
        mutate: impl FnOnce(&mut Self) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let before = self.snapshot();

        let value = match mutate(self) {
            Ok(value) => value,
            Err(err) => {
                self.restore(before);
                return Err(err);
            }
        };

        if let Err(err) = self.save() {
            warn!(
                "event=store_rollback module=store status=error path={} code={}",
                self.path.display(),
                err.code()
            );
            self.restore(before);
            return Err(err);
        }

        Ok(value)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Today in the local time zone, falling back to UTC when the offset is unknown.
pub fn local_today() -> Date {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetDateTime::now_utc().to_offset(offset).date()
}

#[cfg(test)]
mod tests {
    use super::{TaskFilter, TaskStore};
    use crate::model::{NewTask, TaskStatus, TaskUpdate};
    use crate::storage::json_store;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use time::macros::date;

    fn temp_store() -> (TempDir, PathBuf, TaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let store = TaskStore::open(&path).unwrap();
        (dir, path, store)
    }

    fn ids(tasks: &[&crate::model::Task]) -> Vec<u64> {
        tasks.iter().map(|task| task.id()).collect()
    }

    #[test]
    fn create_then_get_returns_requested_fields() {
        let (_dir, _path, mut store) = temp_store();

        let created = store
            .create(
                NewTask::named("write report")
                    .description("quarterly")
                    .due(date!(2026 - 10 - 20))
                    .status(TaskStatus::InProgress),
            )
            .unwrap();
        let fetched = store.get(created.id()).unwrap();

        assert_eq!(fetched, &created);
        assert_eq!(fetched.id(), 1);
        assert_eq!(fetched.name(), "write report");
        assert_eq!(fetched.description(), "quarterly");
        assert_eq!(fetched.due_date(), Some(date!(2026 - 10 - 20)));
        assert_eq!(fetched.status(), TaskStatus::InProgress);
    }

    #[test]
    fn create_persists_immediately() {
        let (_dir, path, mut store) = temp_store();
        store.create(NewTask::named("persisted")).unwrap();

        let reopened = TaskStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.next_id(), 2);
    }

    #[test]
    fn create_rejects_blank_name_without_consuming_id() {
        let (_dir, path, mut store) = temp_store();

        let err = store.create(NewTask::named("  ")).unwrap_err();

        assert_eq!(err.code(), "validation_error");
        assert!(store.is_empty());
        assert_eq!(store.next_id(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn ids_increase_and_are_never_reused() {
        let (_dir, path, mut store) = temp_store();
        let first = store.create(NewTask::named("one")).unwrap();
        let second = store.create(NewTask::named("two")).unwrap();
        assert!(second.id() > first.id());

        store.delete(second.id()).unwrap();
        let third = store.create(NewTask::named("three")).unwrap();
        assert_eq!(third.id(), 3);

        let mut reopened = TaskStore::open(&path).unwrap();
        reopened.delete(third.id()).unwrap();
        let fourth = reopened.create(NewTask::named("four")).unwrap();
        assert_eq!(fourth.id(), 4);
    }

    #[test]
    fn get_missing_id_is_not_found() {
        let (_dir, _path, store) = temp_store();
        assert_eq!(store.get(42).unwrap_err().code(), "not_found");
    }

    #[test]
    fn update_applies_changes_and_persists() {
        let (_dir, path, mut store) = temp_store();
        let task = store.create(NewTask::named("draft")).unwrap();

        let changes = TaskUpdate {
            name: Some("final".to_string()),
            status: Some(TaskStatus::Completed),
            ..TaskUpdate::default()
        };
        let updated = store.update(task.id(), &changes).unwrap();

        assert_eq!(updated.name(), "final");
        assert_eq!(updated.status(), TaskStatus::Completed);
        assert_eq!(updated.created_at(), task.created_at());
        assert!(updated.completed_at().is_some());

        let reopened = TaskStore::open(&path).unwrap();
        assert_eq!(reopened.get(task.id()).unwrap(), &updated);
    }

    #[test]
    fn update_with_invalid_status_leaves_task_unchanged() {
        let (_dir, path, mut store) = temp_store();
        let task = store.create(NewTask::named("draft")).unwrap();

        let err = TaskUpdate::from_fields([("name", "renamed"), ("status", "done")])
            .and_then(|changes| store.update(task.id(), &changes))
            .unwrap_err();

        assert_eq!(err.code(), "validation_error");
        assert_eq!(store.get(task.id()).unwrap(), &task);
        assert_eq!(TaskStore::open(&path).unwrap().get(task.id()).unwrap(), &task);
    }

    #[test]
    fn update_with_invalid_name_leaves_store_unchanged() {
        let (_dir, _path, mut store) = temp_store();
        let task = store.create(NewTask::named("draft")).unwrap();
        let changes = TaskUpdate {
            name: Some(String::new()),
            ..TaskUpdate::default()
        };

        let err = store.update(task.id(), &changes).unwrap_err();

        assert_eq!(err.code(), "validation_error");
        assert_eq!(store.get(task.id()).unwrap(), &task);
    }

    #[test]
    fn update_missing_id_is_not_found() {
        let (_dir, _path, mut store) = temp_store();
        let err = store
            .update(9, &TaskUpdate::status(TaskStatus::Completed))
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn delete_missing_id_leaves_state_unchanged() {
        let (_dir, _path, mut store) = temp_store();
        store.create(NewTask::named("keep")).unwrap();

        let err = store.delete(99).unwrap_err();

        assert_eq!(err.code(), "not_found");
        assert_eq!(store.len(), 1);
        assert_eq!(store.next_id(), 2);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let (_dir, _path, mut store) = temp_store();
        for name in ["b", "a", "c"] {
            store.create(NewTask::named(name)).unwrap();
        }

        let names: Vec<&str> = store.list().iter().map(|task| task.name()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn search_matches_name_or_description_ignoring_case() {
        let (_dir, _path, mut store) = temp_store();
        store.create(NewTask::named("Buy MILK")).unwrap();
        store
            .create(NewTask::named("errands").description("milk and bread"))
            .unwrap();
        store.create(NewTask::named("call bank")).unwrap();

        assert_eq!(ids(&store.search("milk")), vec![1, 2]);
        assert!(store.search("tea").is_empty());
    }

    #[test]
    fn filter_by_status_preserves_order() {
        let (_dir, _path, mut store) = temp_store();
        store
            .create(NewTask::named("a").status(TaskStatus::Completed))
            .unwrap();
        store.create(NewTask::named("b")).unwrap();
        store
            .create(NewTask::named("c").status(TaskStatus::Completed))
            .unwrap();

        let criteria = TaskFilter {
            status: Some(TaskStatus::Completed),
            ..TaskFilter::default()
        };
        assert_eq!(ids(&store.filter(&criteria)), vec![1, 3]);
        assert_eq!(ids(&store.tasks_with_status(TaskStatus::Pending)), vec![2]);
    }

    #[test]
    fn filter_combines_date_range_and_name() {
        let (_dir, _path, mut store) = temp_store();
        store
            .create(NewTask::named("report draft").due(date!(2026 - 10 - 10)))
            .unwrap();
        store
            .create(NewTask::named("report final").due(date!(2026 - 10 - 20)))
            .unwrap();
        store
            .create(NewTask::named("report review").due(date!(2026 - 10 - 31)))
            .unwrap();
        store.create(NewTask::named("report undated")).unwrap();
        store
            .create(NewTask::named("groceries").due(date!(2026 - 10 - 20)))
            .unwrap();

        let criteria = TaskFilter {
            date_from: Some(date!(2026 - 10 - 10)),
            date_to: Some(date!(2026 - 10 - 20)),
            name_contains: Some("REPORT".to_string()),
            ..TaskFilter::default()
        };
        assert_eq!(ids(&store.filter(&criteria)), vec![1, 2]);
        assert_eq!(store.filter(&TaskFilter::default()).len(), 5);
    }

    #[test]
    fn overdue_ignores_completed_and_future_tasks() {
        let (_dir, _path, mut store) = temp_store();
        let today = date!(2026 - 10 - 18);
        store
            .create(NewTask::named("future").due(date!(2026 - 10 - 19)))
            .unwrap();
        store
            .create(NewTask::named("today").due(date!(2026 - 10 - 18)))
            .unwrap();
        store
            .create(
                NewTask::named("late but done")
                    .due(date!(2026 - 10 - 01))
                    .status(TaskStatus::Completed),
            )
            .unwrap();
        store.create(NewTask::named("no date")).unwrap();
        assert!(store.overdue_on(today).is_empty());

        store
            .create(NewTask::named("late").due(date!(2026 - 10 - 17)))
            .unwrap();
        assert_eq!(ids(&store.overdue_on(today)), vec![5]);
    }

    #[test]
    fn statistics_counts_each_status() {
        let (_dir, _path, mut store) = temp_store();
        store.create(NewTask::named("p")).unwrap();
        store
            .create(NewTask::named("i").status(TaskStatus::InProgress))
            .unwrap();
        store
            .create(NewTask::named("c").status(TaskStatus::Completed))
            .unwrap();

        let stats = store.statistics_on(date!(2026 - 10 - 18));

        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.overdue, 0);
        assert!((stats.completion_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn statistics_on_empty_store_has_zero_rate() {
        let (_dir, _path, store) = temp_store();
        let stats = store.statistics();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completion_rate, 0.0);
    }

    #[test]
    fn save_then_load_round_trips_empty_store() {
        let (_dir, path, store) = temp_store();
        store.save().unwrap();

        let reopened = TaskStore::open(&path).unwrap();
        assert!(reopened.is_empty());
        assert_eq!(reopened.next_id(), store.next_id());
    }

    #[test]
    fn save_then_load_round_trips_populated_store() {
        let (_dir, path, mut store) = temp_store();
        store
            .create(NewTask::named("one").due(date!(2026 - 10 - 20)))
            .unwrap();
        store
            .create(NewTask::named("two").status(TaskStatus::Completed))
            .unwrap();
        store.create(NewTask::named("three")).unwrap();
        store.delete(3).unwrap();

        let reopened = TaskStore::open(&path).unwrap();
        assert_eq!(reopened.list(), store.list());
        assert_eq!(reopened.next_id(), 4);
    }

    #[test]
    fn load_keeps_state_when_file_is_malformed() {
        let (_dir, path, mut store) = temp_store();
        store.create(NewTask::named("keep")).unwrap();
        fs::write(&path, "{ broken").unwrap();

        let err = store.load().unwrap_err();

        assert_eq!(err.code(), "persistence_error");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_save_rolls_back_mutation() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path makes the final rename fail.
        let path = dir.path().join("tasks.json");
        fs::create_dir(&path).unwrap();
        let mut store = TaskStore::new(&path);

        let err = store.create(NewTask::named("lost")).unwrap_err();

        assert_eq!(err.code(), "persistence_error");
        assert!(store.is_empty());
        assert_eq!(store.next_id(), 1);
    }

    #[test]
    fn create_fails_cleanly_when_id_space_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let content = r#"{ "next_id": 18446744073709551615, "tasks": [] }"#;
        fs::write(&path, content).unwrap();
        let mut store = TaskStore::open(&path).unwrap();

        let err = store.create(NewTask::named("one too many")).unwrap_err();

        assert_eq!(err.code(), "persistence_error");
        assert!(store.is_empty());
        assert_eq!(store.next_id(), u64::MAX);
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn clear_keeps_id_counter() {
        let (_dir, path, mut store) = temp_store();
        store.create(NewTask::named("one")).unwrap();
        store.create(NewTask::named("two")).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.is_empty());

        let next = store.create(NewTask::named("three")).unwrap();
        assert_eq!(next.id(), 3);
        assert_eq!(TaskStore::open(&path).unwrap().len(), 1);
    }

    #[test]
    fn export_then_import_replaces_collection() {
        let (dir, _path, mut source) = temp_store();
        source.create(NewTask::named("exported")).unwrap();
        source
            .create(NewTask::named("also exported").status(TaskStatus::InProgress))
            .unwrap();
        let export_path = dir.path().join("backup").join("export.json");
        source.export(&export_path).unwrap();

        let target_path = dir.path().join("other.json");
        let mut target = TaskStore::open(&target_path).unwrap();
        target.create(NewTask::named("replaced")).unwrap();

        assert_eq!(target.import(&export_path).unwrap(), 2);
        assert_eq!(target.list(), source.list());
        assert_eq!(target.next_id(), 3);
        assert_eq!(TaskStore::open(&target_path).unwrap().list(), source.list());
    }

    #[test]
    fn import_malformed_file_keeps_existing_tasks() {
        let (dir, path, mut store) = temp_store();
        store.create(NewTask::named("keep me")).unwrap();
        let before = store.list().to_vec();

        let bad_path = dir.path().join("bad.json");
        fs::write(
            &bad_path,
            r#"{ "next_id": 2, "tasks": [ { "id": 1, "name": "", "status": "pending", "created_at": "2026-10-18T09:00:00Z" } ] }"#,
        )
        .unwrap();

        let err = store.import(&bad_path).unwrap_err();

        assert_eq!(err.code(), "persistence_error");
        assert_eq!(store.list(), before.as_slice());
        assert_eq!(json_store::load_state(&path).unwrap().tasks, before);
    }

    #[test]
    fn import_missing_file_is_an_error() {
        let (dir, _path, mut store) = temp_store();
        let err = store.import(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "persistence_error");
    }

    #[test]
    fn import_keeps_id_counter_monotonic() {
        let (dir, _path, mut store) = temp_store();
        for name in ["a", "b", "c"] {
            store.create(NewTask::named(name)).unwrap();
        }

        let small = TaskStore::new(dir.path().join("small.json"));
        let small_path = dir.path().join("small-export.json");
        small.export(&small_path).unwrap();

        store.import(&small_path).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.next_id(), 4);
    }
}
