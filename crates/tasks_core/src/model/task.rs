use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

pub type TaskId = u64;

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    /// Exact match only; callers accepting loose input normalise it first.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(AppError::validation(format!(
                "invalid status '{other}' (expected pending, in_progress or completed)"
            ))),
        }
    }
}

/// Input for creating a task. The store assigns the id and timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub due_date: Option<Date>,
    pub status: Option<TaskStatus>,
}

impl NewTask {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn due(mut self, due_date: Date) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Partial update; `None` leaves the field untouched.
///
/// `due_date` is doubly optional so a caller can clear the date with
/// `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<Option<Date>>,
    pub status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
    }

    /// Builds an update from textual `field=value` pairs.
    ///
    /// An empty `due_date` value (or `none`) clears the date.
    pub fn from_fields<'a, I>(fields: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut update = Self::default();
        for (key, value) in fields {
            match key.trim() {
                "name" => update.name = Some(value.to_string()),
                "description" => update.description = Some(value.to_string()),
                "due_date" => {
                    let trimmed = value.trim();
                    update.due_date = if trimmed.is_empty() || trimmed == "none" {
                        Some(None)
                    } else {
                        Some(Some(parse_date(trimmed)?))
                    };
                }
                "status" => update.status = Some(value.parse::<TaskStatus>()?),
                other => return Err(AppError::validation(format!("unknown field '{other}'"))),
            }
        }
        Ok(update)
    }
}

/// Serialized form of a task: every value is a JSON primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<String>,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    name: String,
    description: String,
    due_date: Option<Date>,
    status: TaskStatus,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl Task {
    pub fn new(id: TaskId, draft: NewTask, now: OffsetDateTime) -> Result<Self, AppError> {
        let name = validate_name(&draft.name)?;
        let description = validate_description(&draft.description)?;
        let status = draft.status.unwrap_or_default();
        let completed_at = (status == TaskStatus::Completed).then_some(now);

        Ok(Self {
            id,
            name,
            description,
            due_date: draft.due_date,
            status,
            created_at: now,
            updated_at: now,
            completed_at,
        })
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

    pub fn due_date(&self) -> Option<Date> {
        self.due_date
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn updated_at(&self) -> OffsetDateTime {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<OffsetDateTime> {
        self.completed_at
    }

    pub fn is_overdue(&self, today: Date) -> bool {
        self.status != TaskStatus::Completed && self.due_date.is_some_and(|due| due < today)
    }

    /// Applies every field in `changes` or none of them.
    pub fn update(&mut self, changes: &TaskUpdate, now: OffsetDateTime) -> Result<(), AppError> {
        if changes.is_empty() {
            return Ok(());
        }

        let name = changes.name.as_deref().map(validate_name).transpose()?;
        let description = changes
            .description
            .as_deref()
            .map(validate_description)
            .transpose()?;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(due_date) = changes.due_date {
            self.due_date = due_date;
        }
        if let Some(status) = changes.status {
            self.set_status(status, now);
        }
        self.updated_at = now;

        Ok(())
    }

    fn set_status(&mut self, status: TaskStatus, now: OffsetDateTime) {
        match status {
            TaskStatus::Completed if self.status != TaskStatus::Completed => {
                self.completed_at = Some(now);
            }
            TaskStatus::Completed => {}
            _ => self.completed_at = None,
        }
        self.status = status;
    }

    pub fn to_record(&self) -> Result<TaskRecord, AppError> {
        Ok(TaskRecord {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            due_date: self.due_date.map(format_date).transpose()?,
            status: self.status.as_str().to_string(),
            created_at: format_timestamp(self.created_at)?,
            updated_at: Some(format_timestamp(self.updated_at)?),
            completed_at: self.completed_at.map(format_timestamp).transpose()?,
        })
    }

    pub fn from_record(record: TaskRecord) -> Result<Self, AppError> {
        let name = validate_name(&record.name)?;
        let description = validate_description(&record.description)?;
        let status = record.status.parse::<TaskStatus>()?;
        let due_date = record.due_date.as_deref().map(parse_date).transpose()?;
        let created_at = parse_timestamp("created_at", &record.created_at)?;
        let updated_at = match record.updated_at.as_deref() {
            Some(value) => parse_timestamp("updated_at", value)?,
            None => created_at,
        };
        let completed_at = record
            .completed_at
            .as_deref()
            .map(|value| parse_timestamp("completed_at", value))
            .transpose()?;

        Ok(Self {
            id: record.id,
            name,
            description,
            due_date,
            status,
            created_at,
            updated_at,
            completed_at,
        })
    }

    /// Decodes a task from an untyped JSON mapping.
    pub fn from_value(value: serde_json::Value) -> Result<Self, AppError> {
        let record: TaskRecord =
            serde_json::from_value(value).map_err(|err| AppError::validation(err.to_string()))?;
        Self::from_record(record)
    }
}

fn validate_name(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("name is required"));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::validation(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_description(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(AppError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Parses a calendar date in `YYYY-MM-DD` form.
pub fn parse_date(raw: &str) -> Result<Date, AppError> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::validation(format!("invalid date '{raw}' (expected YYYY-MM-DD)")))
}

pub fn format_date(date: Date) -> Result<String, AppError> {
    date.format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| AppError::validation(err.to_string()))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|_| AppError::validation(format!("{field} must be RFC3339")))
}

fn format_timestamp(value: OffsetDateTime) -> Result<String, AppError> {
    value
        .format(&Rfc3339)
        .map_err(|err| AppError::validation(err.to_string()))
}
