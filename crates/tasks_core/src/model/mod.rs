mod task;

pub use task::{
    MAX_DESCRIPTION_CHARS, MAX_NAME_CHARS, NewTask, Task, TaskId, TaskRecord, TaskStatus,
    TaskUpdate, format_date, parse_date,
};
