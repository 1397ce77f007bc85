pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod store;

pub use error::AppError;
pub use model::{NewTask, Task, TaskId, TaskStatus, TaskUpdate};
pub use store::{TaskFilter, TaskStatistics, TaskStore};
