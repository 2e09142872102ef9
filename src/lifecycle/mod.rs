//! Task lifecycle: the status graph and the service that drives it

pub mod manager;
pub mod task;

pub use manager::{TaskEvent, TaskLifecycle};
pub use task::{Task, TaskStatus, TaskType};
