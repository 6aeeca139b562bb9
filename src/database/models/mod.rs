pub mod task;

pub use task::{Task, TaskField, TaskView, UpdatedAttributes, DEFAULT_STATUS, LEGACY_OWNER};
