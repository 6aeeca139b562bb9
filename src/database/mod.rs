pub mod dynamo;
pub mod expression;
pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod store;

/// Stored attribute names. `userId` predates the `ownerId` naming used in
/// the API and is kept so existing tables and their index keep working.
pub const ATTR_ID: &str = "id";
pub const ATTR_OWNER: &str = "userId";
pub const ATTR_TASK: &str = "task";
pub const ATTR_STATUS: &str = "status";

pub use manager::StoreManager;
pub use repository::{
    FillOutcome, IdStrategy, RepositoryError, TableScan, TaskRepository, UnreadableRecord,
};
pub use store::{KeyValueStore, StoreError};
