pub mod backfill;
pub mod todo_service;

pub use backfill::{BackfillJob, BackfillSummary, FailedRecord, RecordOutcome};
pub use todo_service::{OwnershipPolicy, ServiceError, TodoInput, TodoService};
