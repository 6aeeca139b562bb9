use serde::{Deserialize, Serialize};

/// Status written when a create request omits one, and by the status backfill.
pub const DEFAULT_STATUS: &str = "NEW";

/// Owner written by the owner backfill onto records that predate ownership.
/// Never matches a caller, and a token carrying it as subject is refused.
pub const LEGACY_OWNER: &str = "0";

/// A todo record as the rest of the crate sees it.
///
/// `owner_id` and `status` are optional because records written before those
/// fields existed are still in the table until a backfill fills them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Task {
    pub fn is_owned_by(&self, subject: &str) -> bool {
        subject != LEGACY_OWNER && self.owner_id.as_deref() == Some(subject)
    }
}

/// Response body for a task; ownership is implied by the authenticated request.
/// A record without a status omits the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            task: task.task,
            status: task.status,
        }
    }
}

/// Attributes written by a partial update, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedAttributes {
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Fields that were added to the model after records already existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskField {
    Owner,
    Status,
}

impl TaskField {
    /// Stored attribute name.
    pub fn attribute(self) -> &'static str {
        match self {
            TaskField::Owner => crate::database::ATTR_OWNER,
            TaskField::Status => crate::database::ATTR_STATUS,
        }
    }

    pub fn default_value(self) -> &'static str {
        match self {
            TaskField::Owner => LEGACY_OWNER,
            TaskField::Status => DEFAULT_STATUS,
        }
    }

    pub fn is_missing(self, task: &Task) -> bool {
        match self {
            TaskField::Owner => task.owner_id.is_none(),
            TaskField::Status => task.status.is_none(),
        }
    }
}

impl std::fmt::Display for TaskField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskField::Owner => write!(f, "owner"),
            TaskField::Status => write!(f, "status"),
        }
    }
}
