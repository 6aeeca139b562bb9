use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::auth::{bearer_token, AuthUser, TokenVerifier};
use crate::database::models::{Task, TaskView, UpdatedAttributes, LEGACY_OWNER};
use crate::database::{RepositoryError, TaskRepository};

/// How Update and Delete report a task that belongs to someone else.
/// Get always reports it as not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipPolicy {
    /// Update and Delete answer 403, as existing clients expect.
    #[default]
    Observed,
    /// Every operation answers 404, so non-owners learn nothing.
    ConcealExistence,
}

/// Request body for create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoInput {
    pub task: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("task belongs to another user")]
    Forbidden,

    #[error("task {0} not found")]
    NotFound(String),

    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: RepositoryError,
    },
}

impl ServiceError {
    fn store(context: &'static str) -> impl FnOnce(RepositoryError) -> ServiceError {
        move |source| ServiceError::Store { context, source }
    }
}

/// Per-request orchestration: caller identity, ownership, and the mapping of
/// repository outcomes to service outcomes.
pub struct TodoService {
    verifier: Arc<dyn TokenVerifier>,
    repository: TaskRepository,
    ownership: OwnershipPolicy,
}

impl TodoService {
    pub fn new(verifier: Arc<dyn TokenVerifier>, repository: TaskRepository) -> Self {
        Self {
            verifier,
            repository,
            ownership: OwnershipPolicy::default(),
        }
    }

    pub fn with_ownership_policy(mut self, ownership: OwnershipPolicy) -> Self {
        self.ownership = ownership;
        self
    }

    /// Resolves the caller from an `Authorization` header value. A missing
    /// header, a non-bearer scheme and a bad token are indistinguishable.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<AuthUser, ServiceError> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or(ServiceError::Unauthenticated)?;
        let user = self
            .verifier
            .verify(token)
            .map_err(|_| ServiceError::Unauthenticated)?;
        require_subject(&user)?;
        Ok(user)
    }

    #[instrument(skip(self, user), fields(subject = %user.subject))]
    pub async fn list(
        &self,
        user: &AuthUser,
        status: Option<&str>,
    ) -> Result<Vec<TaskView>, ServiceError> {
        let subject = require_subject(user)?;
        let tasks = self
            .repository
            .list_by_owner(subject, status)
            .await
            .map_err(ServiceError::store("Failed to list tasks"))?;
        Ok(tasks.into_iter().map(TaskView::from).collect())
    }

    #[instrument(skip(self, user, input), fields(subject = %user.subject))]
    pub async fn create(&self, user: &AuthUser, input: TodoInput) -> Result<TaskView, ServiceError> {
        let subject = require_subject(user)?;
        let task = require_task(input.task.as_deref())?;

        let created = self
            .repository
            .create(subject, task, input.status.as_deref())
            .await
            .map_err(ServiceError::store("Failed to create task"))?;
        info!(id = %created.id, "Task created");
        Ok(created.into())
    }

    #[instrument(skip(self, user), fields(subject = %user.subject))]
    pub async fn get(&self, user: &AuthUser, id: &str) -> Result<TaskView, ServiceError> {
        let subject = require_subject(user)?;
        let id = require_id(id)?;

        match self
            .repository
            .get(id)
            .await
            .map_err(ServiceError::store("Failed to fetch task"))?
        {
            Some(task) if task.is_owned_by(subject) => Ok(task.into()),
            Some(_) => {
                warn!(id, "Read of a task owned by another user");
                Err(ServiceError::NotFound(id.to_string()))
            }
            None => Err(ServiceError::NotFound(id.to_string())),
        }
    }

    #[instrument(skip(self, user, input), fields(subject = %user.subject))]
    pub async fn update(
        &self,
        user: &AuthUser,
        id: &str,
        input: TodoInput,
    ) -> Result<UpdatedAttributes, ServiceError> {
        let subject = require_subject(user)?;
        let id = require_id(id)?;
        let task = require_task(input.task.as_deref())?;

        match self.owned_task(subject, id).await? {
            Some(_) => {}
            None => return Err(ServiceError::NotFound(id.to_string())),
        }

        match self
            .repository
            .patch(id, task, input.status.as_deref())
            .await
        {
            Ok(updated) => Ok(updated),
            // Deleted between the ownership check and the write.
            Err(RepositoryError::NotFound(_)) => Err(ServiceError::NotFound(id.to_string())),
            Err(e) => Err(ServiceError::store("Failed to update task")(e)),
        }
    }

    /// Deleting an id that does not exist succeeds without a write.
    #[instrument(skip(self, user), fields(subject = %user.subject))]
    pub async fn delete(&self, user: &AuthUser, id: &str) -> Result<(), ServiceError> {
        let subject = require_subject(user)?;
        let id = require_id(id)?;

        if self.owned_task(subject, id).await?.is_none() {
            return Ok(());
        }

        self.repository
            .delete(id)
            .await
            .map_err(ServiceError::store("Failed to delete task"))?;
        info!(id, "Task deleted");
        Ok(())
    }

    /// Ownership check ahead of a mutation. `Ok(None)` means the task is
    /// absent; a foreign task is rejected according to the ownership policy.
    async fn owned_task(&self, subject: &str, id: &str) -> Result<Option<Task>, ServiceError> {
        let task = self
            .repository
            .get(id)
            .await
            .map_err(ServiceError::store("Failed to verify task ownership"))?;

        match task {
            Some(task) if task.is_owned_by(subject) => Ok(Some(task)),
            Some(_) => {
                warn!(id, "Mutation of a task owned by another user");
                Err(match self.ownership {
                    OwnershipPolicy::Observed => ServiceError::Forbidden,
                    OwnershipPolicy::ConcealExistence => ServiceError::NotFound(id.to_string()),
                })
            }
            None => Ok(None),
        }
    }
}

fn require_subject(user: &AuthUser) -> Result<&str, ServiceError> {
    if user.subject.is_empty() {
        error!("Authenticated request without a subject");
        return Err(ServiceError::Unauthenticated);
    }
    // Reserved for records that predate ownership.
    if user.subject == LEGACY_OWNER {
        warn!("Rejected token whose subject is the legacy owner sentinel");
        return Err(ServiceError::Unauthenticated);
    }
    Ok(&user.subject)
}

fn require_id(id: &str) -> Result<&str, ServiceError> {
    if id.trim().is_empty() {
        return Err(ServiceError::Validation("Task id is required".to_string()));
    }
    Ok(id)
}

fn require_task(task: Option<&str>) -> Result<&str, ServiceError> {
    match task {
        Some(task) if !task.trim().is_empty() => Ok(task),
        _ => Err(ServiceError::Validation(
            "Field 'task' is required and must not be empty".to_string(),
        )),
    }
}
