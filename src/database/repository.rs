use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::database::models::{Task, TaskField, UpdatedAttributes, DEFAULT_STATUS};
use crate::database::store::{
    Condition, Filter, IndexQuery, Item, KeyValueStore, PutRequest, ScanRequest, StoreError,
    UpdateRequest,
};
use crate::database::{ATTR_ID, ATTR_OWNER, ATTR_STATUS, ATTR_TASK};

/// Attempts at finding an unused id before a create gives up.
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How new task ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// RFC 3339 UTC timestamp with nanoseconds; sorts in creation order.
    #[default]
    Timestamp,
    Uuid,
}

impl IdStrategy {
    pub fn generate(self) -> String {
        match self {
            IdStrategy::Timestamp => Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            IdStrategy::Uuid => Uuid::new_v4().to_string(),
        }
    }
}

/// Result of a backfill write against one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Applied,
    /// The field was already set (or the record is gone); nothing was written.
    AlreadyPresent,
}

/// A stored record that could not be read as a task. `id` is empty when the
/// record has no id attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRecord {
    pub id: String,
    pub error: String,
}

/// Result of a full-table scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableScan {
    pub tasks: Vec<Task>,
    pub unreadable: Vec<UnreadableRecord>,
}

impl TableScan {
    /// Records seen, readable or not.
    pub fn len(&self) -> usize {
        self.tasks.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed task operations over a [`KeyValueStore`].
///
/// This is the only place that knows the stored attribute names, which index
/// serves owner lookups, and how partial updates and their conditions are
/// expressed.
#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn KeyValueStore>,
    owner_index: String,
    ids: IdStrategy,
    page_size: Option<u32>,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, owner_index: impl Into<String>) -> Self {
        Self {
            store,
            owner_index: owner_index.into(),
            ids: IdStrategy::default(),
            page_size: None,
        }
    }

    pub fn with_id_strategy(mut self, ids: IdStrategy) -> Self {
        self.ids = ids;
        self
    }

    /// Page size requested from the store on scans and owner queries.
    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    /// Persists a new task under a fresh id with a single conditional put.
    #[instrument(skip(self, task), fields(owner = %owner_id))]
    pub async fn create(
        &self,
        owner_id: &str,
        task: &str,
        status: Option<&str>,
    ) -> Result<Task, RepositoryError> {
        let status = status
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STATUS)
            .to_string();

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let record = Task {
                id: self.ids.generate(),
                owner_id: Some(owner_id.to_string()),
                task: task.to_string(),
                status: Some(status.clone()),
            };
            let request = PutRequest {
                item: task_to_item(&record),
                conditions: vec![Condition::not_exists(ATTR_ID)],
            };

            match self.store.put_item(request).await {
                Ok(()) => {
                    debug!(id = %record.id, "Task created");
                    return Ok(record);
                }
                Err(StoreError::ConditionFailed) => {
                    warn!(id = %record.id, attempt, "Generated task id already in use, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::backend("put_item", "could not allocate a unique task id").into())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Task>, RepositoryError> {
        match self.store.get_item(id).await? {
            Some(item) => Ok(Some(item_to_task(item)?)),
            None => Ok(None),
        }
    }

    /// All tasks of one owner via the owner index, optionally narrowed to a
    /// status by a filter applied after the index lookup.
    #[instrument(skip(self))]
    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<Task>, RepositoryError> {
        let filter = status.filter(|s| !s.is_empty()).map(|s| Filter {
            attribute: ATTR_STATUS.to_string(),
            value: s.to_string(),
        });

        let mut tasks = Vec::new();
        let mut start = None;
        loop {
            let page = self
                .store
                .query_index(IndexQuery {
                    index: self.owner_index.clone(),
                    key_attribute: ATTR_OWNER.to_string(),
                    key_value: owner_id.to_string(),
                    filter: filter.clone(),
                    start,
                    limit: self.page_size,
                })
                .await?;
            tasks.extend(parse_items(page.items));
            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        Ok(tasks)
    }

    /// Partial update: `task` is always written, `status` only when given
    /// and non-empty. Never creates a record.
    #[instrument(skip(self, task))]
    pub async fn patch(
        &self,
        id: &str,
        task: &str,
        status: Option<&str>,
    ) -> Result<UpdatedAttributes, RepositoryError> {
        let mut set = vec![(ATTR_TASK.to_string(), task.to_string())];
        if let Some(status) = status.filter(|s| !s.is_empty()) {
            set.push((ATTR_STATUS.to_string(), status.to_string()));
        }

        let request = UpdateRequest {
            key: id.to_string(),
            set,
            conditions: vec![Condition::exists(ATTR_ID)],
        };

        match self.store.update_item(request).await {
            Ok(mut written) => Ok(UpdatedAttributes {
                task: written
                    .remove(ATTR_TASK)
                    .unwrap_or_else(|| task.to_string()),
                status: written.remove(ATTR_STATUS),
            }),
            Err(StoreError::ConditionFailed) => Err(RepositoryError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Unconditional delete; an absent id is not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.store.delete_item(id).await?;
        Ok(())
    }

    /// Every record in the table, following page cursors to the end.
    /// Records that cannot be read as tasks are reported, not dropped.
    #[instrument(skip(self))]
    pub async fn scan_all(&self) -> Result<TableScan, RepositoryError> {
        let mut scan = TableScan::default();
        let mut start = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .store
                .scan(ScanRequest {
                    start,
                    limit: self.page_size,
                })
                .await?;
            pages += 1;
            for item in page.items {
                let id = item.get(ATTR_ID).cloned().unwrap_or_default();
                match item_to_task(item) {
                    Ok(task) => scan.tasks.push(task),
                    Err(e) => {
                        warn!(id = %id, error = %e, "Unreadable task record");
                        scan.unreadable.push(UnreadableRecord {
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }
        debug!(
            pages,
            count = scan.tasks.len(),
            unreadable = scan.unreadable.len(),
            "Scan complete"
        );
        Ok(scan)
    }

    /// Sets `field` to `value` only if the record exists and lacks the field.
    #[instrument(skip(self))]
    pub async fn fill_missing(
        &self,
        id: &str,
        field: TaskField,
        value: &str,
    ) -> Result<FillOutcome, RepositoryError> {
        let request = UpdateRequest {
            key: id.to_string(),
            set: vec![(field.attribute().to_string(), value.to_string())],
            conditions: vec![
                Condition::exists(ATTR_ID),
                Condition::not_exists(field.attribute()),
            ],
        };

        match self.store.update_item(request).await {
            Ok(_) => Ok(FillOutcome::Applied),
            Err(StoreError::ConditionFailed) => Ok(FillOutcome::AlreadyPresent),
            Err(e) => Err(e.into()),
        }
    }
}

fn task_to_item(task: &Task) -> Item {
    let mut item = Item::new();
    item.insert(ATTR_ID.to_string(), task.id.clone());
    item.insert(ATTR_TASK.to_string(), task.task.clone());
    if let Some(owner) = &task.owner_id {
        item.insert(ATTR_OWNER.to_string(), owner.clone());
    }
    if let Some(status) = &task.status {
        item.insert(ATTR_STATUS.to_string(), status.clone());
    }
    item
}

fn item_to_task(mut item: Item) -> Result<Task, StoreError> {
    let id = item
        .remove(ATTR_ID)
        .ok_or_else(|| StoreError::Malformed("missing id attribute".into()))?;
    let task = item
        .remove(ATTR_TASK)
        .ok_or_else(|| StoreError::Malformed(format!("task {} has no task attribute", id)))?;

    Ok(Task {
        id,
        owner_id: item.remove(ATTR_OWNER),
        task,
        status: item.remove(ATTR_STATUS),
    })
}

/// Converts a page of items, skipping ones that cannot be read as tasks.
fn parse_items(items: Vec<Item>) -> Vec<Task> {
    items
        .into_iter()
        .filter_map(|item| match item_to_task(item) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(error = %e, "Failed to parse task item, skipping");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;

    fn repository(store: Arc<MemoryStore>) -> TaskRepository {
        TaskRepository::new(store, "UserIdIndex")
    }

    fn item(pairs: &[(&str, &str)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn create_defaults_status_and_records_owner() {
        let store = Arc::new(MemoryStore::new());
        let repo = repository(store.clone());

        let task = repo.create("u1", "buy milk", None).await.unwrap();
        assert_eq!(task.status.as_deref(), Some("NEW"));
        assert_eq!(task.owner_id.as_deref(), Some("u1"));

        let stored = store.get_item(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.get("userId").map(String::as_str), Some("u1"));
        assert_eq!(stored.get("status").map(String::as_str), Some("NEW"));
    }

    #[tokio::test]
    async fn empty_status_on_create_falls_back_to_default() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let task = repo.create("u1", "x", Some("")).await.unwrap();
        assert_eq!(task.status.as_deref(), Some("NEW"));
    }

    #[tokio::test]
    async fn rapid_creates_get_distinct_ids() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let mut ids = std::collections::HashSet::new();
        for n in 0..50 {
            let task = repo.create("u1", &format!("task {}", n), None).await.unwrap();
            assert!(ids.insert(task.id), "duplicate id generated");
        }
    }

    #[tokio::test]
    async fn timestamp_ids_sort_in_creation_order() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let first = repo.create("u1", "a", None).await.unwrap();
        let second = repo.create("u1", "b", None).await.unwrap();
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn uuid_strategy_generates_uuids() {
        let repo = repository(Arc::new(MemoryStore::new())).with_id_strategy(IdStrategy::Uuid);
        let task = repo.create("u1", "a", None).await.unwrap();
        assert!(Uuid::parse_str(&task.id).is_ok());
    }

    #[tokio::test]
    async fn get_distinguishes_absent_from_present() {
        let repo = repository(Arc::new(MemoryStore::new()));
        assert!(repo.get("nope").await.unwrap().is_none());

        let created = repo.create("u1", "a", Some("DONE")).await.unwrap();
        assert_eq!(repo.get(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn list_by_owner_is_scoped_and_filterable() {
        let store = Arc::new(MemoryStore::with_page_size(1));
        let repo = repository(store.clone());
        repo.create("u1", "a", None).await.unwrap();
        repo.create("u1", "b", Some("DONE")).await.unwrap();
        repo.create("u2", "c", None).await.unwrap();
        store
            .insert_raw(item(&[("id", "legacy"), ("task", "old")]))
            .await
            .unwrap();

        let all = repo.list_by_owner("u1", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|t| t.is_owned_by("u1")));

        let done = repo.list_by_owner("u1", Some("DONE")).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].task, "b");

        let unfiltered = repo.list_by_owner("u1", Some("")).await.unwrap();
        assert_eq!(unfiltered.len(), 2);
    }

    #[tokio::test]
    async fn patch_without_status_keeps_existing_status() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let created = repo.create("u1", "a", Some("DOING")).await.unwrap();

        let updated = repo.patch(&created.id, "a2", None).await.unwrap();
        assert_eq!(updated, UpdatedAttributes { task: "a2".into(), status: None });

        let stored = repo.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.task, "a2");
        assert_eq!(stored.status.as_deref(), Some("DOING"));
        assert_eq!(stored.owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn patch_with_status_overwrites_it() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let created = repo.create("u1", "a", None).await.unwrap();

        let updated = repo.patch(&created.id, "a", Some("DONE")).await.unwrap();
        assert_eq!(updated.status.as_deref(), Some("DONE"));
    }

    #[tokio::test]
    async fn patch_of_missing_record_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let repo = repository(store.clone());
        let err = repo.patch("ghost", "x", None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(id) if id == "ghost"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let repo = repository(Arc::new(MemoryStore::new()));
        let created = repo.create("u1", "a", None).await.unwrap();
        repo.delete(&created.id).await.unwrap();
        repo.delete(&created.id).await.unwrap();
        assert!(repo.get(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_all_drains_every_page_and_reports_malformed_items() {
        let store = Arc::new(MemoryStore::with_page_size(2));
        let repo = repository(store.clone());
        for n in 0..5 {
            repo.create("u1", &format!("t{}", n), None).await.unwrap();
        }
        store.insert_raw(item(&[("id", "broken")])).await.unwrap();

        let scan = repo.scan_all().await.unwrap();
        assert_eq!(scan.tasks.len(), 5);
        assert_eq!(scan.len(), 6);
        assert_eq!(scan.unreadable.len(), 1);
        assert_eq!(scan.unreadable[0].id, "broken");
        assert!(scan.unreadable[0].error.contains("no task attribute"));
    }

    #[tokio::test]
    async fn fill_missing_never_overwrites() {
        let store = Arc::new(MemoryStore::new());
        let repo = repository(store.clone());
        store
            .insert_raw(item(&[("id", "legacy"), ("task", "old")]))
            .await
            .unwrap();
        let modern = repo.create("u1", "new", Some("DONE")).await.unwrap();

        assert_eq!(
            repo.fill_missing("legacy", TaskField::Status, "NEW").await.unwrap(),
            FillOutcome::Applied
        );
        assert_eq!(
            repo.fill_missing(&modern.id, TaskField::Status, "NEW").await.unwrap(),
            FillOutcome::AlreadyPresent
        );
        assert_eq!(
            repo.fill_missing("gone", TaskField::Status, "NEW").await.unwrap(),
            FillOutcome::AlreadyPresent
        );

        let modern = repo.get(&modern.id).await.unwrap().unwrap();
        assert_eq!(modern.status.as_deref(), Some("DONE"));
        assert!(repo.get("gone").await.unwrap().is_none());
    }
}
