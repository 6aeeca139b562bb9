use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::database::models::{Task, TaskField};
use crate::database::{FillOutcome, RepositoryError, TaskRepository};

const DEFAULT_CONCURRENCY: usize = 8;

/// Fills one field on every record that lacks it. Records that already carry
/// the field are never written, so the job can be re-run at any time.
#[derive(Debug, Clone)]
pub struct BackfillJob {
    field: TaskField,
    value: String,
    dry_run: bool,
    concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Updated,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub field: String,
    pub value: String,
    pub dry_run: bool,
    pub scanned: usize,
    /// Records written (or, in a dry run, records that would be written).
    pub updated: usize,
    pub skipped: usize,
    pub failed: Vec<FailedRecord>,
}

impl BackfillSummary {
    fn record(&mut self, id: String, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed(error) => self.failed.push(FailedRecord { id, error }),
        }
    }
}

impl BackfillJob {
    pub fn new(field: TaskField) -> Self {
        Self {
            field,
            value: field.default_value().to_string(),
            dry_run: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets `status` to "NEW" where it is missing.
    pub fn status() -> Self {
        Self::new(TaskField::Status)
    }

    /// Sets the owner of pre-ownership records to the legacy sentinel.
    pub fn owner() -> Self {
        Self::new(TaskField::Owner)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Scans the whole table and patches records missing the field.
    ///
    /// A scan failure aborts the job. Unreadable records and failed writes
    /// are recorded in the summary and the run carries on.
    #[instrument(skip(self, repository), fields(field = %self.field, dry_run = self.dry_run))]
    pub async fn run(&self, repository: &TaskRepository) -> Result<BackfillSummary, RepositoryError> {
        let scan = repository.scan_all().await?;

        let mut summary = BackfillSummary {
            field: self.field.to_string(),
            value: self.value.clone(),
            dry_run: self.dry_run,
            scanned: scan.len(),
            ..BackfillSummary::default()
        };

        for record in scan.unreadable {
            summary.record(record.id, RecordOutcome::Failed(record.error));
        }

        let outcomes: Vec<(String, RecordOutcome)> = stream::iter(scan.tasks)
            .map(|task| async move {
                let outcome = self.process(repository, &task).await;
                (task.id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, outcome) in outcomes {
            summary.record(id, outcome);
        }

        info!(
            scanned = summary.scanned,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "Backfill finished"
        );
        Ok(summary)
    }

    async fn process(&self, repository: &TaskRepository, task: &Task) -> RecordOutcome {
        if !self.field.is_missing(task) {
            return RecordOutcome::Skipped;
        }
        if self.dry_run {
            return RecordOutcome::Updated;
        }

        match repository.fill_missing(&task.id, self.field, &self.value).await {
            Ok(FillOutcome::Applied) => RecordOutcome::Updated,
            Ok(FillOutcome::AlreadyPresent) => RecordOutcome::Skipped,
            Err(e) => {
                error!(id = %task.id, "Failed to backfill {}: {}", self.field, e);
                RecordOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::database::memory::MemoryStore;
    use crate::database::store::{
        IndexQuery, Item, KeyValueStore, Page, PutRequest, ScanRequest, StoreError, UpdateRequest,
    };
    use crate::database::{ATTR_ID, ATTR_OWNER, ATTR_STATUS, ATTR_TASK};

    /// Counts update writes and optionally fails them for chosen ids.
    struct InstrumentedStore {
        inner: MemoryStore,
        updates: AtomicUsize,
        fail_ids: Vec<String>,
        fail_scan: bool,
    }

    impl InstrumentedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                updates: AtomicUsize::new(0),
                fail_ids: Vec::new(),
                fail_scan: false,
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for InstrumentedStore {
        async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
            self.inner.put_item(request).await
        }

        async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
            self.inner.get_item(key).await
        }

        async fn query_index(&self, query: IndexQuery) -> Result<Page, StoreError> {
            self.inner.query_index(query).await
        }

        async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError> {
            if self.fail_ids.contains(&request.key) {
                return Err(StoreError::backend("update_item", "throttled"));
            }
            let result = self.inner.update_item(request).await;
            if result.is_ok() {
                self.updates.fetch_add(1, Ordering::SeqCst);
            }
            result
        }

        async fn delete_item(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete_item(key).await
        }

        async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
            if self.fail_scan {
                return Err(StoreError::backend("scan", "table unavailable"));
            }
            self.inner.scan(request).await
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::with_page_size(2);
        let records = [
            ("t1", Some("u1"), Some("DONE")),
            ("t2", Some("u1"), None),
            ("t3", None, None),
            ("t4", Some("u2"), None),
            ("t5", None, Some("NEW")),
        ];
        for (id, owner, status) in records {
            let mut item = Item::new();
            item.insert(ATTR_ID.to_string(), id.to_string());
            item.insert(ATTR_TASK.to_string(), format!("task {}", id));
            if let Some(owner) = owner {
                item.insert(ATTR_OWNER.to_string(), owner.to_string());
            }
            if let Some(status) = status {
                item.insert(ATTR_STATUS.to_string(), status.to_string());
            }
            store.insert_raw(item).await.unwrap();
        }
        store
    }

    fn repository(store: Arc<InstrumentedStore>) -> TaskRepository {
        TaskRepository::new(store, "UserIdIndex").with_page_size(Some(2))
    }

    #[tokio::test]
    async fn status_backfill_touches_only_records_without_status() {
        let store = Arc::new(InstrumentedStore::new(seeded().await));
        let repo = repository(store.clone());

        let summary = BackfillJob::status().run(&repo).await.unwrap();
        assert_eq!(summary.scanned, 5);
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.skipped, 2);
        assert!(summary.failed.is_empty());

        let t1 = repo.get("t1").await.unwrap().unwrap();
        assert_eq!(t1.status.as_deref(), Some("DONE"));
        let t3 = repo.get("t3").await.unwrap().unwrap();
        assert_eq!(t3.status.as_deref(), Some("NEW"));
    }

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let store = Arc::new(InstrumentedStore::new(seeded().await));
        let repo = repository(store.clone());

        BackfillJob::status().run(&repo).await.unwrap();
        let after_first = store.updates.load(Ordering::SeqCst);
        let snapshot = repo.scan_all().await.unwrap();

        let second = BackfillJob::status().run(&repo).await.unwrap();
        assert_eq!(second.updated, 0);
        assert_eq!(second.skipped, 5);
        assert_eq!(store.updates.load(Ordering::SeqCst), after_first);
        assert_eq!(repo.scan_all().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn owner_backfill_uses_sentinel_and_keeps_records_private() {
        let store = Arc::new(InstrumentedStore::new(seeded().await));
        let repo = repository(store.clone());

        let summary = BackfillJob::owner().run(&repo).await.unwrap();
        assert_eq!(summary.updated, 2);

        let t3 = repo.get("t3").await.unwrap().unwrap();
        assert_eq!(t3.owner_id.as_deref(), Some("0"));
        assert!(!t3.is_owned_by("u1"));
        let t1 = repo.get("t1").await.unwrap().unwrap();
        assert_eq!(t1.owner_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn dry_run_counts_without_writing() {
        let store = Arc::new(InstrumentedStore::new(seeded().await));
        let repo = repository(store.clone());

        let summary = BackfillJob::status().dry_run(true).run(&repo).await.unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.updated, 3);
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
        assert_eq!(repo.get("t3").await.unwrap().unwrap().status, None);
    }

    #[tokio::test]
    async fn record_failures_do_not_stop_the_run() {
        let mut store = InstrumentedStore::new(seeded().await);
        store.fail_ids = vec!["t2".to_string()];
        let store = Arc::new(store);
        let repo = repository(store.clone());

        let summary = BackfillJob::status()
            .with_concurrency(1)
            .run(&repo)
            .await
            .unwrap();
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, "t2");
        assert_eq!(repo.get("t4").await.unwrap().unwrap().status.as_deref(), Some("NEW"));
        assert_eq!(repo.get("t2").await.unwrap().unwrap().status, None);
    }

    #[tokio::test]
    async fn unreadable_records_are_counted_as_failures() {
        let inner = seeded().await;
        let mut broken = Item::new();
        broken.insert(ATTR_ID.to_string(), "t6".to_string());
        inner.insert_raw(broken).await.unwrap();
        let repo = repository(Arc::new(InstrumentedStore::new(inner)));

        let summary = BackfillJob::status().run(&repo).await.unwrap();
        assert_eq!(summary.scanned, 6);
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].id, "t6");
    }

    #[tokio::test]
    async fn scan_failure_aborts_the_job() {
        let mut store = InstrumentedStore::new(seeded().await);
        store.fail_scan = true;
        let repo = repository(Arc::new(store));

        assert!(BackfillJob::status().run(&repo).await.is_err());
    }

    #[tokio::test]
    async fn custom_value_is_written() {
        let store = Arc::new(InstrumentedStore::new(seeded().await));
        let repo = repository(store);

        BackfillJob::status().with_value("TODO").run(&repo).await.unwrap();
        assert_eq!(
            repo.get("t2").await.unwrap().unwrap().status.as_deref(),
            Some("TODO")
        );
    }
}
