use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// A stored record as attribute name -> string value.
///
/// Every attribute of a todo is a string, so backends convert to and from
/// their native representation (DynamoDB `AttributeValue::S`, Postgres text
/// columns) at their own boundary.
pub type Item = BTreeMap<String, String>;

/// Opaque continuation key returned by a paginated read.
pub type PageKey = Item;

/// Errors from a key-value store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// A put or update condition did not hold for the current item.
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("malformed item: {0}")]
    Malformed(String),

    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            operation,
            message: message.into(),
        }
    }
}

/// Predicate evaluated against the current version of an item before a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
}

impl Condition {
    pub fn exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeExists(attribute.into())
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeNotExists(attribute.into())
    }

    pub fn attribute(&self) -> &str {
        match self {
            Condition::AttributeExists(a) | Condition::AttributeNotExists(a) => a,
        }
    }

    /// Evaluates the condition against the current item, `None` when absent.
    pub fn holds_for(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::AttributeExists(a) => current.map_or(false, |item| item.contains_key(a)),
            Condition::AttributeNotExists(a) => current.map_or(true, |item| !item.contains_key(a)),
        }
    }
}

/// Equality filter applied after the key condition has selected items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub item: Item,
    pub conditions: Vec<Condition>,
}

/// Partial update of one item: assigns `set` in order, leaves every other
/// attribute untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub key: String,
    pub set: Vec<(String, String)>,
    pub conditions: Vec<Condition>,
}

/// Equality query against a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub index: String,
    pub key_attribute: String,
    pub key_value: String,
    pub filter: Option<Filter>,
    pub start: Option<PageKey>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    pub start: Option<PageKey>,
    pub limit: Option<u32>,
}

/// One page of a query or scan. `next` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next: Option<PageKey>,
}

/// Contract the repository needs from a key-value store with secondary
/// indexes. Items are keyed by the `id` attribute.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Writes a whole item atomically.
    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError>;

    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError>;

    async fn query_index(&self, query: IndexQuery) -> Result<Page, StoreError>;

    /// Applies a partial update and returns the newly written attributes.
    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError>;

    /// Deletes by key. Deleting an absent key succeeds.
    async fn delete_item(&self, key: &str) -> Result<(), StoreError>;

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError>;
}
