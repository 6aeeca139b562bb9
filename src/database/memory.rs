use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{
    IndexQuery, Item, KeyValueStore, Page, PageKey, PutRequest, ScanRequest, StoreError,
    UpdateRequest,
};
use super::ATTR_ID;

/// In-process store used for local development and tests.
///
/// Scans and index queries are paged like DynamoDB: the page limit counts
/// items examined before the filter is applied, so a filtered page can be
/// shorter than the limit while more pages remain.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<String, Item>>,
    page_size: Option<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every page at `page_size` items unless the request asks for fewer.
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            page_size: Some(page_size.max(1)),
        }
    }

    /// Inserts an item as-is, bypassing conditions. Used to seed legacy
    /// records that lack fields the write path now always sets.
    pub async fn insert_raw(&self, item: Item) -> Result<(), StoreError> {
        let key = item
            .get(ATTR_ID)
            .cloned()
            .ok_or_else(|| StoreError::Malformed("item has no id".into()))?;
        self.items.write().await.insert(key, item);
        Ok(())
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn limit(&self, requested: Option<u32>) -> Option<usize> {
        match (requested, self.page_size) {
            (Some(r), Some(p)) => Some(r.min(p) as usize),
            (Some(r), None) => Some(r as usize),
            (None, p) => p.map(|p| p as usize),
        }
    }

    /// Takes one page from `candidates` (already in key order), starting
    /// after the key in `start`.
    fn page<'a>(
        candidates: impl Iterator<Item = (&'a String, &'a Item)>,
        start: Option<&PageKey>,
        limit: Option<usize>,
    ) -> (Vec<Item>, Option<PageKey>) {
        let after = start.and_then(|key| key.get(ATTR_ID));
        let mut remaining = candidates.filter(|(key, _)| after.map_or(true, |a| key.as_str() > a.as_str()));

        let mut examined = Vec::new();
        for (_, item) in remaining.by_ref() {
            examined.push(item.clone());
            if limit.map_or(false, |l| examined.len() >= l) {
                break;
            }
        }

        let next = match (limit, examined.last()) {
            (Some(l), Some(last)) if examined.len() >= l && remaining.next().is_some() => {
                let mut key = PageKey::new();
                if let Some(id) = last.get(ATTR_ID) {
                    key.insert(ATTR_ID.to_string(), id.clone());
                }
                Some(key)
            }
            _ => None,
        };
        (examined, next)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
        let key = request
            .item
            .get(ATTR_ID)
            .cloned()
            .ok_or_else(|| StoreError::Malformed("item has no id".into()))?;

        let mut items = self.items.write().await;
        let current = items.get(&key);
        if !request.conditions.iter().all(|c| c.holds_for(current)) {
            return Err(StoreError::ConditionFailed);
        }
        items.insert(key, request.item);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn query_index(&self, query: IndexQuery) -> Result<Page, StoreError> {
        let items = self.items.read().await;
        let candidates = items.iter().filter(|(_, item)| {
            item.get(&query.key_attribute).map(String::as_str) == Some(query.key_value.as_str())
        });
        let (examined, next) = Self::page(candidates, query.start.as_ref(), self.limit(query.limit));

        let items = match &query.filter {
            Some(filter) => examined
                .into_iter()
                .filter(|item| item.get(&filter.attribute) == Some(&filter.value))
                .collect(),
            None => examined,
        };
        Ok(Page { items, next })
    }

    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError> {
        let mut items = self.items.write().await;
        let current = items.get(&request.key);
        if !request.conditions.iter().all(|c| c.holds_for(current)) {
            return Err(StoreError::ConditionFailed);
        }

        let entry = items.entry(request.key.clone()).or_insert_with(|| {
            let mut item = Item::new();
            item.insert(ATTR_ID.to_string(), request.key.clone());
            item
        });

        let mut written = Item::new();
        for (attribute, value) in request.set {
            entry.insert(attribute.clone(), value.clone());
            written.insert(attribute, value);
        }
        Ok(written)
    }

    async fn delete_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        let items = self.items.read().await;
        let (items, next) = Self::page(items.iter(), request.start.as_ref(), self.limit(request.limit));
        Ok(Page { items, next })
    }
}
