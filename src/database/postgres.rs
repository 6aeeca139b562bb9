//! Postgres backend for self-hosted deployments.
//!
//! Expected schema (provisioned elsewhere):
//! ```sql
//! CREATE TABLE todos (
//!     id       TEXT PRIMARY KEY,
//!     owner_id TEXT,
//!     task     TEXT NOT NULL,
//!     status   TEXT
//! );
//! CREATE INDEX todos_owner_id_idx ON todos (owner_id);
//! ```
//! The owner index is the btree on `owner_id`; the index name in a query is
//! not needed to select it.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tracing::{error, instrument};

use super::store::{
    Condition, IndexQuery, Item, KeyValueStore, Page, PageKey, PutRequest, ScanRequest,
    StoreError, UpdateRequest,
};
use super::{ATTR_ID, ATTR_OWNER, ATTR_STATUS, ATTR_TASK};

/// Attribute name -> column name. Also the whitelist of identifiers that may
/// appear in generated SQL.
const COLUMNS: [(&str, &str); 4] = [
    (ATTR_ID, "id"),
    (ATTR_OWNER, "owner_id"),
    (ATTR_TASK, "task"),
    (ATTR_STATUS, "status"),
];

const SELECT_COLUMNS: &str = "id, owner_id, task, status";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    table: String,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        table: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(sql_error("connect"))?;
        Self::new(pool, table)
    }

    pub fn new(pool: PgPool, table: &str) -> Result<Self, StoreError> {
        if !Self::is_valid_table_name(table) {
            return Err(StoreError::backend(
                "connect",
                format!("invalid table name: {}", table),
            ));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    fn is_valid_table_name(name: &str) -> bool {
        !name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn column(attribute: &str) -> Result<&'static str, StoreError> {
        COLUMNS
            .iter()
            .find(|(attr, _)| *attr == attribute)
            .map(|(_, column)| *column)
            .ok_or_else(|| StoreError::backend("sql", format!("unknown attribute: {}", attribute)))
    }

    fn row_to_item(row: &PgRow) -> Result<Item, StoreError> {
        let mut item = Item::new();
        for (attribute, column) in COLUMNS {
            let value: Option<String> = row.try_get(column).map_err(sql_error("decode"))?;
            if let Some(value) = value {
                item.insert(attribute.to_string(), value);
            }
        }
        Ok(item)
    }

    /// `col IS [NOT] NULL` predicates for the conditions of an update. The
    /// key column is always present on a matched row, so its existence check
    /// is implied by `WHERE id = ...`.
    fn predicates(conditions: &[Condition]) -> Result<Vec<String>, StoreError> {
        let mut predicates = Vec::new();
        for condition in conditions {
            let column = Self::column(condition.attribute())?;
            match condition {
                Condition::AttributeExists(_) if column == "id" => {}
                Condition::AttributeExists(_) => predicates.push(format!("{} IS NOT NULL", column)),
                Condition::AttributeNotExists(_) if column == "id" => {
                    return Err(StoreError::backend(
                        "update_item",
                        "update cannot require the key to be absent",
                    ))
                }
                Condition::AttributeNotExists(_) => predicates.push(format!("{} IS NULL", column)),
            }
        }
        Ok(predicates)
    }

    fn next_key(items: &[Item], limit: Option<u32>) -> Option<PageKey> {
        let limit = limit? as usize;
        if items.len() < limit {
            return None;
        }
        let last = items.last()?.get(ATTR_ID)?;
        let mut key = PageKey::new();
        key.insert(ATTR_ID.to_string(), last.clone());
        Some(key)
    }
}

fn sql_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| {
        error!(error = %err, operation, "Postgres store error");
        StoreError::backend(operation, err.to_string())
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    #[instrument(skip(self, request), fields(table = %self.table))]
    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (attribute, value) in &request.item {
            columns.push(Self::column(attribute)?);
            values.push(value.clone());
        }
        if !columns.contains(&"id") {
            return Err(StoreError::Malformed("item has no id".into()));
        }

        let insert_only = match request.conditions.as_slice() {
            [] => false,
            [Condition::AttributeNotExists(a)] if a == ATTR_ID => true,
            _ => {
                return Err(StoreError::backend(
                    "put_item",
                    "only a key-absent condition is supported on put",
                ))
            }
        };

        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
        let conflict = if insert_only {
            "DO NOTHING".to_string()
        } else {
            // A put replaces the whole record, so columns missing from the
            // item are cleared.
            let assignments: Vec<String> = COLUMNS
                .iter()
                .filter(|(_, column)| *column != "id")
                .map(|(_, column)| {
                    if columns.contains(column) {
                        format!("{0} = EXCLUDED.{0}", column)
                    } else {
                        format!("{} = NULL", column)
                    }
                })
                .collect();
            format!("DO UPDATE SET {}", assignments.join(", "))
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) {}",
            self.table,
            columns.join(", "),
            placeholders.join(", "),
            conflict
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        let result = query.execute(&self.pool).await.map_err(sql_error("put_item"))?;

        if insert_only && result.rows_affected() == 0 {
            return Err(StoreError::ConditionFailed);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", SELECT_COLUMNS, self.table);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_error("get_item"))?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    #[instrument(skip(self, query), fields(table = %self.table, index = %query.index))]
    async fn query_index(&self, query: IndexQuery) -> Result<Page, StoreError> {
        let key_column = Self::column(&query.key_attribute)?;
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            SELECT_COLUMNS, self.table, key_column
        );
        let mut binds = vec![query.key_value.clone()];

        if let Some(filter) = &query.filter {
            binds.push(filter.value.clone());
            sql.push_str(&format!(" AND {} = ${}", Self::column(&filter.attribute)?, binds.len()));
        }
        if let Some(after) = query.start.as_ref().and_then(|key| key.get(ATTR_ID)) {
            binds.push(after.clone());
            sql.push_str(&format!(" AND id > ${}", binds.len()));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = statement.bind(value);
        }
        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error("query"))?;

        let items = rows.iter().map(Self::row_to_item).collect::<Result<Vec<_>, _>>()?;
        let next = Self::next_key(&items, query.limit);
        Ok(Page { items, next })
    }

    #[instrument(skip(self, request), fields(table = %self.table, key = %request.key))]
    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError> {
        let mut assignments = Vec::new();
        let mut returning = Vec::new();
        let mut binds = Vec::new();
        for (attribute, value) in &request.set {
            let column = Self::column(attribute)?;
            binds.push(value.clone());
            assignments.push(format!("{} = ${}", column, binds.len()));
            returning.push((attribute.clone(), column));
        }
        if assignments.is_empty() {
            return Err(StoreError::backend("update_item", "nothing to update"));
        }

        binds.push(request.key.clone());
        let mut sql = format!(
            "UPDATE {} SET {} WHERE id = ${}",
            self.table,
            assignments.join(", "),
            binds.len()
        );
        for predicate in Self::predicates(&request.conditions)? {
            sql.push_str(" AND ");
            sql.push_str(&predicate);
        }
        let returned: Vec<&str> = returning.iter().map(|(_, column)| *column).collect();
        sql.push_str(&format!(" RETURNING {}", returned.join(", ")));

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = statement.bind(value);
        }
        let row = statement
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_error("update_item"))?;

        // No row means either no record at the key or a failed predicate;
        // rows are never created by an update.
        let row = row.ok_or(StoreError::ConditionFailed)?;
        let mut written = Item::new();
        for (attribute, column) in returning {
            let value: Option<String> = row.try_get(column).map_err(sql_error("decode"))?;
            if let Some(value) = value {
                written.insert(attribute, value);
            }
        }
        Ok(written)
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn delete_item(&self, key: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(sql_error("delete_item"))?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(table = %self.table))]
    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        let mut sql = format!("SELECT {} FROM {}", SELECT_COLUMNS, self.table);
        let after = request.start.as_ref().and_then(|key| key.get(ATTR_ID)).cloned();
        if after.is_some() {
            sql.push_str(" WHERE id > $1");
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = request.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut statement = sqlx::query(&sql);
        if let Some(after) = after {
            statement = statement.bind(after);
        }
        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(sql_error("scan"))?;

        let items = rows.iter().map(Self::row_to_item).collect::<Result<Vec<_>, _>>()?;
        let next = Self::next_key(&items, request.limit);
        Ok(Page { items, next })
    }
}
