//! DynamoDB backend.
//!
//! Table layout expected by the service (provisioned elsewhere):
//! ```text
//! Partition key: id (S)
//! GSI UserIdIndex: partition key userId (S), projection ALL
//! GSI StatusIndex: partition key status (S), projection ALL
//! ```
//! Only the owner index is queried; status filtering is a filter expression
//! evaluated after the owner key condition.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::DisplayErrorContext,
    types::{AttributeValue, ReturnValue},
    Client as DynamoDbClient,
};
use tracing::{debug, error, instrument};

use super::expression::{
    condition_expression, filter_expression, key_condition_expression, update_expression,
    Placeholders,
};
use super::store::{
    IndexQuery, Item, KeyValueStore, Page, PutRequest, ScanRequest, StoreError, UpdateRequest,
};
use super::ATTR_ID;

#[derive(Clone)]
pub struct DynamoStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoStore {
    /// Builds a client from the default AWS credential chain.
    ///
    /// `endpoint_url` points the client at DynamoDB Local or another
    /// compatible endpoint.
    #[instrument(skip_all, fields(region = %region))]
    pub async fn connect(
        region: &str,
        endpoint_url: Option<&str>,
        table_name: impl Into<String>,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let store = Self::new(DynamoDbClient::new(&config), table_name);
        debug!(table_name = %store.table_name, "DynamoDB store initialized");
        store
    }

    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn key(key: &str) -> AttributeValue {
        AttributeValue::S(key.to_string())
    }
}

fn to_attributes(item: Item) -> HashMap<String, AttributeValue> {
    item.into_iter()
        .map(|(name, value)| (name, AttributeValue::S(value)))
        .collect()
}

/// Keeps string attributes only; the service never writes any other type.
fn from_attributes(attributes: &HashMap<String, AttributeValue>) -> Item {
    attributes
        .iter()
        .filter_map(|(name, value)| value.as_s().ok().map(|s| (name.clone(), s.clone())))
        .collect()
}

fn to_values(values: HashMap<String, String>) -> Option<HashMap<String, AttributeValue>> {
    if values.is_empty() {
        None
    } else {
        Some(
            values
                .into_iter()
                .map(|(placeholder, value)| (placeholder, AttributeValue::S(value)))
                .collect(),
        )
    }
}

fn to_names(names: HashMap<String, String>) -> Option<HashMap<String, String>> {
    if names.is_empty() {
        None
    } else {
        Some(names)
    }
}

#[async_trait]
impl KeyValueStore for DynamoStore {
    #[instrument(skip(self, request), fields(table = %self.table_name))]
    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
        let mut placeholders = Placeholders::new();
        let condition = condition_expression(&mut placeholders, &request.conditions);

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_attributes(request.item)))
            .set_condition_expression(condition)
            .set_expression_attribute_names(to_names(placeholders.names))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::ConditionFailed)
            }
            Err(err) => {
                error!(error = %DisplayErrorContext(&err), "DynamoDB put_item failed");
                Err(StoreError::backend(
                    "put_item",
                    DisplayErrorContext(&err).to_string(),
                ))
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(ATTR_ID, Self::key(key))
            .consistent_read(true)
            .send()
            .await
            .map_err(|err| {
                error!(error = %DisplayErrorContext(&err), "DynamoDB get_item failed");
                StoreError::backend("get_item", DisplayErrorContext(&err).to_string())
            })?;

        Ok(output.item().map(from_attributes))
    }

    #[instrument(skip(self, query), fields(table = %self.table_name, index = %query.index))]
    async fn query_index(&self, query: IndexQuery) -> Result<Page, StoreError> {
        let mut placeholders = Placeholders::new();
        let key_condition =
            key_condition_expression(&mut placeholders, &query.key_attribute, &query.key_value);
        let filter = query
            .filter
            .as_ref()
            .map(|f| filter_expression(&mut placeholders, f));

        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(&query.index)
            .key_condition_expression(key_condition)
            .set_filter_expression(filter)
            .set_expression_attribute_names(to_names(placeholders.names))
            .set_expression_attribute_values(to_values(placeholders.values))
            .set_exclusive_start_key(query.start.map(to_attributes))
            .set_limit(query.limit.map(|l| l as i32))
            .send()
            .await
            .map_err(|err| {
                error!(error = %DisplayErrorContext(&err), "DynamoDB query failed");
                StoreError::backend("query", DisplayErrorContext(&err).to_string())
            })?;

        Ok(Page {
            items: output.items().iter().map(from_attributes).collect(),
            next: output.last_evaluated_key().map(from_attributes),
        })
    }

    #[instrument(skip(self, request), fields(table = %self.table_name, key = %request.key))]
    async fn update_item(&self, request: UpdateRequest) -> Result<Item, StoreError> {
        let mut placeholders = Placeholders::new();
        let update = update_expression(&mut placeholders, &request.set);
        let condition = condition_expression(&mut placeholders, &request.conditions);

        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(ATTR_ID, Self::key(&request.key))
            .update_expression(update)
            .set_condition_expression(condition)
            .set_expression_attribute_names(to_names(placeholders.names))
            .set_expression_attribute_values(to_values(placeholders.values))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.attributes().map(from_attributes).unwrap_or_default()),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_conditional_check_failed_exception()) =>
            {
                Err(StoreError::ConditionFailed)
            }
            Err(err) => {
                error!(error = %DisplayErrorContext(&err), "DynamoDB update_item failed");
                Err(StoreError::backend(
                    "update_item",
                    DisplayErrorContext(&err).to_string(),
                ))
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    async fn delete_item(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(ATTR_ID, Self::key(key))
            .send()
            .await
            .map_err(|err| {
                error!(error = %DisplayErrorContext(&err), "DynamoDB delete_item failed");
                StoreError::backend("delete_item", DisplayErrorContext(&err).to_string())
            })?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(table = %self.table_name))]
    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(&self.table_name)
            .set_exclusive_start_key(request.start.map(to_attributes))
            .set_limit(request.limit.map(|l| l as i32))
            .send()
            .await
            .map_err(|err| {
                error!(error = %DisplayErrorContext(&err), "DynamoDB scan failed");
                StoreError::backend("scan", DisplayErrorContext(&err).to_string())
            })?;

        Ok(Page {
            items: output.items().iter().map(from_attributes).collect(),
            next: output.last_evaluated_key().map(from_attributes),
        })
    }
}
