use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::{Client as DynamoDbClient, Error as DynamoDbError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::models::{CartLineItem, RepositoryError, RepositoryResult};

/// Trait defining the interface for cart line item data access
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Find an owner's line item for a specific product
    async fn find_by_product(
        &self,
        owner_id: &str,
        product_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>>;

    /// Find an owner's line item by its opaque item id
    async fn find_by_id(
        &self,
        owner_id: &str,
        item_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>>;

    /// Atomically add `quantity` to the owner's line item for `product_id`,
    /// creating the item (with a store-assigned id) if it does not exist.
    /// The unit-price snapshot is refreshed in the same write.
    async fn upsert_item(
        &self,
        owner_id: &str,
        product_id: &str,
        quantity: u32,
        unit_price: Decimal,
    ) -> RepositoryResult<CartLineItem>;

    /// Replace the quantity of an existing line item, conditional on the
    /// stored item id still matching. Fails with `NotFound` otherwise.
    async fn set_quantity(
        &self,
        owner_id: &str,
        product_id: &str,
        item_id: &str,
        quantity: u32,
        unit_price: Decimal,
    ) -> RepositoryResult<CartLineItem>;

    /// Delete a line item by its opaque id, returning the deleted item
    async fn delete_by_id(
        &self,
        owner_id: &str,
        item_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>>;

    /// Delete all of an owner's line items
    async fn delete_all(&self, owner_id: &str) -> RepositoryResult<()>;

    /// All of an owner's line items, store order
    async fn find_all(&self, owner_id: &str) -> RepositoryResult<Vec<CartLineItem>>;
}

/// DynamoDB implementation of the CartRepository trait.
///
/// The table is keyed `(owner_id, product_id)`, which is what makes the
/// at-most-one-item-per-product invariant and the single-write merge hold.
pub struct DynamoDbCartRepository {
    client: Arc<DynamoDbClient>,
    table_name: String,
    region: String,
}

impl DynamoDbCartRepository {
    /// Create a new DynamoDB cart repository
    pub fn new(client: Arc<DynamoDbClient>, table_name: String, region: String) -> Self {
        Self {
            client,
            table_name,
            region,
        }
    }

    /// Get the table name (for testing)
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Create a DynamoDB client span for the given operation
    fn create_dynamodb_span(&self, operation: &str) -> tracing::Span {
        tracing::info_span!(
            "DynamoDB",
            "aws.service" = "DynamoDB",
            "aws.operation" = operation,
            "aws.region" = %self.region,
            "aws.dynamodb.table_name" = %self.table_name,
            "otel.kind" = "client",
            "otel.name" = format!("DynamoDB.{}", operation),
            "rpc.system" = "aws-api",
            "rpc.service" = "AmazonDynamoDBv2",
            "rpc.method" = operation,
            "db.system" = "dynamodb",
            "db.name" = %self.table_name,
            "db.operation" = operation,
        )
    }

    /// Convert a DynamoDB item to a CartLineItem
    pub fn item_to_line_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> RepositoryResult<CartLineItem> {
        let get_s = |name: &str| -> RepositoryResult<String> {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| RepositoryError::InvalidItem {
                    message: format!("Missing {}", name),
                })
        };

        let owner_id = get_s("owner_id")?;
        let product_id = get_s("product_id")?;
        let item_id = get_s("item_id")?;

        let quantity = item
            .get("quantity")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "Invalid quantity".to_string(),
            })?;

        let unit_price = item
            .get("unit_price")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "Invalid unit_price".to_string(),
            })?;

        let added_at = item
            .get("added_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "Invalid added_at".to_string(),
            })?;

        let updated_at = item
            .get("updated_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(added_at);

        Ok(CartLineItem {
            item_id,
            owner_id,
            product_id,
            quantity,
            unit_price,
            added_at,
            updated_at,
        })
    }

    fn key(&self, owner_id: &str, product_id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([
            (
                "owner_id".to_string(),
                AttributeValue::S(owner_id.to_string()),
            ),
            (
                "product_id".to_string(),
                AttributeValue::S(product_id.to_string()),
            ),
        ])
    }

    /// Convert a DynamoDB error to a RepositoryError
    fn map_dynamodb_error(&self, error: DynamoDbError) -> RepositoryError {
        error!("DynamoDB error: {:?}", error);
        RepositoryError::AwsSdk {
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl CartRepository for DynamoDbCartRepository {
    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id, product_id = %product_id))]
    async fn find_by_product(
        &self,
        owner_id: &str,
        product_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>> {
        info!("Finding line item by product");

        let get_span = self.create_dynamodb_span("GetItem");

        let response = async {
            self.client
                .get_item()
                .table_name(&self.table_name)
                .set_key(Some(self.key(owner_id, product_id)))
                .send()
                .await
                .map_err(|e| self.map_dynamodb_error(e.into()))
        }
        .instrument(get_span)
        .await?;

        match response.item {
            Some(item) => Ok(Some(self.item_to_line_item(item)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id, item_id = %item_id))]
    async fn find_by_id(
        &self,
        owner_id: &str,
        item_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>> {
        info!("Finding line item by id");

        // The filter runs after pagination, so a match can sit on any page;
        // keep querying until the item turns up or the partition is exhausted.
        let mut last_evaluated_key = None;

        loop {
            let query_span = self.create_dynamodb_span("Query");

            let response = async {
                self.client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("owner_id = :owner")
                    .filter_expression("item_id = :id")
                    .expression_attribute_values(":owner", AttributeValue::S(owner_id.to_string()))
                    .expression_attribute_values(":id", AttributeValue::S(item_id.to_string()))
                    .set_exclusive_start_key(last_evaluated_key.take())
                    .send()
                    .await
                    .map_err(|e| self.map_dynamodb_error(e.into()))
            }
            .instrument(query_span)
            .await?;

            if let Some(item) = response.items.unwrap_or_default().into_iter().next() {
                return Ok(Some(self.item_to_line_item(item)?));
            }

            match response.last_evaluated_key {
                Some(key) if !key.is_empty() => last_evaluated_key = Some(key),
                _ => return Ok(None),
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id, product_id = %product_id, quantity = quantity))]
    async fn upsert_item(
        &self,
        owner_id: &str,
        product_id: &str,
        quantity: u32,
        unit_price: Decimal,
    ) -> RepositoryResult<CartLineItem> {
        info!("Upserting line item");

        // Single atomic write: ADD merges quantities, if_not_exists assigns
        // the id and creation timestamp only on first insert.
        let update_span = self.create_dynamodb_span("UpdateItem");
        let now = Utc::now().to_rfc3339();

        let response = async {
            self.client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(self.key(owner_id, product_id)))
                .update_expression(
                    "ADD quantity :quantity \
                     SET unit_price = :unit_price, \
                         item_id = if_not_exists(item_id, :item_id), \
                         added_at = if_not_exists(added_at, :now), \
                         updated_at = :now",
                )
                .expression_attribute_values(":quantity", AttributeValue::N(quantity.to_string()))
                .expression_attribute_values(
                    ":unit_price",
                    AttributeValue::N(unit_price.to_string()),
                )
                .expression_attribute_values(
                    ":item_id",
                    AttributeValue::S(Uuid::new_v4().to_string()),
                )
                .expression_attribute_values(":now", AttributeValue::S(now))
                .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
                .send()
                .await
                .map_err(|e| self.map_dynamodb_error(e.into()))
        }
        .instrument(update_span)
        .await?;

        let attributes = response
            .attributes
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "UpdateItem returned no attributes".to_string(),
            })?;

        let item = self.item_to_line_item(attributes)?;
        info!("Line item upserted, quantity now {}", item.quantity);
        Ok(item)
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id, item_id = %item_id, quantity = quantity))]
    async fn set_quantity(
        &self,
        owner_id: &str,
        product_id: &str,
        item_id: &str,
        quantity: u32,
        unit_price: Decimal,
    ) -> RepositoryResult<CartLineItem> {
        info!("Replacing line item quantity");

        let update_span = self.create_dynamodb_span("UpdateItem");
        let now = Utc::now().to_rfc3339();

        let response = async {
            self.client
                .update_item()
                .table_name(&self.table_name)
                .set_key(Some(self.key(owner_id, product_id)))
                .condition_expression("item_id = :item_id")
                .update_expression(
                    "SET quantity = :quantity, unit_price = :unit_price, updated_at = :now",
                )
                .expression_attribute_values(":item_id", AttributeValue::S(item_id.to_string()))
                .expression_attribute_values(":quantity", AttributeValue::N(quantity.to_string()))
                .expression_attribute_values(
                    ":unit_price",
                    AttributeValue::N(unit_price.to_string()),
                )
                .expression_attribute_values(":now", AttributeValue::S(now))
                .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .map(|se| se.is_conditional_check_failed_exception())
                        .unwrap_or(false)
                    {
                        RepositoryError::NotFound
                    } else {
                        self.map_dynamodb_error(e.into())
                    }
                })
        }
        .instrument(update_span)
        .await?;

        let attributes = response
            .attributes
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "UpdateItem returned no attributes".to_string(),
            })?;

        self.item_to_line_item(attributes)
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id, item_id = %item_id))]
    async fn delete_by_id(
        &self,
        owner_id: &str,
        item_id: &str,
    ) -> RepositoryResult<Option<CartLineItem>> {
        info!("Deleting line item");

        // The item id is not the table key, so resolve it first, then delete
        // by key with the id as a condition in case of a concurrent replace.
        let existing = match self.find_by_id(owner_id, item_id).await? {
            Some(item) => item,
            None => return Ok(None),
        };

        let delete_span = self.create_dynamodb_span("DeleteItem");

        let result = async {
            self.client
                .delete_item()
                .table_name(&self.table_name)
                .set_key(Some(self.key(owner_id, &existing.product_id)))
                .condition_expression("item_id = :item_id")
                .expression_attribute_values(":item_id", AttributeValue::S(item_id.to_string()))
                .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld)
                .send()
                .await
        }
        .instrument(delete_span)
        .await;

        match result {
            Ok(response) => match response.attributes {
                Some(attributes) => Ok(Some(self.item_to_line_item(attributes)?)),
                None => Ok(None),
            },
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(self.map_dynamodb_error(e.into()))
                }
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id))]
    async fn delete_all(&self, owner_id: &str) -> RepositoryResult<()> {
        info!("Clearing all line items for owner");

        let items = self.find_all(owner_id).await?;
        let count = items.len();

        for item in items {
            let delete_span = self.create_dynamodb_span("DeleteItem");
            async {
                self.client
                    .delete_item()
                    .table_name(&self.table_name)
                    .set_key(Some(self.key(owner_id, &item.product_id)))
                    .send()
                    .await
                    .map_err(|e| self.map_dynamodb_error(e.into()))
            }
            .instrument(delete_span)
            .await?;
        }

        info!("Cleared {} line items", count);
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.table_name, owner_id = %owner_id))]
    async fn find_all(&self, owner_id: &str) -> RepositoryResult<Vec<CartLineItem>> {
        info!("Finding all line items for owner");

        let mut items = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let query_span = self.create_dynamodb_span("Query");

            let response = async {
                self.client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("owner_id = :owner")
                    .expression_attribute_values(":owner", AttributeValue::S(owner_id.to_string()))
                    .set_exclusive_start_key(last_evaluated_key.take())
                    .send()
                    .await
                    .map_err(|e| self.map_dynamodb_error(e.into()))
            }
            .instrument(query_span)
            .await?;

            for item in response.items.unwrap_or_default() {
                match self.item_to_line_item(item) {
                    Ok(line_item) => items.push(line_item),
                    Err(e) => {
                        warn!("Skipping unparseable line item: {}", e);
                        continue;
                    }
                }
            }

            match response.last_evaluated_key {
                Some(key) if !key.is_empty() => last_evaluated_key = Some(key),
                _ => break,
            }
        }

        info!("Found {} line items", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;
    use rust_decimal_macros::dec;

    fn test_repository() -> DynamoDbCartRepository {
        let config = aws_sdk_dynamodb::Config::builder()
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .build();
        let client = Arc::new(aws_sdk_dynamodb::Client::from_conf(config));
        DynamoDbCartRepository::new(client, "test-cart-table".to_string(), "us-east-1".to_string())
    }

    fn query_event(response_body: &str) -> ReplayEvent {
        ReplayEvent::new(
            http::Request::builder()
                .uri("https://dynamodb.us-east-1.amazonaws.com/")
                .body(SdkBody::from(""))
                .unwrap(),
            http::Response::builder()
                .status(200)
                .body(SdkBody::from(response_body.to_string()))
                .unwrap(),
        )
    }

    fn replay_repository(events: Vec<ReplayEvent>) -> (DynamoDbCartRepository, StaticReplayClient) {
        let http_client = StaticReplayClient::new(events);
        let config = aws_sdk_dynamodb::Config::builder()
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .credentials_provider(aws_sdk_dynamodb::config::Credentials::new(
                "test-access-key",
                "test-secret-key",
                None,
                None,
                "test",
            ))
            .http_client(http_client.clone())
            .build();
        let client = Arc::new(aws_sdk_dynamodb::Client::from_conf(config));
        let repository = DynamoDbCartRepository::new(
            client,
            "test-cart-table".to_string(),
            "us-east-1".to_string(),
        );
        (repository, http_client)
    }

    const QUERY_PAGE_ONE: &str = r#"{"Items":[{"owner_id":{"S":"owner-1"},"product_id":{"S":"P001"},"item_id":{"S":"item-1"},"quantity":{"N":"2"},"unit_price":{"N":"10"},"added_at":{"S":"2026-08-30T00:00:00Z"},"updated_at":{"S":"2026-08-30T00:00:00Z"}}],"Count":1,"ScannedCount":1,"LastEvaluatedKey":{"owner_id":{"S":"owner-1"},"product_id":{"S":"P001"}}}"#;

    const QUERY_PAGE_TWO: &str = r#"{"Items":[{"owner_id":{"S":"owner-1"},"product_id":{"S":"P002"},"item_id":{"S":"item-2"},"quantity":{"N":"1"},"unit_price":{"N":"5"},"added_at":{"S":"2026-08-30T00:00:00Z"},"updated_at":{"S":"2026-08-30T00:00:00Z"}}],"Count":1,"ScannedCount":1}"#;

    const QUERY_PAGE_FILTERED_EMPTY: &str = r#"{"Items":[],"Count":0,"ScannedCount":1,"LastEvaluatedKey":{"owner_id":{"S":"owner-1"},"product_id":{"S":"P001"}}}"#;

    fn test_item_map() -> HashMap<String, AttributeValue> {
        HashMap::from([
            (
                "owner_id".to_string(),
                AttributeValue::S("owner-1".to_string()),
            ),
            (
                "product_id".to_string(),
                AttributeValue::S("P001".to_string()),
            ),
            (
                "item_id".to_string(),
                AttributeValue::S("11111111-2222-3333-4444-555555555555".to_string()),
            ),
            ("quantity".to_string(), AttributeValue::N("3".to_string())),
            (
                "unit_price".to_string(),
                AttributeValue::N("15.99".to_string()),
            ),
            (
                "added_at".to_string(),
                AttributeValue::S(Utc::now().to_rfc3339()),
            ),
            (
                "updated_at".to_string(),
                AttributeValue::S(Utc::now().to_rfc3339()),
            ),
        ])
    }

    #[test]
    fn test_repository_creation() {
        let repo = test_repository();
        assert_eq!(repo.table_name(), "test-cart-table");
    }

    #[test]
    fn test_item_to_line_item() {
        let repo = test_repository();
        let item = repo.item_to_line_item(test_item_map()).unwrap();

        assert_eq!(item.owner_id, "owner-1");
        assert_eq!(item.product_id, "P001");
        assert_eq!(item.quantity, 3);
        assert_eq!(item.unit_price, dec!(15.99));
        assert_eq!(item.price(), dec!(47.97));
    }

    #[test]
    fn test_item_to_line_item_missing_updated_at_falls_back() {
        let repo = test_repository();
        let mut map = test_item_map();
        map.remove("updated_at");

        let item = repo.item_to_line_item(map).unwrap();
        assert_eq!(item.updated_at, item.added_at);
    }

    #[test]
    fn test_item_to_line_item_missing_required_field() {
        let repo = test_repository();
        let mut map = test_item_map();
        map.remove("item_id");

        let result = repo.item_to_line_item(map);
        assert!(result.is_err());
        match result.unwrap_err() {
            RepositoryError::InvalidItem { message } => {
                assert!(message.contains("item_id"));
            }
            _ => panic!("Expected InvalidItem error"),
        }
    }

    #[test]
    fn test_item_to_line_item_invalid_price() {
        let repo = test_repository();
        let mut map = test_item_map();
        map.insert(
            "unit_price".to_string(),
            AttributeValue::N("not-a-number".to_string()),
        );

        let result = repo.item_to_line_item(map);
        assert!(result.is_err());
    }

    #[test]
    fn test_key_contains_both_components() {
        let repo = test_repository();
        let key = repo.key("owner-1", "P001");

        assert_eq!(key.len(), 2);
        assert_eq!(
            key.get("owner_id"),
            Some(&AttributeValue::S("owner-1".to_string()))
        );
        assert_eq!(
            key.get("product_id"),
            Some(&AttributeValue::S("P001".to_string()))
        );
    }

    #[tokio::test]
    async fn test_find_all_follows_pagination() {
        let (repository, http_client) = replay_repository(vec![
            query_event(QUERY_PAGE_ONE),
            query_event(QUERY_PAGE_TWO),
        ]);

        let items = repository.find_all("owner-1").await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].product_id, "P001");
        assert_eq!(items[1].product_id, "P002");
        assert_eq!(http_client.actual_requests().count(), 2);
    }

    #[tokio::test]
    async fn test_find_by_id_searches_past_first_page() {
        // First page is fully filtered out but carries a LastEvaluatedKey
        let (repository, http_client) = replay_repository(vec![
            query_event(QUERY_PAGE_FILTERED_EMPTY),
            query_event(QUERY_PAGE_TWO),
        ]);

        let item = repository
            .find_by_id("owner-1", "item-2")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(item.product_id, "P002");
        assert_eq!(item.quantity, 1);
        assert_eq!(http_client.actual_requests().count(), 2);
    }

    #[tokio::test]
    async fn test_find_by_id_exhausted_partition_is_none() {
        let (repository, http_client) = replay_repository(vec![
            query_event(QUERY_PAGE_FILTERED_EMPTY),
            query_event(r#"{"Items":[],"Count":0,"ScannedCount":0}"#),
        ]);

        let result = repository.find_by_id("owner-1", "missing").await.unwrap();

        assert!(result.is_none());
        assert_eq!(http_client.actual_requests().count(), 2);
    }

    // Behavior against a live DynamoDB (merge atomicity, conditional deletes)
    // is exercised in the environment's integration stage, not here.
}
