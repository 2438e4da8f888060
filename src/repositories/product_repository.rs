use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::{Client as DynamoDbClient, Error as DynamoDbError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, Instrument};

use crate::models::{Product, RepositoryError, RepositoryResult};

/// Read-only access to the product catalog
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Find a product by id
    async fn find_by_id(&self, product_id: &str) -> RepositoryResult<Option<Product>>;
}

/// DynamoDB implementation of the ProductRepository trait
pub struct DynamoDbProductRepository {
    client: Arc<DynamoDbClient>,
    table_name: String,
    region: String,
}

impl DynamoDbProductRepository {
    /// Create a new DynamoDB product repository
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

    /// Convert a DynamoDB item to a Product
    pub fn item_to_product(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> RepositoryResult<Product> {
        let get_s = |name: &str| -> RepositoryResult<String> {
            item.get(name)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| RepositoryError::InvalidItem {
                    message: format!("Missing {}", name),
                })
        };

        let product_id = get_s("product_id")?;
        let name = get_s("name")?;
        let description = item
            .get("description")
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();

        let unit_price = item
            .get("unit_price")
            .and_then(|v| v.as_n().ok())
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidItem {
                message: "Invalid unit_price".to_string(),
            })?;

        let image = item.get("image").and_then(|v| v.as_s().ok()).cloned();

        let created_at = item
            .get("created_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let updated_at = item
            .get("updated_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(created_at);

        Ok(Product {
            product_id,
            name,
            description,
            unit_price,
            image,
            created_at,
            updated_at,
        })
    }

    fn map_dynamodb_error(&self, error: DynamoDbError) -> RepositoryError {
        error!("DynamoDB error: {:?}", error);
        RepositoryError::AwsSdk {
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl ProductRepository for DynamoDbProductRepository {
    #[instrument(skip(self), fields(table = %self.table_name, product_id = %product_id))]
    async fn find_by_id(&self, product_id: &str) -> RepositoryResult<Option<Product>> {
        info!("Finding product");

        let get_span = self.create_dynamodb_span("GetItem");

        let response = async {
            self.client
                .get_item()
                .table_name(&self.table_name)
                .key("product_id", AttributeValue::S(product_id.to_string()))
                .send()
                .await
                .map_err(|e| self.map_dynamodb_error(e.into()))
        }
        .instrument(get_span)
        .await?;

        match response.item {
            Some(item) => {
                let product = self.item_to_product(item)?;
                info!("Product found: {}", product.name);
                Ok(Some(product))
            }
            None => {
                info!("Product not found");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_repository() -> DynamoDbProductRepository {
        let config = aws_sdk_dynamodb::Config::builder()
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .build();
        let client = Arc::new(aws_sdk_dynamodb::Client::from_conf(config));
        DynamoDbProductRepository::new(
            client,
            "test-products-table".to_string(),
            "us-east-1".to_string(),
        )
    }

    fn test_product_map() -> HashMap<String, AttributeValue> {
        HashMap::from([
            (
                "product_id".to_string(),
                AttributeValue::S("P001".to_string()),
            ),
            (
                "name".to_string(),
                AttributeValue::S("Test Widget".to_string()),
            ),
            (
                "description".to_string(),
                AttributeValue::S("A widget for testing".to_string()),
            ),
            (
                "unit_price".to_string(),
                AttributeValue::N("19.99".to_string()),
            ),
            (
                "image".to_string(),
                AttributeValue::S("widget.jpg".to_string()),
            ),
            (
                "created_at".to_string(),
                AttributeValue::S(Utc::now().to_rfc3339()),
            ),
        ])
    }

    #[test]
    fn test_item_to_product() {
        let repo = test_repository();
        let product = repo.item_to_product(test_product_map()).unwrap();

        assert_eq!(product.product_id, "P001");
        assert_eq!(product.name, "Test Widget");
        assert_eq!(product.unit_price, dec!(19.99));
        assert_eq!(product.image.as_deref(), Some("widget.jpg"));
    }

    #[test]
    fn test_item_to_product_missing_price() {
        let repo = test_repository();
        let mut map = test_product_map();
        map.remove("unit_price");

        let result = repo.item_to_product(map);
        assert!(result.is_err());
    }

    #[test]
    fn test_item_to_product_optional_fields_default() {
        let repo = test_repository();
        let mut map = test_product_map();
        map.remove("description");
        map.remove("image");
        map.remove("created_at");

        let product = repo.item_to_product(map).unwrap();
        assert!(product.description.is_empty());
        assert!(product.image.is_none());
        assert_eq!(product.created_at, product.updated_at);
    }

    #[test]
    fn test_repository_creation() {
        let repo = test_repository();
        assert_eq!(repo.table_name(), "test-products-table");
    }
}
