use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {message}")]
    LoadError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aws: AwsConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_cart_table")]
    pub cart_table_name: String,
    #[serde(default = "default_products_table")]
    pub products_table_name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub dynamodb_client: DynamoDbClient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_enable_json_logging")]
    pub enable_json_logging: bool,
}

impl Config {
    /// Load configuration from `CART_`-prefixed environment variables and
    /// construct the shared AWS clients
    pub async fn from_environment() -> Result<Self, ConfigError> {
        info!("Loading configuration from environment");

        let settings = environment_settings()?;
        let server = ServerConfig::from_settings(&settings)?;
        let database = DatabaseConfig::from_settings(&settings)?;
        let observability = ObservabilityConfig::from_settings(&settings)?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(database.region.clone()))
            .load()
            .await;

        let aws = AwsConfig {
            region: database.region.clone(),
            dynamodb_client: DynamoDbClient::new(&aws_config),
        };

        let config = Config {
            server,
            database,
            aws,
            observability,
        };

        config.validate()?;

        info!("Configuration loaded successfully");
        debug!("Configuration: {:?}", config);

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "Server port cannot be 0".to_string(),
            });
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError {
                message: "Request timeout cannot be 0".to_string(),
            });
        }

        if self.database.cart_table_name.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "Cart table name cannot be empty".to_string(),
            });
        }

        if self.database.products_table_name.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "Products table name cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl ServerConfig {
    fn from_settings(settings: &config::Config) -> Result<Self, ConfigError> {
        deserialize_section(settings, "server")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl DatabaseConfig {
    fn from_settings(settings: &config::Config) -> Result<Self, ConfigError> {
        deserialize_section(settings, "database")
    }
}

impl ObservabilityConfig {
    fn from_settings(settings: &config::Config) -> Result<Self, ConfigError> {
        deserialize_section(settings, "observability")
    }
}

/// Read the `CART_`-prefixed environment once; every section deserializes
/// its own fields from the shared settings.
fn environment_settings() -> Result<config::Config, ConfigError> {
    config::Config::builder()
        .add_source(config::Environment::with_prefix("CART"))
        .build()
        .map_err(|e| ConfigError::LoadError {
            message: format!("Failed to read environment: {}", e),
        })
}

fn deserialize_section<T: serde::de::DeserializeOwned>(
    settings: &config::Config,
    section: &str,
) -> Result<T, ConfigError> {
    settings
        .clone()
        .try_deserialize()
        .map_err(|e| ConfigError::LoadError {
            message: format!("Failed to deserialize {} config: {}", section, e),
        })
}

// Default value functions
pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_timeout() -> u64 {
    30
}

pub(crate) fn default_cart_table() -> String {
    "CartItems".to_string()
}

pub(crate) fn default_products_table() -> String {
    "Products".to_string()
}

pub(crate) fn default_region() -> String {
    "us-west-2".to_string()
}

pub(crate) fn default_service_name() -> String {
    "cart-rs".to_string()
}

pub(crate) fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub(crate) fn default_otlp_endpoint() -> Option<String> {
    std::env::var("CART_OTLP_ENDPOINT").ok()
}

pub(crate) fn default_enable_json_logging() -> bool {
    std::env::var("CART_ENABLE_JSON_LOGGING")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_aws_config() -> AwsConfig {
        let config = aws_sdk_dynamodb::Config::builder()
            .region(aws_sdk_dynamodb::config::Region::new("us-east-1"))
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .build();
        AwsConfig {
            region: "us-east-1".to_string(),
            dynamodb_client: DynamoDbClient::from_conf(config),
        }
    }

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_seconds: default_timeout(),
            },
            database: DatabaseConfig {
                cart_table_name: default_cart_table(),
                products_table_name: default_products_table(),
                region: "us-east-1".to_string(),
            },
            aws: offline_aws_config(),
            observability: ObservabilityConfig {
                service_name: default_service_name(),
                service_version: default_service_version(),
                otlp_endpoint: None,
                enable_json_logging: false,
            },
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_port(), 8080);
        assert_eq!(default_cart_table(), "CartItems");
        assert_eq!(default_products_table(), "Products");
        assert_eq!(default_service_name(), "cart-rs");
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = test_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_table_name() {
        let mut config = test_config();
        config.database.cart_table_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sections_deserialize_from_shared_settings() {
        let settings = config::Config::builder()
            .set_override("port", 9090)
            .unwrap()
            .set_override("cart_table_name", "CustomCart")
            .unwrap()
            .set_override("service_name", "custom-cart")
            .unwrap()
            .build()
            .unwrap();

        let server = ServerConfig::from_settings(&settings).unwrap();
        let database = DatabaseConfig::from_settings(&settings).unwrap();
        let observability = ObservabilityConfig::from_settings(&settings).unwrap();

        assert_eq!(server.port, 9090);
        assert_eq!(server.host, default_host());
        assert_eq!(database.cart_table_name, "CustomCart");
        assert_eq!(database.products_table_name, default_products_table());
        assert_eq!(observability.service_name, "custom-cart");
    }

    #[test]
    fn test_request_timeout_duration() {
        let config = test_config();
        assert_eq!(config.server.request_timeout(), Duration::from_secs(30));
    }
}
