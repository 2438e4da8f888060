use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use cart_rs::{
    handlers::{self, health_check, metrics_handler, CartHandlerState},
    init_observability,
    observability::observability_middleware,
    repositories::{DynamoDbCartRepository, DynamoDbProductRepository},
    services::CartService,
    shutdown_observability, Config, Metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (basic logging only)
    let config = Config::from_environment().await?;
    println!("Configuration loaded successfully");

    init_observability(
        &config.observability.service_name,
        &config.observability.service_version,
        config.observability.otlp_endpoint.as_deref(),
        config.observability.enable_json_logging,
    )?;

    info!("Starting cart-rs service");
    info!(
        "Service: {} v{}",
        config.observability.service_name, config.observability.service_version
    );
    info!("Region: {}", config.aws.region);
    info!(
        "DynamoDB tables: cart={}, products={}",
        config.database.cart_table_name, config.database.products_table_name
    );

    let metrics = Arc::new(Metrics::new()?);
    info!("Metrics initialized successfully");

    let dynamodb_client = Arc::new(config.aws.dynamodb_client.clone());

    let cart_repository = Arc::new(DynamoDbCartRepository::new(
        dynamodb_client.clone(),
        config.database.cart_table_name.clone(),
        config.database.region.clone(),
    ));
    let product_repository = Arc::new(DynamoDbProductRepository::new(
        dynamodb_client,
        config.database.products_table_name.clone(),
        config.database.region.clone(),
    ));
    info!("Repositories initialized successfully");

    let cart_service = Arc::new(CartService::new(cart_repository, product_repository));
    info!("Services initialized successfully");

    let app = create_app(metrics, cart_service);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
        shutdown_observability().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn create_app(metrics: Arc<Metrics>, cart_service: Arc<CartService>) -> Router {
    let metrics_for_middleware = metrics.clone();

    let cart_state = CartHandlerState {
        cart_service,
        metrics: metrics.clone(),
    };

    Router::new()
        // Health and metrics endpoints (with metrics state)
        .route("/health/status", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        // Cart endpoints (with cart state)
        .route("/add", post(handlers::add_item))
        .route("/items", get(handlers::list_items))
        .route("/cart/confirmPayment", post(handlers::confirm_payment))
        .route("/update/:id", put(handlers::update_item))
        .route("/remove/:id", delete(handlers::remove_item))
        .route("/checkout", post(handlers::checkout))
        .with_state(cart_state)
        // Middleware layers (outer to inner)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(move |req, next| {
            observability_middleware(metrics_for_middleware.clone(), req, next)
        }))
}
