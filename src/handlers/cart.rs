use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::models::{
    AddItemRequest, CartItemResponse, ConfirmPaymentRequest, RepositoryError, ServiceError,
    UpdateItemRequest,
};
use crate::observability::Metrics;
use crate::services::CartService;

/// Owner used when a request carries no `x-owner-id` header. Keeps the
/// single-shared-cart behavior working for clients that predate owner scoping.
const DEFAULT_OWNER: &str = "default";

/// Cart owner resolved from the `x-owner-id` request header
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get("x-owner-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_OWNER)
            .to_string();

        Ok(OwnerId(owner))
    }
}

/// State for cart handlers
#[derive(Clone)]
pub struct CartHandlerState {
    pub cart_service: Arc<CartService>,
    pub metrics: Arc<Metrics>,
}

/// Response envelope carrying a cart item
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemEnvelope {
    pub message: String,
    pub cart_item: CartItemResponse,
}

/// Response envelope for payment confirmation
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub message: String,
    pub total_amount: Decimal,
}

/// Response envelope for checkout
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSummary {
    pub message: String,
    pub total_price: Decimal,
}

/// Plain confirmation message
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /add - add a product to the cart, merging with an existing line item
#[instrument(skip(state, request), fields(owner_id = %owner))]
pub async fn add_item(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
    Json(request): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<CartItemEnvelope>), (StatusCode, Json<Value>)> {
    info!(
        "Adding item to cart: product_id={}, quantity={}",
        request.product_id, request.quantity
    );

    match state.cart_service.add_item(&owner, request).await {
        Ok(cart_item) => {
            state.metrics.record_cart_operation("add", true);
            Ok((
                StatusCode::CREATED,
                Json(CartItemEnvelope {
                    message: "Item added to cart".to_string(),
                    cart_item,
                }),
            ))
        }
        Err(err) => {
            state.metrics.record_cart_operation("add", false);
            error!("Failed to add item to cart: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// GET /items - list the cart joined with product details
#[instrument(skip(state), fields(owner_id = %owner))]
pub async fn list_items(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
) -> Result<Json<Vec<CartItemResponse>>, (StatusCode, Json<Value>)> {
    info!("Listing cart items");

    match state.cart_service.list_items(&owner).await {
        Ok(items) => {
            state.metrics.record_cart_operation("list", true);
            info!("Returning {} cart items", items.len());
            Ok(Json(items))
        }
        Err(err) => {
            state.metrics.record_cart_operation("list", false);
            error!("Failed to list cart items: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// PUT /update/:id - replace a line item's quantity
#[instrument(skip(state, request), fields(owner_id = %owner, item_id = %item_id))]
pub async fn update_item(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
    Path(item_id): Path<String>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Json<CartItemEnvelope>, (StatusCode, Json<Value>)> {
    info!("Updating cart item to quantity {}", request.quantity);

    match state
        .cart_service
        .update_item(&owner, &item_id, request)
        .await
    {
        Ok(cart_item) => {
            state.metrics.record_cart_operation("update", true);
            Ok(Json(CartItemEnvelope {
                message: "Cart item updated".to_string(),
                cart_item,
            }))
        }
        Err(err) => {
            state.metrics.record_cart_operation("update", false);
            error!("Failed to update cart item: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// DELETE /remove/:id - remove a line item
#[instrument(skip(state), fields(owner_id = %owner, item_id = %item_id))]
pub async fn remove_item(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
    Path(item_id): Path<String>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<Value>)> {
    info!("Removing cart item");

    match state.cart_service.remove_item(&owner, &item_id).await {
        Ok(()) => {
            state.metrics.record_cart_operation("remove", true);
            Ok(Json(MessageResponse {
                message: "Cart item removed".to_string(),
            }))
        }
        Err(err) => {
            state.metrics.record_cart_operation("remove", false);
            error!("Failed to remove cart item: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// POST /cart/confirmPayment - total the persisted cart and clear it
#[instrument(skip(state, request), fields(owner_id = %owner))]
pub async fn confirm_payment(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<PaymentConfirmation>, (StatusCode, Json<Value>)> {
    info!("Confirming payment");

    match state.cart_service.confirm_payment(&owner, request).await {
        Ok(total_amount) => {
            state.metrics.record_cart_operation("confirm_payment", true);
            Ok(Json(PaymentConfirmation {
                message: "Payment confirmed".to_string(),
                total_amount,
            }))
        }
        Err(err) => {
            state
                .metrics
                .record_cart_operation("confirm_payment", false);
            error!("Failed to confirm payment: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// POST /checkout - total the persisted cart from stored prices and clear it
#[instrument(skip(state), fields(owner_id = %owner))]
pub async fn checkout(
    State(state): State<CartHandlerState>,
    OwnerId(owner): OwnerId,
) -> Result<Json<CheckoutSummary>, (StatusCode, Json<Value>)> {
    info!("Checking out cart");

    match state.cart_service.checkout(&owner).await {
        Ok(total_price) => {
            state.metrics.record_cart_operation("checkout", true);
            Ok(Json(CheckoutSummary {
                message: "Checkout complete".to_string(),
                total_price,
            }))
        }
        Err(err) => {
            state.metrics.record_cart_operation("checkout", false);
            error!("Failed to checkout cart: {}", err);
            Err(service_error_to_response(err))
        }
    }
}

/// Convert a ServiceError to an HTTP response
pub(crate) fn service_error_to_response(err: ServiceError) -> (StatusCode, Json<Value>) {
    let (status, message) = match &err {
        ServiceError::ProductNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        ServiceError::CartItemNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        ServiceError::CartEmpty => (StatusCode::BAD_REQUEST, err.to_string()),
        ServiceError::ValidationError { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        ServiceError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        ServiceError::Repository { source } => match source {
            RepositoryError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            RepositoryError::ConnectionFailed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Database connection failed".to_string(),
            ),
            RepositoryError::Timeout => {
                (StatusCode::REQUEST_TIMEOUT, "Request timeout".to_string())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        },
        ServiceError::Configuration { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ),
    };

    (
        status,
        Json(json!({
            "error": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}
