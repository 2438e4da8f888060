use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Product;

/// A single cart entry pairing a product reference with a quantity and a
/// unit-price snapshot taken at the most recent write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub item_id: String,
    pub owner_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request model for adding an item to the cart.
///
/// Absent fields deserialize to their empty values so that the service's
/// validation reports them as 400s rather than failing at the JSON layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub quantity: u32,
}

/// Request model for replacing a cart item's quantity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    #[serde(default)]
    pub quantity: u32,
}

/// Request model for the legacy payment confirmation flow.
///
/// The line totals supplied by the client are cross-checked against the
/// persisted cart but never trusted for the returned amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub cart_items: Vec<PaymentLine>,
}

/// One client-supplied `{price, quantity}` pair in a confirmPayment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLine {
    pub price: Decimal,
    pub quantity: u32,
}

/// Cart item joined with its product record for API responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemResponse {
    pub item_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub price: Decimal,
    pub product: Option<Product>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartLineItem {
    /// Create a new line item with store-assigned id and timestamps
    pub fn new(
        item_id: String,
        owner_id: String,
        product_id: String,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            item_id,
            owner_id,
            product_id,
            quantity,
            unit_price,
            added_at: now,
            updated_at: now,
        }
    }

    /// Line price: unit-price snapshot times quantity
    pub fn price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Build the API response for this item, joined with its product record
    pub fn into_response(self, product: Option<Product>) -> CartItemResponse {
        let price = self.price();
        CartItemResponse {
            item_id: self.item_id,
            product_id: self.product_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            price,
            product,
            added_at: self.added_at,
            updated_at: self.updated_at,
        }
    }
}

impl PaymentLine {
    /// Client-side line total, used only for the consistency cross-check
    pub fn total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}
