use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::models::{
    AddItemRequest, CartItemResponse, ConfirmPaymentRequest, PaymentLine, ServiceError,
    ServiceResult, UpdateItemRequest,
};
use crate::repositories::{CartRepository, ProductRepository};

/// Service owning cart line items and the two terminal totaling flows
pub struct CartService {
    cart_repository: Arc<dyn CartRepository>,
    product_repository: Arc<dyn ProductRepository>,
}

impl CartService {
    /// Create a new CartService
    pub fn new(
        cart_repository: Arc<dyn CartRepository>,
        product_repository: Arc<dyn ProductRepository>,
    ) -> Self {
        Self {
            cart_repository,
            product_repository,
        }
    }

    /// Add a product to the owner's cart, merging into an existing line item.
    ///
    /// The merge is a single atomic store write, so concurrent adds for the
    /// same product cannot create duplicate line items or lose increments.
    #[instrument(skip(self, request), fields(owner_id = %owner_id, product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_item(
        &self,
        owner_id: &str,
        request: AddItemRequest,
    ) -> ServiceResult<CartItemResponse> {
        info!("Adding item to cart");

        self.validate_owner_id(owner_id)?;
        self.validate_product_id(&request.product_id)?;
        self.validate_quantity(request.quantity)?;

        // Existence check happens before any write; an unknown product never
        // touches the cart table.
        let product = match self
            .product_repository
            .find_by_id(&request.product_id)
            .await?
        {
            Some(product) => product,
            None => {
                return Err(ServiceError::ProductNotFound {
                    product_id: request.product_id,
                });
            }
        };

        let item = self
            .cart_repository
            .upsert_item(
                owner_id,
                &request.product_id,
                request.quantity,
                product.unit_price,
            )
            .await?;

        info!("Item added, quantity now {}", item.quantity);
        Ok(item.into_response(Some(product)))
    }

    /// List the owner's cart, each line joined with its full product record
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn list_items(&self, owner_id: &str) -> ServiceResult<Vec<CartItemResponse>> {
        info!("Listing cart items");

        self.validate_owner_id(owner_id)?;

        let items = self.cart_repository.find_all(owner_id).await?;
        let mut responses = Vec::with_capacity(items.len());

        for item in items {
            let product = self.product_repository.find_by_id(&item.product_id).await?;
            if product.is_none() {
                warn!(
                    "Product {} no longer in catalog, listing item without it",
                    item.product_id
                );
            }
            responses.push(item.into_response(product));
        }

        info!("Listed {} cart items", responses.len());
        Ok(responses)
    }

    /// Replace a line item's quantity (absolute, not additive) and refresh
    /// its unit-price snapshot from the catalog
    #[instrument(skip(self, request), fields(owner_id = %owner_id, item_id = %item_id, quantity = request.quantity))]
    pub async fn update_item(
        &self,
        owner_id: &str,
        item_id: &str,
        request: UpdateItemRequest,
    ) -> ServiceResult<CartItemResponse> {
        info!("Updating cart item quantity");

        self.validate_owner_id(owner_id)?;
        self.validate_quantity(request.quantity)?;

        let existing = match self.cart_repository.find_by_id(owner_id, item_id).await? {
            Some(item) => item,
            None => {
                return Err(ServiceError::CartItemNotFound {
                    item_id: item_id.to_string(),
                });
            }
        };

        let product = match self
            .product_repository
            .find_by_id(&existing.product_id)
            .await?
        {
            Some(product) => product,
            None => {
                return Err(ServiceError::ProductNotFound {
                    product_id: existing.product_id,
                });
            }
        };

        let updated = self
            .cart_repository
            .set_quantity(
                owner_id,
                &existing.product_id,
                item_id,
                request.quantity,
                product.unit_price,
            )
            .await
            .map_err(|e| match e {
                // Condition failure: the item vanished between the lookup and
                // the write.
                crate::models::RepositoryError::NotFound => ServiceError::CartItemNotFound {
                    item_id: item_id.to_string(),
                },
                other => ServiceError::from(other),
            })?;

        info!("Cart item updated");
        Ok(updated.into_response(Some(product)))
    }

    /// Remove a line item by id. Removing a missing id is an error.
    #[instrument(skip(self), fields(owner_id = %owner_id, item_id = %item_id))]
    pub async fn remove_item(&self, owner_id: &str, item_id: &str) -> ServiceResult<()> {
        info!("Removing cart item");

        self.validate_owner_id(owner_id)?;

        match self.cart_repository.delete_by_id(owner_id, item_id).await? {
            Some(_) => {
                info!("Cart item removed");
                Ok(())
            }
            None => Err(ServiceError::CartItemNotFound {
                item_id: item_id.to_string(),
            }),
        }
    }

    /// Confirm payment: total the owner's persisted cart and clear it.
    ///
    /// The legacy request body carries client-computed line totals; they are
    /// cross-checked against the server-side figure and logged on mismatch,
    /// but the returned amount always comes from the persisted cart.
    #[instrument(skip(self, request), fields(owner_id = %owner_id, lines = request.cart_items.len()))]
    pub async fn confirm_payment(
        &self,
        owner_id: &str,
        request: ConfirmPaymentRequest,
    ) -> ServiceResult<Decimal> {
        info!("Confirming payment");

        self.validate_owner_id(owner_id)?;

        if request.cart_items.is_empty() {
            return Err(ServiceError::ValidationError {
                message: "Cart is empty".to_string(),
            });
        }

        let items = self.cart_repository.find_all(owner_id).await?;
        if items.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let total_amount: Decimal = items.iter().map(|item| item.price()).sum();
        let client_total: Decimal = request.cart_items.iter().map(PaymentLine::total).sum();
        if client_total != total_amount {
            warn!(
                %client_total,
                %total_amount,
                "Client-supplied total disagrees with persisted cart, using server figure"
            );
        }

        self.cart_repository.delete_all(owner_id).await?;

        info!("Payment confirmed, total {}", total_amount);
        Ok(total_amount)
    }

    /// Checkout: total the owner's persisted cart from the stored price
    /// snapshots and clear it
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    pub async fn checkout(&self, owner_id: &str) -> ServiceResult<Decimal> {
        info!("Checking out cart");

        self.validate_owner_id(owner_id)?;

        let items = self.cart_repository.find_all(owner_id).await?;
        if items.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        let total_price: Decimal = items.iter().map(|item| item.price()).sum();

        self.cart_repository.delete_all(owner_id).await?;

        info!("Checkout complete, total {}", total_price);
        Ok(total_price)
    }

    fn validate_owner_id(&self, owner_id: &str) -> ServiceResult<()> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::ValidationError {
                message: "Owner ID cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_product_id(&self, product_id: &str) -> ServiceResult<()> {
        if product_id.trim().is_empty() {
            return Err(ServiceError::ValidationError {
                message: "Product ID is required".to_string(),
            });
        }
        Ok(())
    }

    fn validate_quantity(&self, quantity: u32) -> ServiceResult<()> {
        if quantity == 0 {
            return Err(ServiceError::InvalidQuantity { quantity });
        }
        Ok(())
    }
}
