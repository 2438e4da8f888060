// Repositories module - data access layer

pub mod cart_repository;
pub mod product_repository;

pub use cart_repository::{CartRepository, DynamoDbCartRepository};
pub use product_repository::{DynamoDbProductRepository, ProductRepository};
