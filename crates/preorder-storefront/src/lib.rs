//! `PurchaseEngine` backed by an external storefront automation service.

pub mod client;
pub mod engine;
pub mod error;
pub(crate) mod retry;
pub mod types;

pub use client::{ClientOptions, StorefrontClient};
pub use engine::StorefrontEngine;
pub use error::{StorefrontError, PURCHASE_FAILED};
pub use types::{Purchase, ServiceError};
