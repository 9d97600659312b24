use preorder_core::{ItemSpec, OrderId};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/orders`.
#[derive(Debug, Serialize)]
pub(crate) struct CreateOrderRequest<'a> {
    pub reference: OrderId,
    pub game_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_url: Option<&'a str>,
    pub variant_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_index: Option<i32>,
    pub quantity: u32,
}

impl<'a> CreateOrderRequest<'a> {
    pub fn new(reference: OrderId, item: &'a ItemSpec, quantity: u32) -> Self {
        Self {
            reference,
            game_name: &item.game_name,
            game_url: item.game_url.as_deref(),
            variant_name: &item.variant_name,
            variant_index: item.variant_index,
            quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedOrder {
    pub order_id: String,
}

/// One redeemed unit.
#[derive(Debug, Clone, Deserialize)]
pub struct Purchase {
    pub code: String,
    pub serial_number: Option<String>,
    pub transaction_id: Option<String>,
}

/// Error payload returned by the automation service on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ServiceError,
}
