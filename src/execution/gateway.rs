use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{BotError, Result};
use crate::models::venue::{
    AddOrderResult, CancelOrderResult, EditOrderResult, QueryOrdersResult, SystemStatus,
    VenueResponse,
};
use crate::models::{Order, Price};

/// Everything a strategy may ask of a venue
///
/// Implemented by the live Kraken gateway and by the simulator; both mutate
/// the passed order through the same `Order::record_*` handlers so the flags a
/// strategy sees mean the same thing on either backend.
#[async_trait]
pub trait OrderGateway: Send {
    /// Submit a new order; needs operator approval inside the startup window
    async fn add(&mut self, order: &mut Order) -> Result<VenueResponse<AddOrderResult>>;

    async fn cancel(&mut self, order: &mut Order) -> Result<VenueResponse<CancelOrderResult>>;

    /// Reprice an existing order to `order.price` / `order.volume`
    async fn edit(&mut self, order: &mut Order) -> Result<VenueResponse<EditOrderResult>>;

    async fn query(&mut self, order: &mut Order) -> Result<VenueResponse<QueryOrdersResult>>;

    /// Latest price, refreshing the series when it went stale
    async fn current_price(&mut self) -> Result<Price>;

    async fn system_status(&mut self) -> Result<SystemStatus>;

    /// Last stored price without refreshing
    fn last_price(&self) -> Option<&Price>;

    /// Highest close seen this run
    fn max_price(&self) -> &Price;

    fn initial_price(&self) -> Option<Decimal>;

    fn pair(&self) -> &str;

    fn is_simulated(&self) -> bool {
        false
    }
}

/// Fail with a recoverable error unless the venue accepts orders
pub async fn ensure_online<G: OrderGateway + ?Sized>(gateway: &mut G) -> Result<()> {
    match gateway.system_status().await? {
        SystemStatus::Online => Ok(()),
        status => Err(BotError::SystemStatus(status)),
    }
}

/// Log a venue response the way the durable log expects it
pub(crate) fn log_response<T: std::fmt::Debug>(
    action: &str,
    order: &Order,
    response: &VenueResponse<T>,
) {
    if response.is_ok() {
        tracing::info!(
            action,
            order_id = %order.id_or_empty(),
            result = ?response.result,
            "{} {}",
            action,
            order.describe()
        );
    } else {
        tracing::warn!(
            action,
            order_id = %order.id_or_empty(),
            errors = ?response.error,
            "{} {} failed",
            action,
            order.describe()
        );
    }
}
