use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;

use super::confirmation::Confirmation;
use super::gateway::{log_response, OrderGateway};
use super::price_series::PriceSeries;
use crate::api::kraken::{pair_entry, KrakenClient};
use crate::error::{BotError, Result};
use crate::models::venue::{
    AddOrderResult, CancelOrderResult, EditOrderResult, OhlcField, OrderAction,
    QueryOrdersResult, SystemStatus, VenueResponse,
};
use crate::models::{Order, Price};

/// Gateway backed by the real Kraken venue
pub struct LiveGateway {
    client: KrakenClient,
    pair: String,
    use_market_price: bool,
    series: PriceSeries,
    confirmation: Confirmation,
    rate_limit_cooldown: Duration,
}

impl LiveGateway {
    /// # Arguments
    /// * `use_market_price` - Poll the ticker instead of OHLC candles
    /// * `refresh_interval` - Age after which the price series is refetched
    /// * `rate_limit_cooldown` - Pause after a "too many requests" answer
    pub fn new(
        client: KrakenClient,
        pair: impl Into<String>,
        use_market_price: bool,
        refresh_interval: Duration,
        rate_limit_cooldown: Duration,
        confirmation: Confirmation,
    ) -> Self {
        Self {
            client,
            pair: pair.into(),
            use_market_price,
            series: PriceSeries::new(refresh_interval),
            confirmation,
            rate_limit_cooldown,
        }
    }

    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    async fn refresh_prices(&mut self) -> Result<()> {
        let now = Utc::now();

        if self.use_market_price {
            let response = self.client.ticker(&self.pair).await?;
            let result = self.accept(response).await?;
            let bid = pair_entry(&result, &self.pair)
                .and_then(|ticker| ticker.b.first().copied())
                .ok_or_else(|| BotError::NoPrice(self.pair.clone()))?;
            self.series.push_tick(bid, now);
        } else {
            let since = self.series.last_price_id();
            let response = self.client.ohlc(&self.pair, since).await?;
            let result = self.accept(response).await?;
            let candles = match pair_entry(&result, &self.pair) {
                Some(OhlcField::Rows(rows)) => rows
                    .iter()
                    .map(|row| Price::from_candle(row, now))
                    .collect::<Vec<_>>(),
                _ => return Err(BotError::NoPrice(self.pair.clone())),
            };
            tracing::debug!(pair = %self.pair, since, count = candles.len(), "Fetched candles");
            self.series.absorb_candles(candles, now);
        }

        Ok(())
    }

    /// Unwrap a quote response, cooling down when the venue throttles us
    async fn accept<T>(&self, response: VenueResponse<T>) -> Result<T> {
        if !response.is_ok() {
            for code in &response.error {
                tracing::error!(pair = %self.pair, "Price request failed: {}", code);
            }
            let err = BotError::Venue(response.error);
            if err.is_rate_limited() {
                tracing::warn!(
                    "Rate limited by venue, cooling down for {}s",
                    self.rate_limit_cooldown.as_secs()
                );
                sleep(self.rate_limit_cooldown).await;
            }
            return Err(err);
        }
        response
            .result
            .ok_or_else(|| BotError::NoPrice(self.pair.clone()))
    }

    async fn market_price(&mut self) -> Result<Decimal> {
        match self.series.last() {
            Some(price) => Ok(price.close),
            None => Ok(self.current_price().await?.close),
        }
    }
}

#[async_trait]
impl OrderGateway for LiveGateway {
    async fn add(&mut self, order: &mut Order) -> Result<VenueResponse<AddOrderResult>> {
        let market = self.market_price().await?;
        if !self.confirmation.approve(order, market) {
            return Err(BotError::OrderDeclined);
        }

        let response = self
            .client
            .submit(OrderAction::Add, &order.request_params(OrderAction::Add))
            .await?;
        order.record_add(&response);
        log_response("AddOrder", order, &response);
        Ok(response)
    }

    async fn cancel(&mut self, order: &mut Order) -> Result<VenueResponse<CancelOrderResult>> {
        let response = self
            .client
            .submit(OrderAction::Cancel, &order.request_params(OrderAction::Cancel))
            .await?;
        order.record_cancel(&response);
        log_response("CancelOrder", order, &response);
        Ok(response)
    }

    async fn edit(&mut self, order: &mut Order) -> Result<VenueResponse<EditOrderResult>> {
        let params = order.request_params(OrderAction::Edit);
        let response = self.client.submit(OrderAction::Edit, &params).await?;
        order.record_edit(&response);
        log_response("EditOrder", order, &response);
        Ok(response)
    }

    async fn query(&mut self, order: &mut Order) -> Result<VenueResponse<QueryOrdersResult>> {
        let response = self
            .client
            .submit(OrderAction::Query, &order.request_params(OrderAction::Query))
            .await?;
        order.record_query(&response);
        log_response("QueryOrders", order, &response);
        Ok(response)
    }

    async fn current_price(&mut self) -> Result<Price> {
        if self.series.needs_refresh(Utc::now()) {
            self.refresh_prices().await?;
        }
        self.series
            .observe()
            .ok_or_else(|| BotError::NoPrice(self.pair.clone()))
    }

    async fn system_status(&mut self) -> Result<SystemStatus> {
        let response = self.client.system_status().await?;
        Ok(response
            .result
            .map(|r| SystemStatus::parse(&r.status))
            .unwrap_or(SystemStatus::Other))
    }

    fn last_price(&self) -> Option<&Price> {
        self.series.last()
    }

    fn max_price(&self) -> &Price {
        self.series.max_price()
    }

    fn initial_price(&self) -> Option<Decimal> {
        self.series.initial_price()
    }

    fn pair(&self) -> &str {
        &self.pair
    }
}
