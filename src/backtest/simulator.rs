use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::synthetic::MilestoneWalk;
use crate::error::{BotError, Result, UNKNOWN_ORDER};
use crate::execution::confirmation::Confirmation;
use crate::execution::gateway::{log_response, OrderGateway};
use crate::execution::price_series::PriceSeries;
use crate::models::venue::{
    AddOrderResult, CancelOrderResult, EditOrderResult, OrderDescription, OrderInfo,
    OrderInfoDescription, OrderStatus, QueryOrdersResult, SystemStatus, VenueResponse,
};
use crate::models::{Order, OrderSide, OrderType, Price};

const INVALID_VOLUME: &str = "EGeneral:Invalid arguments:volume";

/// An order resting in the simulated book
#[derive(Debug, Clone)]
struct SimulatedOrder {
    order_type: OrderType,
    side: OrderSide,
    price: Decimal,
    volume: Decimal,
    pair: String,
    status: OrderStatus,
    opened_at: f64,
    vol_exec: Decimal,
    cost: Decimal,
    fill_price: Decimal,
}

impl SimulatedOrder {
    fn from_order(order: &Order) -> Self {
        Self {
            order_type: order.order_type,
            side: order.side,
            price: order.price,
            volume: order.volume,
            pair: order.pair.clone(),
            status: OrderStatus::Open,
            opened_at: Utc::now().timestamp() as f64,
            vol_exec: Decimal::ZERO,
            cost: Decimal::ZERO,
            fill_price: Decimal::ZERO,
        }
    }

    /// Whether the order executes against `market`
    fn triggers_at(&self, market: Decimal) -> bool {
        match (self.order_type, self.side) {
            (OrderType::Market, _) => true,
            (OrderType::StopLoss | OrderType::StopLossLimit, OrderSide::Sell) => market <= self.price,
            (OrderType::StopLoss | OrderType::StopLossLimit, OrderSide::Buy) => market >= self.price,
            (OrderType::Limit | OrderType::TakeProfit | OrderType::TakeProfitLimit, OrderSide::Sell) => {
                market >= self.price
            }
            (OrderType::Limit | OrderType::TakeProfit | OrderType::TakeProfitLimit, OrderSide::Buy) => {
                market <= self.price
            }
            (OrderType::SettlePosition, _) => false,
        }
    }

    fn fill(&mut self, market: Decimal) {
        self.status = OrderStatus::Closed;
        self.vol_exec = self.volume;
        self.fill_price = market;
        self.cost = (self.volume * market).round_dp(8);
    }

    fn info(&self) -> OrderInfo {
        OrderInfo {
            status: self.status,
            opentm: self.opened_at,
            descr: OrderInfoDescription {
                pair: self.pair.clone(),
                side: self.side.as_str().to_string(),
                ordertype: self.order_type.as_str().to_string(),
                price: self.price,
                order: self.describe(),
            },
            vol: self.volume,
            vol_exec: self.vol_exec,
            cost: self.cost,
            fee: Decimal::ZERO,
            price: self.fill_price,
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} {} {} @ {} {}",
            self.side, self.volume, self.pair, self.order_type, self.price
        )
    }
}

/// Offline gateway replaying a milestone price walk
///
/// Keeps its own order book and answers with the same typed responses the
/// venue does. Only `current_price` moves the market; queries evaluate fills
/// against the last emitted price.
pub struct SimulatedGateway {
    pair: String,
    walk: MilestoneWalk,
    series: PriceSeries,
    orders: HashMap<String, SimulatedOrder>,
    next_order_id: u64,
    next_price_id: u64,
    status: SystemStatus,
    confirmation: Confirmation,
}

impl SimulatedGateway {
    pub fn new(pair: impl Into<String>, walk: MilestoneWalk) -> Self {
        Self {
            pair: pair.into(),
            walk,
            series: PriceSeries::new(std::time::Duration::ZERO),
            orders: HashMap::new(),
            next_order_id: 1,
            next_price_id: 1,
            status: SystemStatus::Online,
            confirmation: Confirmation::unattended(),
        }
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Simulate the venue switching state, e.g. into maintenance
    pub fn set_system_status(&mut self, status: SystemStatus) {
        self.status = status;
    }

    /// Register an order as already resting in the book under its current id
    pub fn seed_order(&mut self, order: &mut Order) -> String {
        let id = match order.id.clone().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => self.issue_id(),
        };
        self.orders.insert(id.clone(), SimulatedOrder::from_order(order));
        order.id = Some(id.clone());
        order.is_placed = true;
        order.is_open = true;
        id
    }

    /// Number of orders still open in the book
    pub fn open_orders(&self) -> usize {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }

    fn issue_id(&mut self) -> String {
        let id = format!("SIM-{:06}", self.next_order_id);
        self.next_order_id += 1;
        id
    }

    fn market(&self) -> Decimal {
        self.series
            .last()
            .map(|p| p.close)
            .unwrap_or_else(|| self.walk.price())
    }
}

#[async_trait]
impl OrderGateway for SimulatedGateway {
    async fn add(&mut self, order: &mut Order) -> Result<VenueResponse<AddOrderResult>> {
        let market = self.market();
        if !self.confirmation.approve(order, market) {
            return Err(BotError::OrderDeclined);
        }

        let response = if order.volume <= Decimal::ZERO {
            VenueResponse::failed(&[INVALID_VOLUME])
        } else if order.validate_only {
            VenueResponse::ok(AddOrderResult {
                descr: OrderDescription {
                    order: order.describe(),
                },
                txid: Vec::new(),
            })
        } else {
            let id = self.issue_id();
            self.orders.insert(id.clone(), SimulatedOrder::from_order(order));
            VenueResponse::ok(AddOrderResult {
                descr: OrderDescription {
                    order: order.describe(),
                },
                txid: vec![id],
            })
        };

        order.record_add(&response);
        log_response("AddOrder", order, &response);
        Ok(response)
    }

    async fn cancel(&mut self, order: &mut Order) -> Result<VenueResponse<CancelOrderResult>> {
        let response = match self.orders.get_mut(order.id_or_empty()) {
            Some(resting) if resting.status == OrderStatus::Open => {
                resting.status = OrderStatus::Canceled;
                VenueResponse::ok(CancelOrderResult {
                    count: 1,
                    pending: false,
                })
            }
            _ => VenueResponse::failed(&[UNKNOWN_ORDER]),
        };

        order.record_cancel(&response);
        log_response("CancelOrder", order, &response);
        Ok(response)
    }

    async fn edit(&mut self, order: &mut Order) -> Result<VenueResponse<EditOrderResult>> {
        let original = order.id_or_empty().to_string();
        let is_open = self
            .orders
            .get(&original)
            .is_some_and(|o| o.status == OrderStatus::Open);

        let response = if !is_open {
            VenueResponse::failed(&[UNKNOWN_ORDER])
        } else if order.volume <= Decimal::ZERO {
            VenueResponse::failed(&[INVALID_VOLUME])
        } else {
            let mut replacement = self.orders[&original].clone();
            replacement.price = order.price;
            replacement.volume = order.volume;

            if let Some(old) = self.orders.get_mut(&original) {
                old.status = OrderStatus::Canceled;
            }
            let id = self.issue_id();
            let descr = OrderDescription {
                order: replacement.describe(),
            };
            self.orders.insert(id.clone(), replacement);

            VenueResponse::ok(EditOrderResult {
                status: "ok".to_string(),
                txid: Some(id),
                originaltxid: Some(original),
                price: Some(order.price),
                orders_cancelled: Some(1),
                descr,
            })
        };

        order.record_edit(&response);
        log_response("EditOrder", order, &response);
        Ok(response)
    }

    async fn query(&mut self, order: &mut Order) -> Result<VenueResponse<QueryOrdersResult>> {
        let market = self.market();
        let id = order.id_or_empty().to_string();

        let response = match self.orders.get_mut(&id) {
            Some(resting) => {
                if resting.status == OrderStatus::Open && resting.triggers_at(market) {
                    resting.fill(market);
                    tracing::info!(order_id = %id, price = %market, "Simulated fill");
                }
                let mut result = QueryOrdersResult::new();
                result.insert(id, resting.info());
                VenueResponse::ok(result)
            }
            None => VenueResponse::failed(&[UNKNOWN_ORDER]),
        };

        order.record_query(&response);
        log_response("QueryOrders", order, &response);
        Ok(response)
    }

    async fn current_price(&mut self) -> Result<Price> {
        let now = Utc::now();
        let close = self
            .walk
            .next()
            .ok_or_else(|| BotError::NoPrice(self.pair.clone()))?;

        let id = self.next_price_id;
        self.next_price_id += 1;
        self.series.absorb_candles(vec![Price::tick(id, close, now)], now);

        self.series
            .observe()
            .ok_or_else(|| BotError::NoPrice(self.pair.clone()))
    }

    async fn system_status(&mut self) -> Result<SystemStatus> {
        Ok(self.status)
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

    fn is_simulated(&self) -> bool {
        true
    }
}
