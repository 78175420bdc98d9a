pub mod venue;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use venue::{
    AddOrderResult, CancelOrderResult, EditOrderResult, OhlcRow, OrderAction, OrderInfo,
    OrderStatus, QueryOrdersResult, VenueResponse,
};

/// One observed price sample for the traded pair
///
/// `id` is the history key and must grow strictly between stored samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub vwap: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
    pub observed_at: DateTime<Utc>,
}

impl Price {
    /// Build from a raw OHLC candle
    pub fn from_candle(row: &OhlcRow, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: row.0,
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            vwap: row.5,
            volume: row.6,
            trade_count: row.7,
            observed_at,
        }
    }

    /// Synthetic tick carrying only the instantaneous market price
    pub fn tick(id: u64, close: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            id,
            open: close,
            high: close,
            low: close,
            close,
            vwap: close,
            volume: Decimal::ZERO,
            trade_count: 0,
            observed_at,
        }
    }

    /// Zero sentinel used before any peak has been observed
    pub fn zero() -> Self {
        Self::tick(0, Decimal::ZERO, DateTime::<Utc>::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
    StopLossLimit,
    TakeProfitLimit,
    SettlePosition,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::StopLoss => "stop-loss",
            OrderType::TakeProfit => "take-profit",
            OrderType::StopLossLimit => "stop-loss-limit",
            OrderType::TakeProfitLimit => "take-profit-limit",
            OrderType::SettlePosition => "settle-position",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "market" => Some(OrderType::Market),
            "limit" => Some(OrderType::Limit),
            "stop-loss" => Some(OrderType::StopLoss),
            "take-profit" => Some(OrderType::TakeProfit),
            "stop-loss-limit" => Some(OrderType::StopLossLimit),
            "take-profit-limit" => Some(OrderType::TakeProfitLimit),
            "settle-position" => Some(OrderType::SettlePosition),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price reference the venue uses to fire stop/profit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerBy {
    Last,
    Index,
}

impl TriggerBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerBy::Last => "last",
            TriggerBy::Index => "index",
        }
    }
}

/// Ratchet: once price crosses `threshold`, reprice the order to `replacement`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTrigger {
    pub threshold: Decimal,
    pub replacement: Decimal,
}

/// How eagerly a take-profit waits for a better fill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Greed {
    #[default]
    None,
    /// Hold while price keeps rising tick over tick
    Plain,
    /// Hold while enough of the gain above the take-profit is retained
    Percentage,
}

/// Mutable record of a single venue order
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Option<String>,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: Decimal,
    pub volume: Decimal,
    pub pair: String,
    pub trigger: Option<OrderTrigger>,
    pub trigger_by: Option<TriggerBy>,
    pub trailing_levels: Vec<Decimal>,
    pub greed: Greed,
    pub validate_only: bool,

    pub is_placed: bool,
    pub is_open: bool,
    pub is_closed: bool,
    pub is_canceled: bool,
    pub is_completed: bool,
    pub is_unknown: bool,
    pub is_edited: bool,
    pub has_error: bool,
    pub cost: Option<Decimal>,
}

impl Order {
    pub fn new(
        order_type: OrderType,
        side: OrderSide,
        pair: impl Into<String>,
        price: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            id: None,
            order_type,
            side,
            price,
            volume,
            pair: pair.into(),
            trigger: None,
            trigger_by: None,
            trailing_levels: Vec::new(),
            greed: Greed::None,
            validate_only: false,

            is_placed: false,
            is_open: false,
            is_closed: false,
            is_canceled: false,
            is_completed: false,
            is_unknown: false,
            is_edited: false,
            has_error: false,
            cost: None,
        }
    }

    /// An order that already lives on the venue; details are filled in by `query`
    pub fn existing(id: impl Into<String>, pair: impl Into<String>) -> Self {
        let mut order = Self::new(
            OrderType::StopLoss,
            OrderSide::Sell,
            pair,
            Decimal::ZERO,
            Decimal::ZERO,
        );
        order.id = Some(id.into());
        order.is_placed = true;
        order
    }

    pub fn has_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn id_or_empty(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Stop price the ladder ratchets to next
    pub fn next_trailing_price(&self) -> Option<Decimal> {
        self.trailing_levels.first().copied()
    }

    /// Price at which the next ratchet fires
    pub fn trailing_trigger_price(&self) -> Option<Decimal> {
        self.trailing_levels.get(1).copied()
    }

    /// Human readable summary, e.g. `sell 1 AVAXUSD @ stop-loss 14`
    pub fn describe(&self) -> String {
        match self.order_type {
            OrderType::Market => format!(
                "{} {} {} @ market",
                self.side, self.volume, self.pair
            ),
            _ => format!(
                "{} {} {} @ {} {}",
                self.side, self.volume, self.pair, self.order_type, self.price
            ),
        }
    }

    /// Form parameters for a private endpoint call
    pub fn request_params(&self, action: OrderAction) -> Vec<(&'static str, String)> {
        let txid = self.id_or_empty().to_string();
        match action {
            OrderAction::Cancel | OrderAction::Query => vec![("txid", txid)],
            OrderAction::Edit => vec![
                ("txid", txid),
                ("pair", self.pair.clone()),
                ("price", self.price.to_string()),
                ("volume", self.volume.to_string()),
            ],
            OrderAction::Add => {
                let mut params = vec![
                    ("ordertype", self.order_type.as_str().to_string()),
                    ("pair", self.pair.clone()),
                    ("type", self.side.as_str().to_string()),
                    ("volume", self.volume.to_string()),
                ];
                if self.order_type != OrderType::Market {
                    params.push(("price", self.price.to_string()));
                }
                if let Some(trigger_by) = self.trigger_by {
                    params.push(("trigger", trigger_by.as_str().to_string()));
                }
                if self.validate_only {
                    params.push(("validate", "true".to_string()));
                }
                params
            }
        }
    }

    pub fn record_add(&mut self, response: &VenueResponse<AddOrderResult>) {
        self.has_error = !response.is_ok();
        self.is_placed = !self.has_error;
        if self.is_placed && !self.validate_only {
            self.id = response
                .result
                .as_ref()
                .and_then(|r| r.txid.first().cloned());
        }
    }

    pub fn record_cancel(&mut self, response: &VenueResponse<CancelOrderResult>) {
        self.has_error = !response.is_ok();
        self.is_unknown = response.is_unknown_order();
        let cancelled = response.result.as_ref().is_some_and(|r| r.count == 1);
        self.is_closed = cancelled || self.is_unknown;
    }

    pub fn record_edit(&mut self, response: &VenueResponse<EditOrderResult>) {
        self.is_edited = true;
        let status_ok = response.result.as_ref().is_some_and(|r| r.status == "ok");
        self.has_error = !response.is_ok() || !status_ok;
        self.is_unknown = response.is_unknown_order();
        if !self.is_unknown {
            if let Some(txid) = response.result.as_ref().and_then(|r| r.txid.clone()) {
                self.id = Some(txid);
            }
        }
    }

    /// Refresh status flags; a closed order only counts as completed when fully executed
    pub fn record_query(&mut self, response: &VenueResponse<QueryOrdersResult>) {
        let info = response
            .result
            .as_ref()
            .and_then(|r| r.get(self.id_or_empty()));
        let status = info.map(|i| i.status);

        self.has_error = !response.is_ok();
        self.is_unknown = response.is_unknown_order();
        self.is_open = matches!(status, Some(OrderStatus::Open) | Some(OrderStatus::Pending));
        self.is_closed = status == Some(OrderStatus::Closed);
        self.is_canceled = matches!(
            status,
            Some(OrderStatus::Canceled) | Some(OrderStatus::Expired)
        );
        self.is_completed = false;

        if let (true, Some(info)) = (self.is_closed, info) {
            self.is_completed = info.vol == info.vol_exec;
            if self.is_completed {
                self.cost = Some(info.cost);
            }
        }
    }

    /// Copy price, pair, volume and kind from the venue's view of this order
    pub fn adopt(&mut self, info: &OrderInfo) {
        self.price = info.descr.price;
        self.pair = info.descr.pair.clone();
        self.volume = info.vol;
        if let Some(order_type) = OrderType::parse(&info.descr.ordertype) {
            self.order_type = order_type;
        }
        if let Some(side) = OrderSide::parse(&info.descr.side) {
            self.side = side;
        }
    }
}

/// True when levels are strictly ascending
pub fn levels_are_ascending(levels: &[Decimal]) -> bool {
    levels.windows(2).all(|w| w[0] < w[1])
}
