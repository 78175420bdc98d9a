//! Typed venue responses, one schema per action.
//!
//! The live gateway decodes these straight from Kraken JSON; the simulator
//! fabricates the same structures so strategies cannot tell them apart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::UNKNOWN_ORDER;

/// Envelope shared by every venue endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> VenueResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            error: Vec::new(),
            result: Some(result),
        }
    }

    pub fn failed(codes: &[&str]) -> Self {
        Self {
            error: codes.iter().map(|c| c.to_string()).collect(),
            result: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.error.iter().any(|e| e.contains(code))
    }

    pub fn is_unknown_order(&self) -> bool {
        self.has_error(UNKNOWN_ORDER)
    }
}

/// Private endpoints the order transport can be asked to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Add,
    Cancel,
    Edit,
    Query,
}

impl OrderAction {
    pub fn endpoint(&self) -> &'static str {
        match self {
            OrderAction::Add => "AddOrder",
            OrderAction::Cancel => "CancelOrder",
            OrderAction::Edit => "EditOrder",
            OrderAction::Query => "QueryOrders",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderDescription {
    #[serde(default)]
    pub order: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOrderResult {
    #[serde(default)]
    pub descr: OrderDescription,
    #[serde(default)]
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderResult {
    pub count: u32,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditOrderResult {
    pub status: String,
    pub txid: Option<String>,
    pub originaltxid: Option<String>,
    pub price: Option<Decimal>,
    pub orders_cancelled: Option<u32>,
    #[serde(default)]
    pub descr: OrderDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Closed,
    Canceled,
    Expired,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfoDescription {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
    pub price: Decimal,
    #[serde(default)]
    pub order: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub status: OrderStatus,
    #[serde(default)]
    pub opentm: f64,
    pub descr: OrderInfoDescription,
    pub vol: Decimal,
    pub vol_exec: Decimal,
    pub cost: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub price: Decimal,
}

/// `QueryOrders` result is keyed by transaction id
pub type QueryOrdersResult = HashMap<String, OrderInfo>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerInfo {
    /// Ask `[price, whole lot volume, lot volume]`
    pub a: Vec<Decimal>,
    /// Bid `[price, whole lot volume, lot volume]`
    pub b: Vec<Decimal>,
    /// Last trade `[price, lot volume]`
    #[serde(default)]
    pub c: Vec<Decimal>,
}

pub type TickerResult = HashMap<String, TickerInfo>;

/// `[time, open, high, low, close, vwap, volume, count]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcRow(
    pub u64,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub Decimal,
    pub u64,
);

/// The OHLC result mixes the candle array with a `last` cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OhlcField {
    Rows(Vec<OhlcRow>),
    Last(u64),
}

pub type OhlcResult = HashMap<String, OhlcField>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatusResult {
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemStatus {
    Online,
    Maintenance,
    CancelOnly,
    PostOnly,
    Other,
}

impl SystemStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "online" => SystemStatus::Online,
            "maintenance" => SystemStatus::Maintenance,
            "cancel_only" => SystemStatus::CancelOnly,
            "post_only" => SystemStatus::PostOnly,
            _ => SystemStatus::Other,
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemStatus::Online => "online",
            SystemStatus::Maintenance => "maintenance",
            SystemStatus::CancelOnly => "cancel_only",
            SystemStatus::PostOnly => "post_only",
            SystemStatus::Other => "unknown",
        };
        f.write_str(name)
    }
}
