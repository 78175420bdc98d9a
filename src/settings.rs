//! Operation file loading and validation.
//!
//! Sources (lowest to highest precedence):
//! 1. the operation JSON file (`operation.json` by default)
//! 2. environment variables prefixed with `ORDERBOT__`, e.g. `ORDERBOT__INTERVAL=12`
//!
//! Raw serde structs mirror the file; [`Settings`] is the validated, typed view
//! handed to constructors. Multi-word keys carry a lowercase alias because the
//! config crate may fold key case.

use ::config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::execution::scheduler::{DEFAULT_SIMULATION_INTERVAL, MIN_LIVE_INTERVAL};
use crate::models::{levels_are_ascending, Greed, Order, OrderSide, OrderTrigger, OrderType, TriggerBy};
use crate::strategy::oco::DEFAULT_MAX_FLAT_TICKS;
use crate::strategy::{
    GainRetentionPolicy, OneCancelsTheOther, Operation, RetentionBand, Strategy, TrailingStopLoss,
};

/// Oldest operation file layout still understood
pub const MIN_SUPPORTED_VERSION: Decimal = dec!(1.3);

/// Take-profit must clear the stop-loss by more than this fraction
const MIN_SPREAD: Decimal = dec!(0.006);

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_LIMIT_SECS: u64 = 10;
const DEFAULT_SYSTEM_STATUS_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    version: Option<Decimal>,
    interval: Option<u64>,
    timeout: Option<u64>,
    /// Only valid inside `operation`; kept here to reject misplaced values
    #[serde(alias = "startprice")]
    start_price: Option<Decimal>,
    operation: RawOperation,
    retention: Option<RawRetention>,
    #[serde(alias = "maxflatticks")]
    max_flat_ticks: Option<u32>,
    #[serde(default)]
    cooldowns: RawCooldowns,
    simulation: Option<RawSimulation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    pair: Option<String>,
    #[serde(rename = "type")]
    kind: StrategyKind,
    #[serde(default, alias = "usemarketprice")]
    use_market_price: bool,
    #[serde(alias = "startprice")]
    start_price: Option<Decimal>,
    #[serde(alias = "startvolume")]
    start_volume: Option<Decimal>,
    #[serde(default, alias = "cancelorders")]
    cancel_orders: Vec<String>,
    stoploss: RawStopLoss,
    takeprofit: Option<RawTakeProfit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStopLoss {
    id: Option<String>,
    price: Option<Decimal>,
    volume: Option<Decimal>,
    trigger: Option<RawTrigger>,
    #[serde(alias = "triggerby")]
    trigger_by: Option<TriggerBy>,
    trailing: Option<Vec<Decimal>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTakeProfit {
    price: Option<Decimal>,
    volume: Option<Decimal>,
    #[serde(default)]
    greedy: bool,
    #[serde(default, alias = "plaingreed")]
    plain_greed: bool,
    trigger: Option<RawTrigger>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrigger {
    price: Decimal,
    #[serde(alias = "newprice")]
    new_price: Decimal,
}

impl From<RawTrigger> for OrderTrigger {
    fn from(raw: RawTrigger) -> Self {
        OrderTrigger {
            threshold: raw.price,
            replacement: raw.new_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawRetention {
    bands: Vec<RawBand>,
    otherwise: Decimal,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct RawBand {
    minutes: i64,
    /// Percent of the gain to keep, 0..=100
    percent: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCooldowns {
    #[serde(alias = "ratelimitseconds")]
    rate_limit_seconds: Option<u64>,
    #[serde(alias = "systemstatusseconds")]
    system_status_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSimulation {
    milestones: Vec<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StrategyKind {
    OneCancelsTheOther,
    TrailingStopLoss,
}

/// Orders the strategy starts from
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    pub kind: StrategyKind,
    pub stop_loss: Order,
    /// Present for one-cancels-the-other only
    pub take_profit: Option<Order>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    pub rate_limit: Duration,
    pub system_status: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
    pub milestones: Vec<Decimal>,
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub pair: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub use_market_price: bool,
    pub start_price: Option<Decimal>,
    pub start_volume: Option<Decimal>,
    pub cancel_orders: Vec<String>,
    pub strategy: StrategyDescriptor,
    pub retention: GainRetentionPolicy,
    pub max_flat_ticks: u32,
    pub cooldowns: Cooldowns,
    pub simulation: Option<SimulationSettings>,
}

impl Settings {
    /// Load from a JSON file merged with `ORDERBOT__*` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Json).required(true))
            .add_source(
                Environment::with_prefix("ORDERBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?;
        Self::from_config(config)
    }

    /// Parse an in-memory JSON document, no environment overrides
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = config.try_deserialize()?;
        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let op = raw.operation;

        let pair = op
            .pair
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_uppercase)
            .ok_or_else(|| invalid("pair is missing. Please specify pair e.g. \"BTCUSD\""))?;

        if raw.start_price.is_some() {
            return Err(invalid("start price was declared at the wrong level; move it under \"operation\""));
        }

        if let Some(version) = raw.version {
            if version < MIN_SUPPORTED_VERSION {
                return Err(invalid(format!(
                    "operation file version {} is no longer supported; the oldest supported version is {}",
                    version, MIN_SUPPORTED_VERSION
                )));
            }
        }

        let is_simulation = raw.simulation.is_some();
        let interval = match raw.interval {
            Some(secs) if is_simulation => Duration::from_secs(secs),
            Some(secs) => Duration::from_secs(secs).max(MIN_LIVE_INTERVAL),
            None if is_simulation => DEFAULT_SIMULATION_INTERVAL,
            None => MIN_LIVE_INTERVAL,
        };

        let stop_loss = build_stop_loss(&op.stoploss, &pair, op.kind)?;
        let take_profit = match op.kind {
            StrategyKind::OneCancelsTheOther => {
                let raw_tp = op
                    .takeprofit
                    .as_ref()
                    .ok_or_else(|| invalid("price is mandatory for your takeprofit order"))?;
                Some(build_take_profit(raw_tp, &stop_loss, &pair)?)
            }
            StrategyKind::TrailingStopLoss => None,
        };

        if let (Some(tp), true) = (&take_profit, op.stoploss.price.is_some()) {
            if tp.price <= stop_loss.price + stop_loss.price * MIN_SPREAD {
                return Err(invalid(
                    "make sure takeprofit and stoploss prices are correct and the values are not too close",
                ));
            }
        }

        if let Some(start_volume) = op.start_volume {
            let exceeds_stop = op.stoploss.volume.is_some() && start_volume < stop_loss.volume;
            let exceeds_take = take_profit.as_ref().is_some_and(|tp| start_volume < tp.volume);
            if exceeds_stop || exceeds_take {
                return Err(invalid(
                    "you can't sell more than the start volume; check start volume, takeprofit and stoploss orders",
                ));
            }
        }

        let simulation = match raw.simulation {
            Some(sim) if sim.milestones.len() < 2 => {
                return Err(invalid("simulation milestones must contain at least two prices"))
            }
            Some(sim) => Some(SimulationSettings {
                milestones: sim.milestones,
            }),
            None => None,
        };

        let retention = match raw.retention {
            Some(table) => {
                let bands = table
                    .bands
                    .iter()
                    .map(|b| RetentionBand::new(b.minutes, b.percent / Decimal::ONE_HUNDRED))
                    .collect();
                GainRetentionPolicy::new(bands, table.otherwise / Decimal::ONE_HUNDRED)
            }
            None => GainRetentionPolicy::defaults_for(op.use_market_price),
        };

        Ok(Self {
            pair,
            interval,
            timeout: Duration::from_secs(raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            use_market_price: op.use_market_price,
            start_price: op.start_price,
            start_volume: op.start_volume,
            cancel_orders: op.cancel_orders,
            strategy: StrategyDescriptor {
                kind: op.kind,
                stop_loss,
                take_profit,
            },
            retention,
            max_flat_ticks: raw.max_flat_ticks.unwrap_or(DEFAULT_MAX_FLAT_TICKS),
            cooldowns: Cooldowns {
                rate_limit: Duration::from_secs(
                    raw.cooldowns.rate_limit_seconds.unwrap_or(DEFAULT_RATE_LIMIT_SECS),
                ),
                system_status: Duration::from_secs(
                    raw.cooldowns
                        .system_status_seconds
                        .unwrap_or(DEFAULT_SYSTEM_STATUS_SECS),
                ),
            },
            simulation,
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.simulation.is_some()
    }

    /// Build the operation this configuration describes
    pub fn operation(&self) -> Operation {
        let descriptor = &self.strategy;
        let strategy = match (descriptor.kind, &descriptor.take_profit) {
            (StrategyKind::OneCancelsTheOther, Some(take_profit)) => Strategy::OneCancelsTheOther(
                OneCancelsTheOther::new(descriptor.stop_loss.clone(), take_profit.clone())
                    .with_retention(self.retention.clone())
                    .with_max_flat_ticks(self.max_flat_ticks),
            ),
            _ => Strategy::TrailingStopLoss(TrailingStopLoss::new(descriptor.stop_loss.clone())),
        };

        Operation::new(strategy)
            .with_start_price(self.start_price)
            .with_cancel_orders(self.cancel_orders.clone())
            .with_system_status_cooldown(self.cooldowns.system_status)
    }
}

fn build_stop_loss(raw: &RawStopLoss, pair: &str, kind: StrategyKind) -> Result<Order, ConfigError> {
    let mut order = match (raw.id.as_deref().map(str::trim), raw.price, raw.volume) {
        (Some(id), _, _) if !id.is_empty() => {
            let mut order = Order::existing(id, pair);
            // an adopted order keeps any locally known details until queried
            order.price = raw.price.unwrap_or_default();
            order.volume = raw.volume.unwrap_or_default();
            order
        }
        (_, Some(price), Some(volume)) => {
            Order::new(OrderType::StopLoss, OrderSide::Sell, pair, price, volume)
        }
        _ => return Err(invalid("price and volume are mandatory for creating a new stoploss order")),
    };

    order.trigger = raw.trigger.map(OrderTrigger::from);
    order.trigger_by = raw.trigger_by;

    match (&raw.trailing, kind) {
        (Some(levels), _) => {
            if levels.len() < 2 || !levels_are_ascending(levels) {
                return Err(invalid("trailing levels must include two or more prices, sorted ascending"));
            }
            order.trailing_levels = levels.clone();
        }
        (None, StrategyKind::TrailingStopLoss) => {
            return Err(invalid("trailing levels are mandatory for trailing stoploss operations"));
        }
        (None, StrategyKind::OneCancelsTheOther) => {}
    }

    Ok(order)
}

fn build_take_profit(raw: &RawTakeProfit, stop_loss: &Order, pair: &str) -> Result<Order, ConfigError> {
    let price = raw
        .price
        .ok_or_else(|| invalid("price is mandatory for your takeprofit order"))?;
    let volume = match raw.volume {
        Some(volume) => volume,
        None if stop_loss.volume > Decimal::ZERO => stop_loss.volume,
        None => {
            return Err(invalid(
                "takeprofit volume is mandatory unless stoploss specifies one",
            ))
        }
    };

    let mut order = Order::new(OrderType::Market, OrderSide::Sell, pair, price, volume);
    order.greed = if raw.plain_greed {
        Greed::Plain
    } else if raw.greedy {
        Greed::Percentage
    } else {
        Greed::None
    };
    order.trigger = raw.trigger.map(OrderTrigger::from);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCO: &str = r#"{
        "version": 1.3,
        "interval": 10,
        "timeout": 30,
        "operation": {
            "pair": "avaxusd",
            "type": "OneCancelsTheOther",
            "startVolume": 5,
            "cancelOrders": ["OLD-1"],
            "stoploss": { "price": 14, "volume": 2, "trigger": { "price": 15.2, "newPrice": 14.8 } },
            "takeprofit": { "price": 16, "plainGreed": true }
        }
    }"#;

    #[test]
    fn test_load_oco() {
        let settings = Settings::from_json(OCO).unwrap();

        assert_eq!(settings.pair, "AVAXUSD");
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.cancel_orders, vec!["OLD-1".to_string()]);
        assert_eq!(settings.max_flat_ticks, 3);
        assert_eq!(settings.cooldowns.rate_limit, Duration::from_secs(10));
        assert_eq!(settings.cooldowns.system_status, Duration::from_secs(20));
        assert!(!settings.is_simulated());

        let descriptor = &settings.strategy;
        assert_eq!(descriptor.kind, StrategyKind::OneCancelsTheOther);
        assert_eq!(descriptor.stop_loss.price, dec!(14));
        assert_eq!(
            descriptor.stop_loss.trigger,
            Some(OrderTrigger {
                threshold: dec!(15.2),
                replacement: dec!(14.8)
            })
        );

        let take_profit = descriptor.take_profit.as_ref().unwrap();
        assert_eq!(take_profit.order_type, OrderType::Market);
        assert_eq!(take_profit.volume, dec!(2));
        assert_eq!(take_profit.greed, Greed::Plain);
    }

    #[test]
    fn test_live_interval_has_floor() {
        let json = OCO.replace("\"interval\": 10", "\"interval\": 2");
        let settings = Settings::from_json(&json).unwrap();
        assert_eq!(settings.interval, MIN_LIVE_INTERVAL);
    }

    #[test]
    fn test_simulation_defaults_and_milestones() {
        let json = r#"{
            "operation": {
                "pair": "AVAXUSD",
                "type": "TrailingStopLoss",
                "stoploss": { "price": 13.5, "volume": 2, "trailing": [14.0, 14.5] }
            },
            "simulation": { "milestones": [14, 16, 13] }
        }"#;
        let settings = Settings::from_json(json).unwrap();

        assert!(settings.is_simulated());
        assert_eq!(settings.interval, DEFAULT_SIMULATION_INTERVAL);
        assert_eq!(settings.strategy.stop_loss.trailing_levels, vec![dec!(14.0), dec!(14.5)]);
        assert!(settings.strategy.take_profit.is_none());
        assert!(matches!(
            settings.operation().strategy(),
            Strategy::TrailingStopLoss(_)
        ));
    }

    #[test]
    fn test_existing_stop_loss_by_id() {
        let json = r#"{
            "operation": {
                "pair": "AVAXUSD",
                "type": "OneCancelsTheOther",
                "stoploss": { "id": " OABC-123 " },
                "takeprofit": { "price": 16, "volume": 2, "greedy": true }
            }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        let stop_loss = &settings.strategy.stop_loss;

        assert_eq!(stop_loss.id.as_deref(), Some("OABC-123"));
        assert!(stop_loss.is_placed);
        assert_eq!(
            settings.strategy.take_profit.as_ref().unwrap().greed,
            Greed::Percentage
        );
    }

    #[test]
    fn test_custom_retention_table() {
        let json = OCO.replace(
            "\"timeout\": 30,",
            "\"timeout\": 30, \"retention\": { \"bands\": [ { \"minutes\": 2, \"percent\": 10 } ], \"otherwise\": 90 },",
        );
        let settings = Settings::from_json(&json).unwrap();

        assert_eq!(settings.retention.fraction(chrono::Duration::minutes(1)), dec!(0.1));
        assert_eq!(settings.retention.fraction(chrono::Duration::minutes(4)), dec!(0.9));
    }

    fn rejects(json: &str, needle: &str) {
        match Settings::from_json(json) {
            Err(ConfigError::Invalid(message)) => {
                assert!(message.contains(needle), "unexpected message: {}", message)
            }
            other => panic!("expected validation error, got {:?}", other.map(|s| s.pair)),
        }
    }

    #[test]
    fn test_validation_errors() {
        rejects(&OCO.replace("\"pair\": \"avaxusd\",", ""), "pair is missing");
        rejects(&OCO.replace("\"version\": 1.3", "\"version\": 1.2"), "no longer supported");
        rejects(
            &OCO.replace("\"version\": 1.3,", "\"version\": 1.3, \"startPrice\": 15,"),
            "wrong level",
        );
        rejects(&OCO.replace("\"price\": 16,", "\"price\": 14.05,"), "too close");
        rejects(&OCO.replace("\"startVolume\": 5", "\"startVolume\": 1"), "start volume");
        rejects(&OCO.replace("\"price\": 14, \"volume\": 2,", ""), "mandatory");
    }

    #[test]
    fn test_trailing_levels_validation() {
        let base = r#"{
            "operation": {
                "pair": "AVAXUSD",
                "type": "TrailingStopLoss",
                "stoploss": { "price": 13.5, "volume": 2 LEVELS }
            }
        }"#;
        rejects(&base.replace("LEVELS", ""), "mandatory");
        rejects(&base.replace("LEVELS", ", \"trailing\": [14.5]"), "two or more");
        rejects(&base.replace("LEVELS", ", \"trailing\": [14.5, 14.0]"), "sorted ascending");
    }

    #[test]
    fn test_simulation_needs_two_milestones() {
        let json = OCO.replace("\"timeout\": 30,", "\"timeout\": 30, \"simulation\": { \"milestones\": [15] },");
        rejects(&json, "at least two");
    }
}
