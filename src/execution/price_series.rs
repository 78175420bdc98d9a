use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::Price;

/// Price history for the traded pair plus peak/initial bookkeeping
///
/// Ids grow strictly, so the map's key order is also arrival order.
/// Owned by a gateway; strategies only read it through gateway accessors.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    prices: BTreeMap<u64, Price>,
    last_price_id: u64,
    last_update: Option<DateTime<Utc>>,
    max_price: Price,
    initial_price: Option<Decimal>,
    refresh_interval: Duration,
}

impl PriceSeries {
    /// # Arguments
    /// * `refresh_interval` - Age after which stored prices are considered stale
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            prices: BTreeMap::new(),
            last_price_id: 0,
            last_update: None,
            max_price: Price::zero(),
            initial_price: None,
            refresh_interval,
        }
    }

    /// True when nothing was fetched yet or the last fetch is older than the interval
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_update {
            None => true,
            Some(updated) => {
                let elapsed = (now - updated).to_std().unwrap_or(Duration::ZERO);
                elapsed >= self.refresh_interval
            }
        }
    }

    /// Absorb a batch of candles; only the newest becomes the last price
    ///
    /// Candles older than the last stored id are dropped, the candle sharing the
    /// last id replaces it (the venue repeats the still-forming candle).
    pub fn absorb_candles(&mut self, candles: Vec<Price>, now: DateTime<Utc>) {
        for candle in candles {
            if candle.id < self.last_price_id {
                continue;
            }
            self.last_price_id = candle.id;
            self.prices.insert(candle.id, candle);
        }
        self.last_update = Some(now);
    }

    /// Store a synthetic tick stamped with the current time
    pub fn push_tick(&mut self, close: Decimal, now: DateTime<Utc>) -> u64 {
        let stamp = now.timestamp_micros().max(0) as u64;
        let id = stamp.max(self.last_price_id + 1);
        self.prices.insert(id, Price::tick(id, close, now));
        self.last_price_id = id;
        self.last_update = Some(now);
        id
    }

    /// Latest sample, updating the running peak and the initial price
    pub fn observe(&mut self) -> Option<Price> {
        let current = self.prices.get(&self.last_price_id)?.clone();

        if current.close > self.max_price.close {
            self.max_price = current.clone();
        }
        if self.initial_price.is_none() {
            self.initial_price = Some(current.close);
        }

        Some(current)
    }

    /// Latest stored sample without touching bookkeeping
    pub fn last(&self) -> Option<&Price> {
        self.prices.get(&self.last_price_id)
    }

    pub fn last_price_id(&self) -> u64 {
        self.last_price_id
    }

    pub fn max_price(&self) -> &Price {
        &self.max_price
    }

    pub fn initial_price(&self) -> Option<Decimal> {
        self.initial_price
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
