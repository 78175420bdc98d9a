use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::retention::GainRetentionPolicy;
use crate::display;
use crate::error::Result;
use crate::execution::gateway::{ensure_online, OrderGateway};
use crate::models::{Greed, Order, Price};

/// Unchanged-price streak a plain-greedy take-profit tolerates
pub const DEFAULT_MAX_FLAT_TICKS: u32 = 3;

/// One-cancels-the-other: a resting stop-loss paired with a take-profit
///
/// The take-profit is not placed on the venue upfront. When price reaches it
/// the stop-loss is cancelled first and only then the take-profit (a market
/// sell) goes out, so the position is never double-sold.
#[derive(Debug, Clone)]
pub struct OneCancelsTheOther {
    stop_loss: Order,
    take_profit: Order,
    retention: GainRetentionPolicy,
    max_flat_ticks: u32,
    missed_greed_window: bool,
    flat_ticks: u32,
    /// Close of the sample seen before the latest one
    previous_close: Option<Decimal>,
    /// Identity of the latest sample; re-reads of a cached price share it
    last_sample: Option<(u64, DateTime<Utc>, Decimal)>,
    tasks_completed: bool,
    percentage_done: i64,
}

impl OneCancelsTheOther {
    pub fn new(stop_loss: Order, take_profit: Order) -> Self {
        Self {
            stop_loss,
            take_profit,
            retention: GainRetentionPolicy::default(),
            max_flat_ticks: DEFAULT_MAX_FLAT_TICKS,
            missed_greed_window: false,
            flat_ticks: 0,
            previous_close: None,
            last_sample: None,
            tasks_completed: false,
            percentage_done: 0,
        }
    }

    pub fn with_retention(mut self, retention: GainRetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_flat_ticks(mut self, max_flat_ticks: u32) -> Self {
        self.max_flat_ticks = max_flat_ticks;
        self
    }

    pub fn stop_loss(&self) -> &Order {
        &self.stop_loss
    }

    pub fn stop_loss_mut(&mut self) -> &mut Order {
        &mut self.stop_loss
    }

    pub fn take_profit(&self) -> &Order {
        &self.take_profit
    }

    pub fn tasks_completed(&self) -> bool {
        self.tasks_completed
    }

    pub fn percentage_done(&self) -> i64 {
        self.percentage_done
    }

    /// Take-profit is out and we are only waiting for its fill
    pub fn awaiting_fill(&self) -> bool {
        self.take_profit.is_placed && !self.take_profit.is_completed
    }

    pub fn missed_greed_window(&self) -> bool {
        self.missed_greed_window
    }

    pub async fn step<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        let price = gateway.current_price().await?;
        let peak = gateway.max_price().clone();
        let close = price.close;

        let missed = peak.close > Decimal::ZERO && close < self.take_profit.price;
        let was_above = self
            .last_sample
            .is_some_and(|(_, _, last)| last >= self.take_profit.price);
        if missed && was_above {
            tracing::info!(pair = %gateway.pair(), "Price fell back below take-profit after reaching it");
        }
        self.missed_greed_window = missed;

        self.percentage_done = display::percentage_done(close, self.stop_loss.price, self.take_profit.price);
        tracing::info!("{}", display::progress_line(gateway.pair(), self.percentage_done, close));

        self.track_sample(&price);
        let hold = self.holds_for_better_price(&price, &peak);

        if self.take_profit.is_placed {
            self.await_take_profit(gateway).await
        } else if close >= self.take_profit.price && !hold {
            self.take_profit_now(gateway).await
        } else if close < self.stop_loss.price {
            gateway.query(&mut self.stop_loss).await?;
            if self.stop_loss.is_completed {
                tracing::info!(
                    "Stop-loss order was triggered by price. Received: {}{}",
                    display::currency_symbol(gateway.pair()),
                    self.stop_loss.cost.unwrap_or_default()
                );
                self.tasks_completed = true;
            }
            Ok(())
        } else if self
            .stop_loss
            .trigger
            .is_some_and(|t| close >= t.threshold)
        {
            reprice(gateway, &mut self.stop_loss).await?;
            if self.stop_loss.trigger.is_none() {
                tracing::info!("Increased stop-loss price to {}", self.stop_loss.price);
            }
            Ok(())
        } else if self
            .take_profit
            .trigger
            .is_some_and(|t| close <= t.threshold)
        {
            reprice(gateway, &mut self.take_profit).await?;
            if self.take_profit.trigger.is_none() {
                tracing::info!("Reduced take-profit price to {}", self.take_profit.price);
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Advance the flat streak once per new sample
    ///
    /// The gateway hands back its cached price until the series goes stale, so
    /// a poll that sees the same sample again leaves the streak untouched.
    fn track_sample(&mut self, price: &Price) {
        let sample = (price.id, price.observed_at, price.close);
        match self.last_sample {
            Some(last) if last == sample => return,
            Some((_, _, close)) => {
                if close == price.close {
                    self.flat_ticks += 1;
                } else {
                    self.flat_ticks = 0;
                }
                self.previous_close = Some(close);
            }
            None => {}
        }
        self.last_sample = Some(sample);
    }

    /// Whether to let price keep running instead of taking profit right now
    fn holds_for_better_price(&self, price: &Price, peak: &Price) -> bool {
        match self.take_profit.greed {
            Greed::Plain => {
                self.previous_close.is_some_and(|prev| price.close >= prev)
                    && self.flat_ticks <= self.max_flat_ticks
                    && !self.missed_greed_window
            }
            Greed::Percentage => self.retention.retains_enough_gain(
                price.close,
                self.take_profit.price,
                peak.close,
                price.observed_at - peak.observed_at,
            ),
            Greed::None => false,
        }
    }

    async fn take_profit_now<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        ensure_online(gateway).await?;

        if !self.stop_loss.is_closed {
            gateway.cancel(&mut self.stop_loss).await?;
            if self.stop_loss.is_unknown {
                tracing::error!(
                    order_id = %self.stop_loss.id_or_empty(),
                    "Stop-loss order was triggered by price or cancelled by user"
                );
                self.tasks_completed = true;
                return Ok(());
            }
            if self.stop_loss.has_error {
                tracing::error!(order_id = %self.stop_loss.id_or_empty(), "Unable to cancel stop-loss order");
            } else {
                tracing::info!(order_id = %self.stop_loss.id_or_empty(), "Cancelled stop-loss order");
            }
        }

        if self.stop_loss.is_closed && !self.take_profit.is_placed {
            gateway.add(&mut self.take_profit).await?;
            if self.take_profit.has_error {
                tracing::error!("Unable to create new take-profit order");
            }
        }
        Ok(())
    }

    async fn await_take_profit<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        gateway.query(&mut self.take_profit).await?;

        if self.take_profit.is_completed {
            tracing::info!(
                "SUCCESS: Take profit executed. Received: {}{}",
                display::currency_symbol(gateway.pair()),
                self.take_profit.cost.unwrap_or_default()
            );
            self.tasks_completed = true;
        } else if self.take_profit.is_canceled || self.take_profit.is_unknown {
            tracing::error!(
                order_id = %self.take_profit.id_or_empty(),
                "Take-profit order disappeared before filling"
            );
            self.tasks_completed = true;
        } else {
            tracing::info!("Take profit order not yet completed. Please wait...");
        }
        Ok(())
    }
}

/// Move an order to its trigger's replacement price
///
/// Orders still unknown to the venue are repriced locally. The trigger is only
/// consumed when the edit went through; otherwise the old price is restored.
async fn reprice<G: OrderGateway + ?Sized>(gateway: &mut G, order: &mut Order) -> Result<()> {
    let Some(trigger) = order.trigger else {
        return Ok(());
    };
    let previous = order.price;
    order.price = trigger.replacement;

    if order.has_id() {
        match gateway.edit(order).await {
            Ok(_) if !order.has_error => {}
            Ok(_) => {
                order.price = previous;
                return Ok(());
            }
            Err(err) => {
                order.price = previous;
                return Err(err);
            }
        }
    }

    order.trigger = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::MilestoneWalk;
    use crate::api::{Credentials, KrakenClient};
    use crate::backtest::SimulatedGateway;
    use crate::execution::{Confirmation, LiveGateway};
    use crate::models::{OrderSide, OrderTrigger, OrderType};
    use chrono::{Duration, Utc};
    use mockito::{Matcher, Server};
    use rust_decimal_macros::dec;

    fn orders(greed: Greed) -> (Order, Order) {
        let stop_loss = Order::new(OrderType::StopLoss, OrderSide::Sell, "AVAXUSD", dec!(14), dec!(2));
        let mut take_profit = Order::new(OrderType::Market, OrderSide::Sell, "AVAXUSD", dec!(16), dec!(2));
        take_profit.greed = greed;
        (stop_loss, take_profit)
    }

    async fn placed(gw: &mut SimulatedGateway, greed: Greed) -> OneCancelsTheOther {
        let (mut stop_loss, take_profit) = orders(greed);
        gw.add(&mut stop_loss).await.unwrap();
        OneCancelsTheOther::new(stop_loss, take_profit)
    }

    fn gateway(milestones: Vec<Decimal>) -> SimulatedGateway {
        SimulatedGateway::new("AVAXUSD", MilestoneWalk::new(milestones).unwrap())
    }

    fn live_gateway(server: &Server, refresh_interval: std::time::Duration) -> LiveGateway {
        let credentials = Credentials {
            api_key: "key".into(),
            api_secret: "c2VjcmV0".into(),
        };
        let client = KrakenClient::new(Some(credentials), std::time::Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());
        LiveGateway::new(
            client,
            "AVAXUSD",
            true,
            refresh_interval,
            std::time::Duration::ZERO,
            Confirmation::unattended(),
        )
    }

    fn resting_stop_loss(greed: Greed) -> OneCancelsTheOther {
        let (mut stop_loss, take_profit) = orders(greed);
        stop_loss.id = Some("OSL-1".into());
        stop_loss.is_placed = true;
        stop_loss.is_open = true;
        OneCancelsTheOther::new(stop_loss, take_profit)
    }

    #[tokio::test]
    async fn test_cancels_stop_loss_before_taking_profit() {
        let mut gw = gateway(vec![dec!(15.5), dec!(17)]);
        let mut oco = placed(&mut gw, Greed::None).await;

        let mut steps = 0;
        while !oco.take_profit().is_placed {
            oco.step(&mut gw).await.unwrap();
            steps += 1;
            assert!(steps < 100);
        }

        assert!(gw.last_price().unwrap().close >= dec!(16));
        assert!(oco.stop_loss().is_closed);
        assert!(!oco.tasks_completed());
        assert!(oco.awaiting_fill());

        oco.step(&mut gw).await.unwrap();
        let fill = gw.last_price().unwrap().close;
        assert!(oco.tasks_completed());
        assert_eq!(oco.take_profit().cost, Some((fill * dec!(2)).round_dp(8)));
        assert_eq!(gw.open_orders(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stop_loss_ends_without_take_profit() {
        let mut gw = gateway(vec![dec!(16.1), dec!(17)]);
        let (mut stop_loss, take_profit) = orders(Greed::None);
        stop_loss.id = Some("OGONE-1".into());
        stop_loss.is_placed = true;
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);

        oco.step(&mut gw).await.unwrap();

        assert!(oco.tasks_completed());
        assert!(oco.stop_loss().is_unknown);
        assert!(!oco.take_profit().is_placed);
    }

    #[tokio::test]
    async fn test_system_status_blocks_take_profit() {
        let mut gw = gateway(vec![dec!(16.1), dec!(17)]);
        let mut oco = placed(&mut gw, Greed::None).await;
        gw.set_system_status(crate::models::venue::SystemStatus::Maintenance);

        let err = oco.step(&mut gw).await.unwrap_err();

        assert!(matches!(err, crate::error::BotError::SystemStatus(_)));
        assert!(!oco.stop_loss().is_closed);
        assert!(!oco.take_profit().is_placed);
    }

    #[tokio::test]
    async fn test_stop_loss_fill_completes() {
        let mut gw = gateway(vec![dec!(14.2), dec!(12)]);
        let mut oco = placed(&mut gw, Greed::None).await;

        let mut steps = 0;
        while !oco.tasks_completed() {
            oco.step(&mut gw).await.unwrap();
            steps += 1;
            assert!(steps < 100);
        }

        assert!(oco.stop_loss().is_completed);
        assert!(!oco.take_profit().is_placed);
    }

    #[tokio::test]
    async fn test_stop_loss_trigger_edits_once() {
        let mut gw = gateway(vec![dec!(15), dec!(15.9)]);
        let (mut stop_loss, take_profit) = orders(Greed::None);
        stop_loss.trigger = Some(OrderTrigger {
            threshold: dec!(15.2),
            replacement: dec!(14.8),
        });
        gw.add(&mut stop_loss).await.unwrap();
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);

        for _ in 0..8 {
            oco.step(&mut gw).await.unwrap();
        }

        assert_eq!(oco.stop_loss().price, dec!(14.8));
        assert!(oco.stop_loss().trigger.is_none());
        assert!(oco.stop_loss().is_edited);
        assert_eq!(gw.open_orders(), 1);
    }

    #[tokio::test]
    async fn test_failed_trigger_edit_restores_price() {
        let mut gw = gateway(vec![dec!(15.3), dec!(15.9)]);
        let (mut stop_loss, take_profit) = orders(Greed::None);
        stop_loss.id = Some("OGONE-1".into());
        stop_loss.is_placed = true;
        stop_loss.trigger = Some(OrderTrigger {
            threshold: dec!(15.2),
            replacement: dec!(14.8),
        });
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);

        oco.step(&mut gw).await.unwrap();

        assert_eq!(oco.stop_loss().price, dec!(14));
        assert!(oco.stop_loss().trigger.is_some());
    }

    #[tokio::test]
    async fn test_take_profit_trigger_reprices_locally() {
        let mut gw = gateway(vec![dec!(14.5), dec!(14.8)]);
        let (mut stop_loss, mut take_profit) = orders(Greed::None);
        take_profit.trigger = Some(OrderTrigger {
            threshold: dec!(14.6),
            replacement: dec!(15.5),
        });
        gw.add(&mut stop_loss).await.unwrap();
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);

        oco.step(&mut gw).await.unwrap();

        assert_eq!(oco.take_profit().price, dec!(15.5));
        assert!(oco.take_profit().trigger.is_none());
        assert!(!oco.take_profit().is_edited);
    }

    #[tokio::test]
    async fn test_plain_greed_holds_while_rising() {
        let mut gw = gateway(vec![dec!(16.1), dec!(20)]);
        let mut oco = placed(&mut gw, Greed::Plain).await;

        // first tick above tp has no previous price, so it sells
        oco.step(&mut gw).await.unwrap();
        assert!(oco.take_profit().is_placed);

        let mut gw = gateway(vec![dec!(15.95), dec!(20)]);
        let mut oco = placed(&mut gw, Greed::Plain).await;
        for _ in 0..5 {
            oco.step(&mut gw).await.unwrap();
        }
        assert!(gw.last_price().unwrap().close > dec!(16));
        assert!(!oco.take_profit().is_placed);
        assert!(!oco.stop_loss().is_closed);
    }

    #[tokio::test]
    async fn test_plain_greed_sells_on_first_drop() {
        let mut gw = gateway(vec![dec!(16.1), dec!(16.4), dec!(15)]);
        let mut oco = placed(&mut gw, Greed::Plain).await;
        oco.previous_close = Some(dec!(16));

        let mut steps = 0;
        while !oco.take_profit().is_placed {
            oco.step(&mut gw).await.unwrap();
            steps += 1;
            assert!(steps < 100);
        }

        let last = gw.last_price().unwrap().close;
        assert!(last >= dec!(16));
        assert!(last < gw.max_price().close);
    }

    #[test]
    fn test_plain_greed_stops_after_flat_streak() {
        let (stop_loss, take_profit) = orders(Greed::Plain);
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);
        let now = Utc::now();
        let price = Price::tick(1, dec!(16.5), now);

        oco.previous_close = Some(dec!(16.5));
        oco.flat_ticks = 3;
        assert!(oco.holds_for_better_price(&price, &price));

        oco.flat_ticks = 4;
        assert!(!oco.holds_for_better_price(&price, &price));

        oco.flat_ticks = 0;
        oco.missed_greed_window = true;
        assert!(!oco.holds_for_better_price(&price, &price));
    }

    #[test]
    fn test_percentage_greed_uses_peak_age() {
        let (stop_loss, take_profit) = orders(Greed::Percentage);
        let oco = OneCancelsTheOther::new(stop_loss, take_profit);
        let peak_at = Utc::now();
        let peak = Price::tick(1, dec!(18), peak_at);

        let early = Price::tick(2, dec!(16.5), peak_at + Duration::minutes(1));
        assert!(oco.holds_for_better_price(&early, &peak));

        let late = Price::tick(3, dec!(16.5), peak_at + Duration::minutes(15));
        assert!(!oco.holds_for_better_price(&late, &peak));
    }

    #[test]
    fn test_no_greed_never_holds() {
        let (stop_loss, take_profit) = orders(Greed::None);
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);
        oco.previous_close = Some(dec!(16));
        let price = Price::tick(1, dec!(17), Utc::now());
        assert!(!oco.holds_for_better_price(&price, &price));
    }

    #[tokio::test]
    async fn test_partial_take_profit_fill_keeps_running() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_body(r#"{"error":[],"result":{"AVAXUSD":{"a":["16.3"],"b":["16.2"]}}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/0/public/SystemStatus")
            .match_query(Matcher::Any)
            .with_body(r#"{"error":[],"result":{"status":"online","timestamp":"2023-07-06T18:52:00Z"}}"#)
            .create_async()
            .await;
        let cancel = server
            .mock("POST", "/0/private/CancelOrder")
            .with_body(r#"{"error":[],"result":{"count":1}}"#)
            .expect(1)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/0/private/AddOrder")
            .with_body(r#"{"error":[],"result":{"descr":{"order":"sell 2 AVAXUSD @ market"},"txid":["OTP-1"]}}"#)
            .expect(1)
            .create_async()
            .await;
        let partial = server
            .mock("POST", "/0/private/QueryOrders")
            .with_body(
                r#"{"error":[],"result":{"OTP-1":{"status":"closed","descr":{"pair":"AVAXUSD","type":"sell","ordertype":"market","price":"0"},"vol":"2.0","vol_exec":"1.2","cost":"19.44"}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let mut gw = live_gateway(&server, std::time::Duration::ZERO);
        let mut oco = resting_stop_loss(Greed::None);

        oco.step(&mut gw).await.unwrap();
        assert!(oco.stop_loss().is_closed);
        assert!(oco.take_profit().is_placed);
        cancel.assert_async().await;

        oco.step(&mut gw).await.unwrap();
        assert!(!oco.tasks_completed());
        assert!(!oco.take_profit().is_completed);
        assert!(oco.awaiting_fill());
        partial.assert_async().await;
        partial.remove_async().await;

        server
            .mock("POST", "/0/private/QueryOrders")
            .with_body(
                r#"{"error":[],"result":{"OTP-1":{"status":"closed","descr":{"pair":"AVAXUSD","type":"sell","ordertype":"market","price":"0"},"vol":"2.0","vol_exec":"2.0","cost":"32.41"}}}"#,
            )
            .create_async()
            .await;

        oco.step(&mut gw).await.unwrap();
        assert!(oco.tasks_completed());
        assert_eq!(oco.take_profit().cost, Some(dec!(32.41)));
        add.assert_async().await;
    }

    #[tokio::test]
    async fn test_cached_price_is_not_a_flat_tick() {
        let mut server = Server::new_async().await;
        let ticker = server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_body(r#"{"error":[],"result":{"AVAXUSD":{"a":["16.3"],"b":["16.2"]}}}"#)
            .expect(1)
            .create_async()
            .await;
        let add = server
            .mock("POST", "/0/private/AddOrder")
            .expect(0)
            .create_async()
            .await;

        let mut gw = live_gateway(&server, std::time::Duration::from_secs(60));
        let mut oco = resting_stop_loss(Greed::Plain);
        oco.previous_close = Some(dec!(15.9));

        // the series stays fresh, so every step re-reads the same sample
        for _ in 0..6 {
            oco.step(&mut gw).await.unwrap();
        }

        assert_eq!(gw.series().len(), 1);
        assert_eq!(oco.flat_ticks, 0);
        assert!(!oco.take_profit().is_placed);
        assert!(!oco.stop_loss().is_closed);
        ticker.assert_async().await;
        add.assert_async().await;
    }

    #[test]
    fn test_flat_streak_counts_new_samples_only() {
        let (stop_loss, take_profit) = orders(Greed::Plain);
        let mut oco = OneCancelsTheOther::new(stop_loss, take_profit);
        let now = Utc::now();

        let first = Price::tick(1, dec!(16.5), now);
        for _ in 0..4 {
            oco.track_sample(&first);
        }
        assert_eq!(oco.flat_ticks, 0);
        assert_eq!(oco.previous_close, None);

        oco.track_sample(&Price::tick(2, dec!(16.5), now + Duration::seconds(8)));
        oco.track_sample(&Price::tick(3, dec!(16.5), now + Duration::seconds(16)));
        assert_eq!(oco.flat_ticks, 2);
        assert_eq!(oco.previous_close, Some(dec!(16.5)));

        oco.track_sample(&Price::tick(4, dec!(16.6), now + Duration::seconds(24)));
        assert_eq!(oco.flat_ticks, 0);
    }

    #[tokio::test]
    async fn test_plain_greed_holds_again_after_dip() {
        // touches 16.03, dips to 15.5, then climbs back through take-profit
        let mut gw = gateway(vec![dec!(15.95), dec!(16.0), dec!(15.5), dec!(18)]);
        let mut oco = placed(&mut gw, Greed::Plain).await;

        let mut dipped = false;
        for _ in 0..30 {
            oco.step(&mut gw).await.unwrap();
            let close = gw.last_price().unwrap().close;
            if close < dec!(16) && gw.max_price().close >= dec!(16) {
                dipped = true;
                assert!(oco.missed_greed_window());
            }
        }

        assert!(dipped);
        assert!(gw.last_price().unwrap().close > dec!(16.5));
        assert!(!oco.missed_greed_window());
        assert!(!oco.take_profit().is_placed);
        assert!(!oco.stop_loss().is_closed);
    }
}
