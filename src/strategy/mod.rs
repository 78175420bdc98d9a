// Order management strategies
pub mod oco;
pub mod retention;
pub mod trailing;

pub use oco::OneCancelsTheOther;
pub use retention::{GainRetentionPolicy, RetentionBand};
pub use trailing::TrailingStopLoss;

use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::sleep;

use crate::display;
use crate::error::{BotError, Result};
use crate::execution::gateway::OrderGateway;
use crate::models::{Greed, Order};

/// Default pause after the venue reports it is not online
pub const DEFAULT_SYSTEM_STATUS_COOLDOWN: Duration = Duration::from_secs(20);

/// The two supported state machines
#[derive(Debug, Clone)]
pub enum Strategy {
    OneCancelsTheOther(OneCancelsTheOther),
    TrailingStopLoss(TrailingStopLoss),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::OneCancelsTheOther(_) => "OneCancelsTheOther",
            Strategy::TrailingStopLoss(_) => "TrailingStopLoss",
        }
    }

    /// Run one state machine step against the gateway
    pub async fn step<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.step(gateway).await,
            Strategy::TrailingStopLoss(trailing) => trailing.step(gateway).await,
        }
    }

    pub fn stop_loss(&self) -> &Order {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.stop_loss(),
            Strategy::TrailingStopLoss(trailing) => trailing.stop_loss(),
        }
    }

    pub fn stop_loss_mut(&mut self) -> &mut Order {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.stop_loss_mut(),
            Strategy::TrailingStopLoss(trailing) => trailing.stop_loss_mut(),
        }
    }

    pub fn tasks_completed(&self) -> bool {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.tasks_completed(),
            Strategy::TrailingStopLoss(trailing) => trailing.tasks_completed(),
        }
    }

    pub fn percentage_done(&self) -> i64 {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.percentage_done(),
            Strategy::TrailingStopLoss(trailing) => trailing.percentage_done(),
        }
    }

    pub fn awaiting_fill(&self) -> bool {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.awaiting_fill(),
            Strategy::TrailingStopLoss(_) => false,
        }
    }

    pub fn plain_greed(&self) -> bool {
        match self {
            Strategy::OneCancelsTheOther(oco) => oco.take_profit().greed == Greed::Plain,
            Strategy::TrailingStopLoss(_) => false,
        }
    }
}

/// A strategy plus the run-level settings around it
///
/// `execute` is the step boundary: recoverable failures are logged here and
/// the next tick retries, only fatal ones reach the caller.
#[derive(Debug, Clone)]
pub struct Operation {
    strategy: Strategy,
    start_price: Option<Decimal>,
    cancel_orders: Vec<String>,
    system_status_cooldown: Duration,
}

impl Operation {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            start_price: None,
            cancel_orders: Vec::new(),
            system_status_cooldown: DEFAULT_SYSTEM_STATUS_COOLDOWN,
        }
    }

    pub fn with_start_price(mut self, start_price: Option<Decimal>) -> Self {
        self.start_price = start_price;
        self
    }

    pub fn with_cancel_orders(mut self, ids: Vec<String>) -> Self {
        self.cancel_orders = ids;
        self
    }

    pub fn with_system_status_cooldown(mut self, cooldown: Duration) -> Self {
        self.system_status_cooldown = cooldown;
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn stop_loss_mut(&mut self) -> &mut Order {
        self.strategy.stop_loss_mut()
    }

    pub fn start_price(&self) -> Option<Decimal> {
        self.start_price
    }

    pub fn tasks_completed(&self) -> bool {
        self.strategy.tasks_completed()
    }

    pub fn percentage_done(&self) -> i64 {
        self.strategy.percentage_done()
    }

    pub fn awaiting_fill(&self) -> bool {
        self.strategy.awaiting_fill()
    }

    pub fn plain_greed(&self) -> bool {
        self.strategy.plain_greed()
    }

    /// One step with the recovery policy applied
    pub async fn execute<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        match self.strategy.step(gateway).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(err),
            Err(BotError::SystemStatus(status)) => {
                tracing::warn!(
                    %status,
                    "Exchange unavailable or under maintenance, retrying in {}s",
                    self.system_status_cooldown.as_secs()
                );
                sleep(self.system_status_cooldown).await;
                Ok(())
            }
            Err(BotError::Venue(codes)) => {
                for code in &codes {
                    tracing::error!("{}", display::describe_error(code));
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Step failed");
                Ok(())
            }
        }
    }

    /// Block until the price reaches the configured start price
    pub async fn wait_for_start_price<G: OrderGateway + ?Sized>(
        &self,
        gateway: &mut G,
        interval: Duration,
    ) -> Result<()> {
        let Some(start_price) = self.start_price else {
            return Ok(());
        };

        loop {
            match gateway.current_price().await {
                Ok(price) if price.close >= start_price => {
                    tracing::info!(
                        "Start price reached: {}",
                        display::waiting_line(gateway.pair(), start_price, price.close)
                    );
                    return Ok(());
                }
                Ok(price) => {
                    tracing::info!("{}", display::waiting_line(gateway.pair(), start_price, price.close));
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => tracing::error!(error = %err, "Failed to fetch price"),
            }
            sleep(interval).await;
        }
    }

    /// Cancel leftover orders, then adopt or place the stop-loss
    ///
    /// Failing to end up with an open stop-loss is an error: the run must not
    /// start trading without protection.
    pub async fn setup_orders<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        for id in &self.cancel_orders {
            let mut order = Order::existing(id.clone(), gateway.pair());
            gateway.cancel(&mut order).await?;
            if order.has_error {
                tracing::warn!(order_id = %id, "Unable to cancel order");
            } else {
                tracing::info!(order_id = %id, "Order cancelled");
            }
        }

        let stop_loss = self.strategy.stop_loss_mut();
        if stop_loss.is_placed {
            let response = gateway.query(stop_loss).await?;
            let info = response
                .result
                .as_ref()
                .and_then(|orders| orders.get(stop_loss.id_or_empty()));
            match info {
                Some(info) if stop_loss.is_open => {
                    stop_loss.adopt(info);
                    tracing::info!(order_id = %stop_loss.id_or_empty(), "Adopted existing stop-loss {}", stop_loss.describe());
                }
                _ => {
                    return Err(BotError::Order(format!(
                        "unable to find an open order with id {}; it might have been completed or cancelled",
                        stop_loss.id_or_empty()
                    )))
                }
            }
        } else {
            gateway.add(stop_loss).await?;
            if stop_loss.has_error {
                return Err(BotError::Order("unable to add stop-loss order".to_string()));
            }
        }
        Ok(())
    }
}
