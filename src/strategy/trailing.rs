use rust_decimal::Decimal;

use crate::display;
use crate::error::Result;
use crate::execution::gateway::{ensure_online, OrderGateway};
use crate::models::Order;

/// Stop-loss that ratchets up a ladder of price levels
///
/// `trailing_levels[0]` is the next stop price and `trailing_levels[1]` the
/// price that moves the stop there. The ladder never runs dry: whenever only
/// two levels are left a new one is added at the same spacing.
#[derive(Debug, Clone)]
pub struct TrailingStopLoss {
    stop_loss: Order,
    tasks_completed: bool,
    percentage_done: i64,
}

impl TrailingStopLoss {
    pub fn new(stop_loss: Order) -> Self {
        Self {
            stop_loss,
            tasks_completed: false,
            percentage_done: 0,
        }
    }

    pub fn stop_loss(&self) -> &Order {
        &self.stop_loss
    }

    pub fn stop_loss_mut(&mut self) -> &mut Order {
        &mut self.stop_loss
    }

    pub fn levels(&self) -> &[Decimal] {
        &self.stop_loss.trailing_levels
    }

    pub fn tasks_completed(&self) -> bool {
        self.tasks_completed
    }

    pub fn percentage_done(&self) -> i64 {
        self.percentage_done
    }

    pub async fn step<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        let price_before_step = self.stop_loss.price;
        let result = self.advance(gateway).await;
        if result.is_err() {
            self.stop_loss.price = price_before_step;
        }
        result
    }

    async fn advance<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G) -> Result<()> {
        self.extend_ladder();

        let price = gateway.current_price().await?;
        let close = price.close;
        let target = self
            .stop_loss
            .trailing_trigger_price()
            .or(self.stop_loss.next_trailing_price())
            .unwrap_or(self.stop_loss.price);
        self.percentage_done = display::percentage_done(close, self.stop_loss.price, target);
        tracing::info!("{}", display::progress_line(gateway.pair(), self.percentage_done, close));

        gateway.query(&mut self.stop_loss).await?;

        if self.stop_loss.is_closed && self.stop_loss.is_completed {
            tracing::info!(
                "Stop-loss order was triggered by price. Received: {}{}",
                display::currency_symbol(gateway.pair()),
                self.stop_loss.cost.unwrap_or_default()
            );
            self.tasks_completed = true;
            return Ok(());
        }
        if self.stop_loss.is_canceled {
            tracing::error!(order_id = %self.stop_loss.id_or_empty(), "Stop-loss order was canceled by user");
            self.tasks_completed = true;
            return Ok(());
        }

        if let (Some(next_stop), Some(trigger)) = (
            self.stop_loss.next_trailing_price(),
            self.stop_loss.trailing_trigger_price(),
        ) {
            if close >= trigger {
                self.ratchet(gateway, next_stop).await?;
            }
        }

        self.extend_ladder();
        Ok(())
    }

    async fn ratchet<G: OrderGateway + ?Sized>(&mut self, gateway: &mut G, next_stop: Decimal) -> Result<()> {
        ensure_online(gateway).await?;

        let previous = self.stop_loss.price;
        self.stop_loss.price = next_stop;
        gateway.edit(&mut self.stop_loss).await?;

        if self.stop_loss.has_error {
            tracing::error!(
                order_id = %self.stop_loss.id_or_empty(),
                "Unable to move stop-loss to {}", next_stop
            );
            self.stop_loss.price = previous;
        } else {
            self.stop_loss.trailing_levels.remove(0);
            tracing::info!(
                order_id = %self.stop_loss.id_or_empty(),
                "Increased stop-loss price to {}{}",
                display::currency_symbol(gateway.pair()),
                next_stop
            );
        }
        Ok(())
    }

    /// Keep at least three levels by repeating the last spacing
    fn extend_ladder(&mut self) {
        let levels = &mut self.stop_loss.trailing_levels;
        if let &[stop, trigger] = levels.as_slice() {
            levels.push(trigger + (trigger - stop));
        }
    }
}
