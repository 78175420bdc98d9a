use rust_decimal::Decimal;
use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};

use crate::models::{Order, OrderType};

/// Window after startup in which new orders need an operator's approval
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// Yes/no approval for an order about to be submitted
pub trait OrderPrompt: Send + Sync {
    fn confirm(&mut self, order: &Order, market_price: Decimal) -> bool;
}

/// Asks on the terminal
pub struct ConsolePrompt;

impl OrderPrompt for ConsolePrompt {
    fn confirm(&mut self, order: &Order, market_price: Decimal) -> bool {
        if executes_immediately(order, market_price) {
            println!(
                "WARNING: the current MARKET price is {}. Your {} order will be executed immediately. \
                 Make sure the \"{}\" order price {} is correct.",
                market_price,
                order.side.as_str().to_uppercase(),
                order.order_type,
                order.price
            );
        }
        print!("Confirm submitting order {} (Y/N) ", order.describe());
        let _ = io::stdout().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

/// Approves everything; used for unattended runs (`--yes`) and tests
pub struct AutoApprove;

impl OrderPrompt for AutoApprove {
    fn confirm(&mut self, _order: &Order, _market_price: Decimal) -> bool {
        true
    }
}

/// Refuses everything
pub struct Decline;

impl OrderPrompt for Decline {
    fn confirm(&mut self, _order: &Order, _market_price: Decimal) -> bool {
        false
    }
}

/// Whether the order would fill as soon as it reaches the book
///
/// Stop-losses at or above the market and market orders priced at or below it
/// do; any other order type is always treated as immediate.
fn executes_immediately(order: &Order, market_price: Decimal) -> bool {
    match order.order_type {
        OrderType::StopLoss => order.price >= market_price,
        OrderType::Market => order.price <= market_price,
        _ => true,
    }
}

/// Gate in front of order submission
///
/// Orders submitted shortly after process start come from the operator's
/// configuration and get confirmed; later ones are the strategy acting on its
/// own and go through unattended.
pub struct Confirmation {
    started_at: Instant,
    grace: Duration,
    prompt: Box<dyn OrderPrompt>,
}

impl Confirmation {
    pub fn new(started_at: Instant, grace: Duration, prompt: Box<dyn OrderPrompt>) -> Self {
        Self {
            started_at,
            grace,
            prompt,
        }
    }

    /// Never asks; every order is approved
    pub fn unattended() -> Self {
        Self::new(Instant::now(), Duration::ZERO, Box::new(AutoApprove))
    }

    pub fn requires_prompt(&self) -> bool {
        self.started_at.elapsed() < self.grace
    }

    pub fn approve(&mut self, order: &Order, market_price: Decimal) -> bool {
        if !self.requires_prompt() {
            return true;
        }
        self.prompt.confirm(order, market_price)
    }
}
