use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::VecDeque;

/// Fraction of the current price moved per step
const STEP_FRACTION: Decimal = dec!(0.005);

/// Direction the synthetic price is heading in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTrend {
    Ascending,
    Descending,
}

impl PriceTrend {
    pub fn reversed(self) -> Self {
        match self {
            PriceTrend::Ascending => PriceTrend::Descending,
            PriceTrend::Descending => PriceTrend::Ascending,
        }
    }

    /// Trend that leads from `from` to `to`; a flat leg reverses `current`
    fn toward(from: Decimal, to: Decimal, current: PriceTrend) -> Self {
        if to > from {
            PriceTrend::Ascending
        } else if to < from {
            PriceTrend::Descending
        } else {
            current.reversed()
        }
    }
}

/// Deterministic price feed walking through a list of milestone prices
///
/// Starts at the first milestone and moves half a percent per step toward the
/// next one. Once the last milestone is reached the walk keeps its direction.
/// Yields the current price, then advances.
#[derive(Debug, Clone)]
pub struct MilestoneWalk {
    milestones: VecDeque<Decimal>,
    price: Decimal,
    trend: PriceTrend,
}

impl MilestoneWalk {
    /// Returns `None` unless at least two milestones are given
    pub fn new(milestones: Vec<Decimal>) -> Option<Self> {
        if milestones.len() < 2 {
            return None;
        }
        let mut milestones = VecDeque::from(milestones);
        let start = milestones.pop_front()?;
        let trend = PriceTrend::toward(start, milestones[0], PriceTrend::Descending);

        Some(Self {
            milestones,
            price: start,
            trend,
        })
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn trend(&self) -> PriceTrend {
        self.trend
    }

    /// Milestones still ahead, the current target first
    pub fn remaining(&self) -> usize {
        self.milestones.len()
    }

    fn advance(&mut self) {
        let step = (self.price * STEP_FRACTION)
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);

        self.price = match self.trend {
            PriceTrend::Ascending => self.price + step,
            PriceTrend::Descending => self.price - step,
        };

        let Some(&target) = self.milestones.front() else {
            return;
        };
        let reached = match self.trend {
            PriceTrend::Ascending => self.price >= target,
            PriceTrend::Descending => self.price <= target,
        };
        if reached && self.milestones.len() > 1 {
            self.milestones.pop_front();
            self.trend = PriceTrend::toward(target, self.milestones[0], self.trend);
        }
    }
}

impl Iterator for MilestoneWalk {
    type Item = Decimal;

    fn next(&mut self) -> Option<Decimal> {
        let current = self.price;
        self.advance();
        Some(current)
    }
}
