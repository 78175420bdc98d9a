use std::time::Duration;
use tokio::time::sleep;

use super::gateway::OrderGateway;
use crate::error::Result;
use crate::strategy::Operation;

/// Lowest base interval allowed against the live venue
pub const MIN_LIVE_INTERVAL: Duration = Duration::from_secs(8);

/// Default base interval when replaying the simulator
pub const DEFAULT_SIMULATION_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a placed take-profit to fill
const AWAITING_FILL_INTERVAL: Duration = Duration::from_secs(4);

/// Shortest band; price samples must not be cached longer than this
const FASTEST_BAND_INTERVAL: Duration = Duration::from_secs(3);

/// Polling cadence as a function of how close price is to a decision
///
/// Near the take-profit (100%) the loop polls faster; far away it falls back
/// to the configured base interval. Never slower than the base interval.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    base: Duration,
}

impl PollSchedule {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Staleness gate for the price series, so fast polls see fresh prices
    pub fn refresh_interval(&self) -> Duration {
        self.base.min(FASTEST_BAND_INTERVAL)
    }

    pub fn interval_for(&self, percentage_done: i64, plain_greed: bool, awaiting_fill: bool) -> Duration {
        let banded = if awaiting_fill {
            AWAITING_FILL_INTERVAL
        } else {
            match percentage_done {
                93..=95 => Duration::from_secs(8),
                96..=104 if plain_greed => Duration::from_secs(6),
                96..=104 => Duration::from_secs(3),
                105..=110 => Duration::from_secs(8),
                111..=120 => Duration::from_secs(16),
                _ => self.base,
            }
        };
        banded.min(self.base)
    }
}

/// Drives an operation until it reports completion
pub struct Scheduler {
    schedule: PollSchedule,
}

impl Scheduler {
    pub fn new(schedule: PollSchedule) -> Self {
        Self { schedule }
    }

    /// Step the operation, sleeping between steps
    ///
    /// Returns early only on fatal errors such as a declined confirmation.
    pub async fn run<G: OrderGateway + ?Sized>(&self, operation: &mut Operation, gateway: &mut G) -> Result<()> {
        let mut steps: u64 = 0;

        while !operation.tasks_completed() {
            operation.execute(gateway).await?;
            steps += 1;

            if operation.tasks_completed() {
                break;
            }

            let interval = self.schedule.interval_for(
                operation.percentage_done(),
                operation.plain_greed(),
                operation.awaiting_fill(),
            );
            tracing::debug!(steps, interval_ms = interval.as_millis() as u64, "Sleeping until next step");
            sleep(interval).await;
        }

        tracing::info!(steps, "Operation completed");
        Ok(())
    }
}
