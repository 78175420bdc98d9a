pub mod simulator;
pub mod synthetic;

pub use simulator::SimulatedGateway;
pub use synthetic::{MilestoneWalk, PriceTrend};
