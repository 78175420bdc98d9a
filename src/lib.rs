// Core modules
pub mod api;
pub mod backtest;
pub mod display;
pub mod error;
pub mod execution;
pub mod models;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use error::{BotError, Result};
pub use execution::{LiveGateway, OrderGateway, PollSchedule, Scheduler};
pub use models::*;
pub use settings::Settings;
pub use strategy::{Operation, Strategy};
