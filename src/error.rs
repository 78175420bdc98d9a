use thiserror::Error;

use crate::models::venue::SystemStatus;

/// Error code Kraken returns when the request budget is exhausted.
pub const TOO_MANY_REQUESTS: &str = "EGeneral:Too many requests";

/// Error code Kraken returns for an order id it does not know about.
pub const UNKNOWN_ORDER: &str = "EOrder:Unknown order";

#[derive(Debug, Error)]
pub enum BotError {
    /// The venue answered with one or more error codes
    #[error("venue error: {}", .0.join(", "))]
    Venue(Vec<String>),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode venue response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Venue reports it is not accepting orders; recoverable
    #[error("exchange unavailable or under maintenance ({0})")]
    SystemStatus(SystemStatus),

    /// Operator refused to submit an order; ends the process
    #[error("order submission declined by operator")]
    OrderDeclined,

    #[error("API credentials are missing")]
    MissingCredentials,

    #[error("failed to sign request: {0}")]
    Signing(String),

    #[error("no price available for {0}")]
    NoPrice(String),

    #[error("order error: {0}")]
    Order(String),
}

impl BotError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BotError::Venue(codes) if codes.iter().any(|c| c == TOO_MANY_REQUESTS))
    }

    /// Errors that must stop the trading loop instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, BotError::OrderDeclined)
    }

    /// Process exit status; an operator declining an order is a clean exit
    pub fn exit_code(&self) -> i32 {
        match self {
            BotError::OrderDeclined => 0,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
