pub mod kraken;

pub use kraken::{Credentials, KrakenClient};
