// Order execution and price collection module
pub mod confirmation;
pub mod gateway;
pub mod live;
pub mod price_series;
pub mod scheduler;

pub use confirmation::{AutoApprove, Confirmation, ConsolePrompt, OrderPrompt, DEFAULT_GRACE_WINDOW};
pub use gateway::{ensure_online, OrderGateway};
pub use live::LiveGateway;
pub use price_series::PriceSeries;
pub use scheduler::{PollSchedule, Scheduler};
