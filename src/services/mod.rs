pub mod booking;
pub mod messaging;
pub mod notifier;
pub mod policy;
pub mod rate_limit;
pub mod sweeper;
