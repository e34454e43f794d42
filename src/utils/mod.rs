//! Shared utilities.

pub mod bootstrap;
pub mod clock;
pub mod hashing;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::RetrySettings;
