//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, sequence arithmetic, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Sequence**: Wrap-around comparisons for 16-bit sequence numbers
//! - **Time**: Monotonic clock producing the `f64` seconds the state machines consume

pub mod logging;
pub mod metrics;
pub mod sequence;
pub mod time;

pub use metrics::{global_metrics, Metrics};
pub use time::Clock;
