//! `opstools-core`: shared building blocks for the ops tooling crates.
//!
//! Time sources and configuration. No metrics or database concerns live here.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{
    Clock, FixedClock, ManualMonotonicClock, MonotonicClock, OverridableClock, SharedClock,
    SharedMonotonicClock, Stopwatch, SystemClock, SystemMonotonicClock, system_clock,
};
pub use config::{DatabaseSettings, Settings, TransactionSettings};
pub use error::{ConfigError, ConfigResult};
