//! Testing utilities for `EventKV`
//!
//! - [`chaos`]: a backend wrapper that injects failures on demand or at random
//! - [`collector`]: a publisher that records what the dispatcher delivered
//! - [`contract`]: the behaviour every key/value backend must show

#![forbid(unsafe_code, unreachable_pub)]
#![warn(missing_docs)]
#![deny(
    bad_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_imports,
    unused_must_use,
    unused_qualifications,
    unused_results
)]

pub mod chaos;
pub mod collector;
pub mod contract;

pub use chaos::{ChaosBackend, ChaosBackendExt, ChaosConfig, Probability};
pub use collector::EventCollector;
pub use contract::{backend_contract_suite, ContractTestFailure, ContractTestResult};
