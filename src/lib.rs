//! Automated issue remediation.
//!
//! Reports from build, test, lint and audit tooling flow through
//! detection, root-cause analysis, strategy generation, a risk gate,
//! execution, validation and learning. A predictive engine runs beside the
//! pipeline and forecasts issues from change signals.
//!
//! [`engine::AutoFixManager`] is the entry point.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::AutoFixConfig;
pub use engine::{AutoFixManager, AutoFixManagerBuilder};
pub use error::AppError;
