//! Enrollment lifecycle and progress-completion engine for a learning platform.

pub mod config;
pub mod error;
pub mod learning;
pub mod telemetry;
