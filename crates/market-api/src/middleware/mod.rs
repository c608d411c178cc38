//! # HTTP Middleware
//!
//! - `metrics`: request and error counters exposed to the admin surface.

pub mod metrics;
