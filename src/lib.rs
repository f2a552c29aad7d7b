//! Switchboard - request classification and resilient specialist dispatch
//!
//! Each chat message is classified into a task category and answered by that
//! category's specialist on the best available provider (cloud A, cloud B,
//! local model), with per-provider circuit breakers, rate-limit retries and a
//! general-chat fallback that guarantees an answer.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod router;
pub mod specialists;
pub mod telemetry;
