#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod backpressure;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod management;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod synthesis;
pub mod telemetry;
pub mod workload;
