//! Control plane service for the metal platform.
//!
//! Hosts the durably queued control loops (server fulfillment, deployment
//! reconciliation, hourly billing, cell janitoring) and the CLI-facing
//! HTTP API. All long-running work lives in the loops; no request ever
//! waits on a workflow.

pub mod api;
pub mod config;
pub mod handlers;
pub mod messages;
pub mod service;

pub use config::{ControlConfig, EnvironmentTag};
pub use service::{run, run_with, Providers, ServiceError};
