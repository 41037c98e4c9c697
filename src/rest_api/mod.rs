//! REST API module for external integrations
//!
//! Provides health, metrics and read-only KataConfig status endpoints.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};
