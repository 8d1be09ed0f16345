#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! HTTP/WebSocket host for the `taskforge` engine: JSON API for task
//! submission and inspection, live update streaming, config loading, and
//! graceful shutdown.

pub mod cli;
pub mod config;
pub mod dto;
pub mod pump;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;

mod handlers;
mod ws;
