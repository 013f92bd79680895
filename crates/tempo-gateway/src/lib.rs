//! # Tempo Gateway
//!
//! HTTP API over the scheduling engine. Identity comes from trusted
//! `X-Tenant-Id` / `X-User-Id` / `X-User-Name` headers set by the upstream
//! auth layer.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start_server};
