//! # Tempo Core
//!
//! Shared building blocks for the Tempo workspace: the error taxonomy every
//! crate returns, and the TOML configuration loaded by the binary.

pub mod config;
pub mod error;

pub use config::TempoConfig;
pub use error::{Result, TempoError};
