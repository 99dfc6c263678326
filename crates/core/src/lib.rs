//! Core types and utilities for the oddsfeed price service
//!
//! This crate provides shared types used across all components:
//! - Venue identifiers
//! - Price and orderbook snapshots and their update payloads
//! - Service configuration
//! - Error types

pub mod types;
pub mod book;
pub mod config;
pub mod errors;

pub use types::*;
pub use book::*;
pub use config::*;
pub use errors::*;
