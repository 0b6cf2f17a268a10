//! Core types and utilities for the cryptodash price feed
//!
//! This crate provides the shared vocabulary of the subsystem:
//! - Snapshot, tick and connection-state types
//! - The tracked-asset registry with fallback constants
//! - Fetcher and stream configuration
//! - Error taxonomies

pub mod assets;
pub mod config;
pub mod errors;
pub mod types;

pub use assets::*;
pub use config::*;
pub use errors::*;
pub use types::*;
