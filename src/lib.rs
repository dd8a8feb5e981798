//! gridmesh - a reactive control plane for electrical distribution networks
//!
//! Models the grid as a weighted graph of producers, relays and consumers,
//! ingests synthetic sensor readings, detects overloads, and keeps the
//! network inside its operating envelope through load redistribution,
//! least-loss routing and efficiency-directed migration.

pub mod error;

pub mod balancing;
pub mod config;
pub mod control;
pub mod events;
pub mod forecast;
pub mod grid;
pub mod index;
pub mod optimization;
pub mod persistence;
pub mod ports;
pub mod routing;
pub mod sensors;

// Re-export commonly used types
pub use config::GridConfig;
pub use control::System;
pub use error::{Error, Result};
pub use grid::types::{NodeId, NodeKind};
