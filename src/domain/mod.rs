//! Domain layer - Port definitions
//!
//! This module defines the core traits (ports) that store adapters implement,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
