//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup and seeding helpers
//! - In-memory run fixtures (source, destination, temp log + lock)

#![allow(dead_code)] // Each test binary uses a different subset

pub mod containers;
pub mod fixtures;

pub use containers::*;
pub use fixtures::*;
