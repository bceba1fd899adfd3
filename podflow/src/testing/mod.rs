//! Testing utilities for podflow pipelines.
//!
//! This module provides:
//! - An in-memory pipeline backend
//! - Task graph and configuration fixtures

pub mod fixtures;
mod memory_backend;

pub use memory_backend::InMemoryBackend;
