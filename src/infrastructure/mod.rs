//! Infrastructure layer
//!
//! Adapters for external dependencies: the JSON state store, the
//! hierarchical configuration loader, and logging initialization.

pub mod config;
pub mod logging;
pub mod persistence;

pub use persistence::StateStore;
