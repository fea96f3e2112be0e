//! Core domain models
//!
//! This module defines the data structures shared by the engine: pipelines,
//! task definitions, data items, run records and their configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod state;
pub mod task;

pub use context::*;
pub use error::*;
pub use item::*;
pub use pipeline::*;
pub use state::*;
pub use task::*;
