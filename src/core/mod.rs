//! Core domain models
//!
//! This module defines the fundamental data structures the engine works on:
//! execution contexts, node definitions, node execution records and their
//! status model, plus YAML configuration.

pub mod config;
pub mod context;
pub mod execution;
pub mod node;
pub mod state;

pub use context::*;
pub use execution::*;
pub use node::*;
pub use state::*;
