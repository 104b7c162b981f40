//! Configuration types for Vigil.
//!
//! This crate provides the configuration read from `vigil.yaml`, with
//! `${VAR:-default}` expansion and a small set of environment overrides.

pub mod env;
pub mod loader;
pub mod types;

pub use env::*;
pub use loader::*;
pub use types::*;
