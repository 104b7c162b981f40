//! Vigil daemon: wires configuration, the event bus, ingress and outputs.

pub mod cli;
pub mod daemon;
pub mod settings;

pub use cli::Cli;
