// ABOUTME: Library half of the automa binary
// ABOUTME: Wires configuration into services and renders records for the terminal

pub mod context;
pub mod display;

pub use context::{AppContext, StartupReport};
