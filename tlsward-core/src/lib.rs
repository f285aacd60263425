//! Tlsward Core Library
//!
//! Configuration management and error handling shared by the Tlsward
//! binary.

pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Tlsward version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
