//! Configuration module
//!
//! Loading and validation of the Tlsward configuration file.

mod loader;
mod types;

pub use loader::{ConfigLoader, STORAGE_ENV};
pub use types::*;
