//! # dirquery-core
//!
//! Core types shared by the dirquery directory client crates.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and the operation-boundary wrapping rules
//! - [`config`] - Validated configuration for directory connections

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::DirectoryConfig;
pub use error::{Error, Result};
