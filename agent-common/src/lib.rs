//! Agent Common - Shared configuration, validation, errors and logging for the Agent gateway.
//!
//! This crate provides:
//! - Configuration types, file discovery and environment overrides
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{AgentApiConfig, Config, LoggingConfig, ServerConfig, SessionConfig, SessionKeying};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
