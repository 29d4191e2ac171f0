//! Mailscan Core - Foundation crate for the mailscan pipeline.
//!
//! This crate provides the shared types, error handling, configuration
//! management, and billing rules that all other mailscan crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`UserId`, `ScanId`, `Provider`, `MailMessage`)
//! - [`credits`] - Token-to-credit conversion rule
//!
//! # Example
//!
//! ```rust
//! use mailscan_core::{credits_for_tokens, AppConfig};
//!
//! let config = AppConfig::default();
//! assert_eq!(credits_for_tokens(1_500), 2);
//! assert!(config.scan.max_messages > 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod credits;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, ClassifyConfig, DatabaseConfig, MailConfig, ScanConfig};
pub use credits::credits_for_tokens;
pub use error::{ConfigError, ConfigResult, CoreError, Result};
pub use types::{
    JobMailStatus, MailAnalysis, MailMessage, Provider, ScanId, ScanWindow, TokenUsage, UserId,
};
