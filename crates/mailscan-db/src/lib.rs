//! Mailscan Database Layer
//!
//! `SQLite` persistence via `SQLx` with embedded migrations. One module per
//! table family:
//!
//! - [`scan_logs`] - scan lifecycle rows and the atomic batch commit
//! - [`checkpoints`] - last-success timestamps per (user, provider)
//! - [`ledger`] - append-only credit transactions and derived balances
//! - [`connections`] - encrypted mail credential records
//!
//! # Example
//!
//! ```ignore
//! use mailscan_db::Database;
//!
//! let db = Database::open("mailscan.db").await?;
//! db.run_migrations().await?;
//! let balance = mailscan_db::ledger::balance(db.pool(), user_id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod checkpoints;
pub mod connection;
pub mod connections;
pub mod error;
pub mod ledger;
pub mod scan_logs;

// Re-export commonly used types
pub use connection::Database;
pub use error::{DatabaseError, Result};
pub use scan_logs::{ScanLog, ScanStatus};
