//! Mailscan Scanner - the scan orchestration pipeline.
//!
//! The [`ScanOrchestrator`] drives each scan's state machine: prepare a
//! bounded candidate set, process it in fixed-size batches, debit credits
//! atomically with progress, advance the mail checkpoint after every
//! durable commit, and honor cooperative stop requests between batches.
//! The [`ScanScheduler`] runs batch turns on a bounded worker pool.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod orchestrator;
pub mod worker;

pub use error::{Result, ScanError};
pub use orchestrator::{ScanOrchestrator, WorkerStep};
pub use worker::ScanScheduler;
