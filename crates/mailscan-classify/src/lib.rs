//! Mailscan Classify - job-email classification.
//!
//! Wraps an OpenAI-compatible chat completions endpoint in JSON mode
//! behind the [`MailClassifier`] trait. The scanner depends only on the
//! trait, so test doubles and alternative backends slot in cleanly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod classifier;
pub mod error;
pub mod openai;

pub use classifier::{ClassifyOutcome, MailClassifier};
pub use error::{ClassifyError, Result};
pub use openai::OpenAiClassifier;
