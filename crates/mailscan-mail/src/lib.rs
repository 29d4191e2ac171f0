//! Mailscan Mail - provider access for the scan pipeline.
//!
//! Three layers:
//!
//! - [`ConnectionService`] owns encrypted mailbox connections and mints
//!   short-lived access tokens through a [`TokenRefresher`]
//! - [`with_mail_access`] wraps any mailbox operation with a bounded
//!   refresh-and-retry on stale credentials (one refresh, one retry)
//! - [`GmailClient`] implements [`MailProviderClient`] over the Gmail
//!   REST API

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod access;
pub mod connection_service;
pub mod error;
pub mod gmail;
pub mod oauth;
pub mod provider;

pub use access::{with_mail_access, AccessBroker, MailAccess, TokenCache, UnauthorizedSignal};
pub use connection_service::ConnectionService;
pub use error::{MailError, Result};
pub use gmail::GmailClient;
pub use oauth::{GoogleTokenRefresher, TokenRefresher};
pub use provider::MailProviderClient;
