//! Storage layer for one-time secrets.
//!
//! A [`store::SecretStore`] persists encrypted, view-limited, time-limited
//! [`record::SecretRecord`]s across two interchangeable backend pairings
//! (DynamoDB + S3, Firestore + GCS), picked at startup from configuration.

pub mod config;
pub mod context;
pub mod credentials;
pub mod encoding;
pub mod errors;
pub mod record;
pub mod store;

pub use context::CallContext;
pub use errors::{ErrorKind, Result, StoreError};
pub use record::SecretRecord;
pub use store::{connect, SecretStore};
