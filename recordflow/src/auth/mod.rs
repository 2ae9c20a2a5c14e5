//! Credential lifecycle for the data store.

mod broker;
mod classify;
mod credential;

pub use broker::{BrokerSettings, CredentialBroker};
pub use classify::{is_auth_failure, AUTH_FAILURE_CODES};
pub use credential::Credential;
