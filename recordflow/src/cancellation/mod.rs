//! Cooperative cancellation for a pass.
//!
//! The token is checked before each record and before each completion retry.
//! Write-backs that have already started are never interrupted.

mod token;

pub use token::CancellationToken;
