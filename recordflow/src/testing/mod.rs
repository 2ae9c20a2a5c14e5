//! Test doubles for the store, the token endpoint and the completion service.
//!
//! This module provides:
//! - [`InMemoryTableStore`]: a paged table with scriptable failures
//! - [`CountingTokenIssuer`]: issues distinct tokens and counts them
//! - [`ScriptedCompletions`]: replies chosen by prompt substring
//! - demo record fixtures

mod completions;
mod fixtures;
mod store;

pub use completions::ScriptedCompletions;
pub use fixtures::{
    complete_demo, demo_prompts, demo_replies, expected_demo_fields, incomplete_demo, stage_marker,
};
pub use store::{CountingTokenIssuer, InMemoryTableStore, TableUpdate};
