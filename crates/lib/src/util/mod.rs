//! Shared utilities.
//!
//! Subprocess execution and filesystem helpers used across the crate.

pub mod fs;
pub mod process;

#[cfg(test)]
pub mod testutil;
