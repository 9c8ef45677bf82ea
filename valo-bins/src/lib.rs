//! Shared setup for the valo binaries.

pub mod common;
