//! Shared utilities

pub mod env;
