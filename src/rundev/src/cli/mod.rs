//! Command-line interface

pub mod options;
