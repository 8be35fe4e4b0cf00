//! CLI module for the wmremove library
//!
//! Only available when the "cli" feature is enabled.

#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, Commands};
