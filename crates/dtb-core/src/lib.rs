//! Core domain + application logic for the diary Telegram bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram transport
//! lives behind the `MessagingPort` trait implemented in the adapter crate.

pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod flow;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod store;

#[cfg(test)]
mod testutil;

pub use errors::{Error, Result};
