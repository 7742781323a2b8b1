//! Core domain + application logic for the IMEI check bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the SICKW
//! lookup service live behind ports (traits) implemented in adapter crates.

pub mod admin;
pub mod app;
pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod ledger;
pub mod logging;
pub mod lookup;
pub mod messaging;
pub mod webapp;
pub mod workflow;

pub use errors::{Error, Result};
