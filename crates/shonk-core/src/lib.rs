//! Core state for the Shonk bot: the per-user ledger, quota policies, the
//! human moderation queue and the archive partitioner.
//!
//! This crate is intentionally framework-agnostic. Telegram and the image API
//! live behind ports (traits) implemented in adapter crates.

pub mod archive;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod messaging;
pub mod moderation;
pub mod ports;
pub mod quota;
pub mod service;
pub mod storage;

pub use errors::{Error, Result};
