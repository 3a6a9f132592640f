//! plugsync library
//!
//! Reconciles game server plugin and config directories against a git
//! working copy, one server at a time.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
