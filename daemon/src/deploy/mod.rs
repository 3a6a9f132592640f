//! Reconciliation of plugin and config trees from git

pub mod engine;
pub mod git;
pub mod pattern;
pub mod tree;
