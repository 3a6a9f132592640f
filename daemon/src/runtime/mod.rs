//! Shared runtime state read by the dashboard and written by the engine

pub mod controller;
pub mod state;
