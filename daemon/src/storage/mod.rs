//! Configuration storage

pub mod config_file;
pub mod settings;
