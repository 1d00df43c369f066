//! Infrastructure layer

pub mod config_store;
pub mod json_file;
