//! Domain models

pub mod account;
pub mod credential;
pub mod instance;
pub mod quota;
