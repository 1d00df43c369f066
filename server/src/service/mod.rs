//! Service layer

pub mod credential;
pub mod instance;
pub mod project;
pub mod provider;
pub mod quota;
pub mod supervisor;
