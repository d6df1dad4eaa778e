pub mod config;
pub mod error;
pub mod executor;
pub mod log_sanitize;
pub mod modules;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod repos;
pub mod tools;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
