//! Configuration and error types shared by every module.

pub mod config;
pub mod errors;
