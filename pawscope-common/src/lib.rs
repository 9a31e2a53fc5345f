//! # pawscope common library
//!
//! Shared code for the pawscope crates:
//! - Database connection, schema bootstrap and row models
//! - Configuration loading
//! - Error type
//! - Task id and timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
