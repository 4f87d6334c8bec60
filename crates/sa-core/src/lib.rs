//! # sa-core
//!
//! Core types shared by the SSH Attachments RS crates.
//!
//! This crate provides:
//! - Configuration error types
//! - Remote host configuration (host, credentials, root directory, URL
//!   template, per-type attachment options) and its loading/validation

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
