//! # Ombor Support
//!
//! Shared utilities for the Ombor crates.
//!
//! This crate provides:
//! - Text rendering for container diagnostics
//! - Tracing subscriber initialisation for entry points

pub mod logging;
pub mod rendering;
