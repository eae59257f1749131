//! Core types for the Xenos shader translator
//!
//! This crate provides the error taxonomy, the translator configuration
//! (including the host capability descriptor) and logging setup.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DebugConfig, FeatureFlags, Features, LogLevel, SpirvVersion, TranslatorConfig};
pub use error::{ControlFlowError, Result, TranslatorError, UnsupportedError};
