//! Xenos (Xbox 360 GPU) shader translation
//!
//! Turns parsed Xenos shader microcode into SPIR-V for the Vulkan backend.

pub mod shader;
pub mod vertex;
pub mod xenos;

pub use shader::{ShaderProgram, ShaderTranslator};
pub use xt_core::{Features, Result, TranslatorConfig, TranslatorError};
