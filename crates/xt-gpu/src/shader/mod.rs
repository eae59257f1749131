//! Xenos shader translation (Xenos → SPIR-V)
//!
//! This module handles translation of parsed Xenos vertex and pixel shader
//! microcode to Vulkan SPIR-V modules.
//!
//! The Xenos GPU runs unified shaders:
//! - Control flow: exec blocks, loops and jumps over 48-bit CF instructions
//! - ALU: paired vector and scalar operations with predication through p0
//! - Fetch: vertex data from shared memory, decoded per format

pub mod binding;
pub mod builder;
pub mod cache;
pub mod driver;
pub mod translator;
pub mod ucode;
pub mod validate;

mod alu;
mod control_flow;
mod operand;
mod vertex_fetch;

pub use binding::DescriptorSet;
pub use builder::{FloatValue, ModuleBuilder};
pub use driver::ShaderProgram;
pub use translator::{ShaderInfo, ShaderTranslator};
pub use ucode::*;
pub use validate::{check_module, words_from_bytes, ModuleSummary};
