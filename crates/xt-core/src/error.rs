//! Error types for the Xenos shader translator

use thiserror::Error;

/// Main error type for shader translation
///
/// Every variant is fatal for the shader being translated. Translation is
/// deterministic, so none of them can be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslatorError {
    #[error("Malformed control flow: {0}")]
    MalformedControlFlow(#[from] ControlFlowError),

    #[error("Unsupported input: {0}")]
    Unsupported(#[from] UnsupportedError),

    #[error("Module builder error: {0}")]
    Builder(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Violations of the control flow contract by the instruction stream
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlowError {
    #[error("jump or loop to unknown label {target}")]
    UnknownLabel { target: u32 },

    #[error("label {address} has no dispatch case")]
    LabelOutsideDispatch { address: u32 },

    #[error("label {address} declared twice")]
    DuplicateLabel { address: u32 },

    #[error("loop end for loop constant {loop_constant} without a matching loop start")]
    UnbalancedLoopEnd { loop_constant: u32 },

    #[error("{open} loop(s) still open at the end of the program")]
    UnclosedLoop { open: u32 },

    #[error("translation callback before start_translation")]
    NotStarted,

    #[error("start_translation called twice")]
    AlreadyStarted,
}

/// Input the translator has no coverage for
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedError {
    #[error("vertex format {0}")]
    VertexFormat(u32),

    #[error("ALU vector opcode {0}")]
    AluVectorOpcode(u32),

    #[error("operand storage source {0}")]
    StorageSource(u32),
}

impl From<rspirv::dr::Error> for TranslatorError {
    fn from(err: rspirv::dr::Error) -> Self {
        Self::Builder(format!("{:?}", err))
    }
}

impl From<std::io::Error> for TranslatorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for translator operations
pub type Result<T> = std::result::Result<T, TranslatorError>;
