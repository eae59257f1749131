//! Parsed Xenos shader instruction records
//!
//! The microcode parser produces these; the translator consumes them through
//! its `process_*` callbacks in program order.

use crate::vertex::VertexFormat;
use crate::xenos::SignedRepeatingFractionMode;

//=============================================================================
// OPERANDS AND RESULTS
//=============================================================================

/// Source of one component of a swizzle
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwizzleSource {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
    Zero = 4,
    One = 5,
}

impl SwizzleSource {
    /// Index of the source vector component, `None` for constants.
    pub fn component_index(self) -> Option<u32> {
        match self {
            SwizzleSource::Zero | SwizzleSource::One => None,
            other => Some(other as u32),
        }
    }

    pub fn is_constant(self) -> bool {
        self.component_index().is_none()
    }
}

impl From<u32> for SwizzleSource {
    fn from(v: u32) -> Self {
        match v {
            0 => SwizzleSource::X,
            1 => SwizzleSource::Y,
            2 => SwizzleSource::Z,
            3 => SwizzleSource::W,
            4 => SwizzleSource::Zero,
            _ => SwizzleSource::One,
        }
    }
}

/// XYZW in order.
pub const STANDARD_SWIZZLE: [SwizzleSource; 4] =
    [SwizzleSource::X, SwizzleSource::Y, SwizzleSource::Z, SwizzleSource::W];

/// Where an operand is read from
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageSource {
    Register = 0,
    ConstantFloat = 1,
    VertexFetchConstant = 2,
    TextureFetchConstant = 3,
}

/// How the storage index of an operand or result is formed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageAddressingMode {
    /// The index is used as is.
    #[default]
    Static,
    /// The index is added to a0.
    AddressAbsolute,
    /// The index is added to aL of the innermost loop.
    AddressRelative,
}

/// Where a result is written
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageTarget {
    #[default]
    None = 0,
    Register = 1,
    Interpolator = 2,
    Position = 3,
    /// X: point size, Y: edge flag, Z: kill vertex
    PointSizeEdgeFlagKillVertex = 4,
    Color = 5,
    Depth = 6,
}

impl StorageTarget {
    /// Number of components the target holds.
    pub fn component_count(self) -> u32 {
        match self {
            StorageTarget::None => 0,
            StorageTarget::PointSizeEdgeFlagKillVertex => 3,
            StorageTarget::Depth => 1,
            _ => 4,
        }
    }
}

/// A source operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionOperand {
    pub storage_source: StorageSource,
    pub storage_index: u32,
    pub storage_addressing_mode: StorageAddressingMode,
    pub is_negated: bool,
    pub is_absolute_value: bool,
    /// Number of swizzle components present, 1 to 4. Missing ones repeat the last.
    pub component_count: u32,
    pub components: [SwizzleSource; 4],
}

impl InstructionOperand {
    /// A register operand with the identity swizzle.
    pub fn register(index: u32) -> Self {
        Self {
            storage_source: StorageSource::Register,
            storage_index: index,
            storage_addressing_mode: StorageAddressingMode::Static,
            is_negated: false,
            is_absolute_value: false,
            component_count: 4,
            components: STANDARD_SWIZZLE,
        }
    }

    /// A float constant operand with the identity swizzle.
    pub fn float_constant(index: u32) -> Self {
        Self {
            storage_source: StorageSource::ConstantFloat,
            ..Self::register(index)
        }
    }

    pub fn with_swizzle(mut self, components: &[SwizzleSource]) -> Self {
        let count = components.len().clamp(1, 4);
        self.component_count = count as u32;
        self.components[..count].copy_from_slice(&components[..count]);
        self
    }

    pub fn with_addressing(mut self, mode: StorageAddressingMode) -> Self {
        self.storage_addressing_mode = mode;
        self
    }

    pub fn negated(mut self) -> Self {
        self.is_negated = true;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.is_absolute_value = true;
        self
    }

    /// Swizzle source of a destination component.
    pub fn component(&self, index: u32) -> SwizzleSource {
        let last = self.component_count.clamp(1, 4) - 1;
        self.components[index.min(last) as usize]
    }

    pub fn is_standard_swizzle(&self) -> bool {
        self.component_count == 4 && self.components == STANDARD_SWIZZLE
    }

    /// Mask of components that read the same value in both operands.
    pub fn identical_components(&self, other: &InstructionOperand) -> u32 {
        if self.storage_source != other.storage_source
            || self.storage_index != other.storage_index
            || self.storage_addressing_mode != other.storage_addressing_mode
            || self.is_negated != other.is_negated
            || self.is_absolute_value != other.is_absolute_value
        {
            return 0;
        }
        (0..4)
            .filter(|&i| self.component(i) == other.component(i))
            .fold(0, |mask, i| mask | (1 << i))
    }
}

/// The destination of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionResult {
    pub storage_target: StorageTarget,
    pub storage_addressing_mode: StorageAddressingMode,
    pub storage_index: u32,
    /// Write mask as encoded, before clipping to the target's size.
    pub original_write_mask: u32,
    /// Per destination component: a source component of the computed value or a constant.
    pub components: [SwizzleSource; 4],
    /// Saturate to [0, 1].
    pub is_clamped: bool,
}

impl Default for InstructionResult {
    fn default() -> Self {
        Self {
            storage_target: StorageTarget::None,
            storage_addressing_mode: StorageAddressingMode::Static,
            storage_index: 0,
            original_write_mask: 0,
            components: STANDARD_SWIZZLE,
            is_clamped: false,
        }
    }
}

impl InstructionResult {
    pub fn register(index: u32, write_mask: u32) -> Self {
        Self {
            storage_target: StorageTarget::Register,
            storage_index: index,
            original_write_mask: write_mask,
            ..Self::default()
        }
    }

    pub fn position(write_mask: u32) -> Self {
        Self {
            storage_target: StorageTarget::Position,
            original_write_mask: write_mask,
            ..Self::default()
        }
    }

    pub fn with_swizzle(mut self, components: [SwizzleSource; 4]) -> Self {
        self.components = components;
        self
    }

    pub fn clamped(mut self) -> Self {
        self.is_clamped = true;
        self
    }

    /// Write mask limited to the components the target actually has.
    pub fn used_write_mask(&self) -> u32 {
        self.original_write_mask & ((1 << self.storage_target.component_count()) - 1)
    }

    /// Components of the computed value that are needed by the write.
    pub fn used_result_components(&self) -> u32 {
        let write_mask = self.used_write_mask();
        (0..4)
            .filter(|&i| write_mask & (1 << i) != 0)
            .filter_map(|i| self.components[i as usize].component_index())
            .fold(0, |mask, c| mask | (1 << c))
    }

    /// Written components that receive a constant, and which of them are 1.
    pub fn used_constant_components(&self) -> (u32, u32) {
        let write_mask = self.used_write_mask();
        let mut mask = 0;
        let mut ones = 0;
        for i in 0..4 {
            if write_mask & (1 << i) == 0 {
                continue;
            }
            match self.components[i as usize] {
                SwizzleSource::Zero => mask |= 1 << i,
                SwizzleSource::One => {
                    mask |= 1 << i;
                    ones |= 1 << i;
                }
                _ => {}
            }
        }
        (mask, ones)
    }
}

//=============================================================================
// CONTROL FLOW
//=============================================================================

/// Exec and jump condition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecType {
    Unconditional,
    /// Taken when a boolean constant equals `condition`.
    Conditional,
    /// Taken when p0 equals `condition`.
    Predicated,
}

/// Exec block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecInstruction {
    pub exec_type: ExecType,
    pub bool_constant_index: u32,
    pub condition: bool,
    /// Shader ends after this block.
    pub is_end: bool,
}

impl ExecInstruction {
    pub fn unconditional() -> Self {
        Self {
            exec_type: ExecType::Unconditional,
            bool_constant_index: 0,
            condition: false,
            is_end: false,
        }
    }

    pub fn conditional(bool_constant_index: u32, condition: bool) -> Self {
        Self {
            exec_type: ExecType::Conditional,
            bool_constant_index,
            condition,
            is_end: false,
        }
    }

    pub fn predicated(condition: bool) -> Self {
        Self {
            exec_type: ExecType::Predicated,
            bool_constant_index: 0,
            condition,
            is_end: false,
        }
    }

    pub fn ending(mut self) -> Self {
        self.is_end = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStartInstruction {
    pub loop_constant_index: u32,
    /// Keep the enclosing aL instead of loading it from the loop constant.
    pub is_repeat: bool,
    /// Label reached when the iteration count is zero.
    pub loop_skip_address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopEndInstruction {
    pub loop_constant_index: u32,
    /// Break early when p0 equals `predicate_condition`.
    pub is_predicated_break: bool,
    pub predicate_condition: bool,
    /// Label of the first instruction of the loop body.
    pub loop_body_address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpInstruction {
    pub jump_type: ExecType,
    pub bool_constant_index: u32,
    pub condition: bool,
    pub target_address: u32,
}

//=============================================================================
// ALU
//=============================================================================

/// ALU vector opcodes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluVectorOpcode {
    Add = 0,
    Mul = 1,
    Max = 2,
    Min = 3,
    Seq = 4,
    Sgt = 5,
    Sge = 6,
    Sne = 7,
    Frc = 8,
    Trunc = 9,
    Floor = 10,
    Mad = 11,
    CndEq = 12,
    CndGe = 13,
    CndGt = 14,
    Dp4 = 15,
    Dp3 = 16,
    Dp2Add = 17,
    Cube = 18,
    Max4 = 19,
    SetpEqPush = 20,
    SetpNePush = 21,
    SetpGtPush = 22,
    SetpGePush = 23,
    KillEq = 24,
    KillGt = 25,
    KillGe = 26,
    KillNe = 27,
    Dst = 28,
    MaxA = 29,
}

impl AluVectorOpcode {
    /// Number of source operands.
    pub fn operand_count(self) -> usize {
        use AluVectorOpcode::*;
        match self {
            Frc | Trunc | Floor | Cube | Max4 => 1,
            Mad | CndEq | CndGe | CndGt | Dp2Add => 3,
            _ => 2,
        }
    }

    /// Whether the opcode does something besides producing its result.
    pub fn has_side_effects(self) -> bool {
        use AluVectorOpcode::*;
        matches!(
            self,
            SetpEqPush | SetpNePush | SetpGtPush | SetpGePush | KillEq | KillGt | KillGe | KillNe | MaxA
        )
    }
}

/// A paired vector and scalar ALU instruction (only the vector half is modelled)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluInstruction {
    pub is_predicated: bool,
    pub predicate_condition: bool,
    pub vector_opcode: AluVectorOpcode,
    pub vector_operands: Vec<InstructionOperand>,
    pub vector_and_constant_result: InstructionResult,
}

impl AluInstruction {
    pub fn new(
        vector_opcode: AluVectorOpcode,
        vector_operands: Vec<InstructionOperand>,
        result: InstructionResult,
    ) -> Self {
        Self {
            is_predicated: false,
            predicate_condition: false,
            vector_opcode,
            vector_operands,
            vector_and_constant_result: result,
        }
    }

    pub fn predicated(mut self, condition: bool) -> Self {
        self.is_predicated = true;
        self.predicate_condition = condition;
        self
    }

    /// Writes nothing and has no side effects.
    pub fn is_nop(&self) -> bool {
        self.vector_and_constant_result.used_write_mask() == 0
            && !self.vector_opcode.has_side_effects()
    }
}

//=============================================================================
// FETCH
//=============================================================================

/// Decoding parameters of a vertex fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexFetchAttributes {
    pub data_format: VertexFormat,
    /// Offset in dwords from the start of the vertex.
    pub offset: i32,
    /// Vertex stride in dwords. Zero reads the same vertex for every index.
    pub stride: u32,
    /// Power of two the result is multiplied by.
    pub exp_adjust: i32,
    /// Add 0.5 to the index before flooring.
    pub is_index_rounded: bool,
    pub is_signed: bool,
    /// Skip normalization.
    pub is_integer: bool,
    pub signed_rf_mode: SignedRepeatingFractionMode,
}

impl VertexFetchAttributes {
    pub fn new(data_format: VertexFormat) -> Self {
        Self {
            data_format,
            offset: 0,
            stride: 0,
            exp_adjust: 0,
            is_index_rounded: false,
            is_signed: false,
            is_integer: false,
            signed_rf_mode: SignedRepeatingFractionMode::ZeroClampMinusOne,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexFetchInstruction {
    pub is_predicated: bool,
    pub predicate_condition: bool,
    /// The vertex index operand; its X component is used.
    pub index_operand: InstructionOperand,
    /// Vertex fetch constant slot, 0 to 95.
    pub fetch_constant_index: u32,
    pub result: InstructionResult,
    pub attributes: VertexFetchAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFetchInstruction {
    pub is_predicated: bool,
    pub predicate_condition: bool,
    pub result: InstructionResult,
}

//=============================================================================
// INSTRUCTION STREAM
//=============================================================================

/// One record of a parsed shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Start of the control flow instruction at this index, a jump or loop target.
    Label(u32),
    /// An exec block with its ALU and fetch instructions.
    Exec {
        exec: ExecInstruction,
        body: Vec<Instruction>,
    },
    LoopStart(LoopStartInstruction),
    LoopEnd(LoopEndInstruction),
    Jump(JumpInstruction),
    Alu(AluInstruction),
    VertexFetch(VertexFetchInstruction),
    TextureFetch(TextureFetchInstruction),
}
