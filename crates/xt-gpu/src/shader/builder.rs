//! SPIR-V module builder used by the translator
//!
//! Wraps the `rspirv` data representation builder with what the translator
//! needs on top of it: insertion-point tracking (the label of the block being
//! filled), interned types and constants, decorated array and pointer types,
//! GLSL.std.450 calls and vector concatenation. Plain instructions are emitted
//! through `Deref` to the underlying builder.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use rspirv::binary::Assemble;
use rspirv::dr::{Builder, Instruction, Operand};
use rspirv::spirv::{
    AddressingModel, Capability, Decoration, GLOp, MemoryModel, Op, StorageClass, Word,
};
use xt_core::{Result, SpirvVersion, TranslatorError};

use super::cache::{ConstantCache, TypeCache};

/// Generator magic: tool 26, version 1.
pub const GENERATOR_ID: u32 = (26 << 16) | 1;

/// A float scalar or vector value together with its width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatValue {
    pub id: Word,
    /// 1 for a scalar.
    pub components: u32,
}

impl FloatValue {
    pub fn new(id: Word, components: u32) -> Self {
        Self { id, components }
    }
}

/// Module builder
pub struct ModuleBuilder {
    spv: Builder,
    pub types: TypeCache,
    constants: ConstantCache,
    pointer_types: HashMap<(u32, Word), Word>,
    array_types: HashMap<(Word, u32, u32), Word>,
    glsl_std_450: Word,
    current_label: Option<Word>,
    emit_names: bool,
}

impl Deref for ModuleBuilder {
    type Target = Builder;

    fn deref(&self) -> &Builder {
        &self.spv
    }
}

impl DerefMut for ModuleBuilder {
    fn deref_mut(&mut self) -> &mut Builder {
        &mut self.spv
    }
}

impl ModuleBuilder {
    /// Create a builder with the header, the Shader capability, the GLSL
    /// extended instruction set and the common types already emitted.
    pub fn new(version: SpirvVersion, emit_names: bool) -> Self {
        let mut spv = Builder::new();
        let (major, minor) = version.major_minor();
        spv.set_version(major, minor);
        spv.capability(Capability::Shader);
        let glsl_std_450 = spv.ext_inst_import("GLSL.std.450");
        spv.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let types = TypeCache::new(&mut spv);
        Self {
            spv,
            types,
            constants: ConstantCache::new(),
            pointer_types: HashMap::new(),
            array_types: HashMap::new(),
            glsl_std_450,
            current_label: None,
            emit_names,
        }
    }

    /// Attach a debug name if names are enabled.
    pub fn debug_name(&mut self, id: Word, name: &str) {
        if self.emit_names {
            self.spv.name(id, name);
        }
    }

    pub fn debug_member_name(&mut self, id: Word, member: u32, name: &str) {
        if self.emit_names {
            self.spv.member_name(id, member, name);
        }
    }

    //=========================================================================
    // Constants
    //=========================================================================

    pub fn float_constant(&mut self, value: f32) -> Word {
        let ty = self.types.float;
        self.constants.scalar(&mut self.spv, ty, value.to_bits())
    }

    pub fn int_constant(&mut self, value: i32) -> Word {
        let ty = self.types.int;
        self.constants.scalar(&mut self.spv, ty, value as u32)
    }

    pub fn uint_constant(&mut self, value: u32) -> Word {
        let ty = self.types.uint;
        self.constants.scalar(&mut self.spv, ty, value)
    }

    pub fn bool_constant(&mut self, value: bool) -> Word {
        let ty = self.types.boolean;
        self.constants.bool(&mut self.spv, ty, value)
    }

    pub fn composite_constant(&mut self, ty: Word, constituents: Vec<Word>) -> Word {
        self.constants.composite(&mut self.spv, ty, constituents)
    }

    /// A float scalar or vector constant with the given components.
    pub fn float_vector_constant(&mut self, values: &[f32]) -> Word {
        let ids: Vec<Word> = values.iter().map(|&v| self.float_constant(v)).collect();
        if ids.len() == 1 {
            return ids[0];
        }
        let ty = self.types.float_vector(ids.len() as u32);
        self.composite_constant(ty, ids)
    }

    /// A float scalar or vector constant with all components equal.
    pub fn float_splat(&mut self, value: f32, components: u32) -> Word {
        self.float_vector_constant(&vec![value; components.clamp(1, 4) as usize])
    }

    pub fn int_splat(&mut self, value: i32, components: u32) -> Word {
        let scalar = self.int_constant(value);
        if components <= 1 {
            return scalar;
        }
        let ty = self.types.int_vector(components);
        self.composite_constant(ty, vec![scalar; components as usize])
    }

    pub fn uint_splat(&mut self, value: u32, components: u32) -> Word {
        let scalar = self.uint_constant(value);
        if components <= 1 {
            return scalar;
        }
        let ty = self.types.uint_vector(components);
        self.composite_constant(ty, vec![scalar; components as usize])
    }

    //=========================================================================
    // Types
    //=========================================================================

    pub fn pointer_type(&mut self, storage_class: StorageClass, pointee: Word) -> Word {
        let key = (storage_class as u32, pointee);
        if let Some(&ty) = self.pointer_types.get(&key) {
            return ty;
        }
        let ty = self.spv.type_pointer(None, storage_class, pointee);
        self.pointer_types.insert(key, ty);
        ty
    }

    /// A sized array type, decorated with `ArrayStride` when `stride` is set.
    pub fn array_type(&mut self, element: Word, length: u32, stride: Option<u32>) -> Word {
        let key = (element, length, stride.unwrap_or(0));
        if let Some(&ty) = self.array_types.get(&key) {
            return ty;
        }
        let length_id = self.uint_constant(length);
        // Every array gets its own id, so the laid-out variant's decoration
        // can't leak onto an identical array used for function-local storage.
        let ty = self.spv.id();
        self.spv.module_mut().types_global_values.push(Instruction::new(
            Op::TypeArray,
            None,
            Some(ty),
            vec![Operand::IdRef(element), Operand::IdRef(length_id)],
        ));
        if let Some(stride) = stride {
            self.spv
                .decorate(ty, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
        }
        self.array_types.insert(key, ty);
        ty
    }

    //=========================================================================
    // Blocks
    //=========================================================================

    /// Begin a block and make it the insertion point.
    pub fn begin_block(&mut self, label: Option<Word>) -> Result<Word> {
        let label = self.spv.begin_block(label)?;
        self.current_label = Some(label);
        Ok(label)
    }

    /// Resume filling an unterminated block by its index in the current function.
    pub fn resume_block(&mut self, index: usize, label: Word) -> Result<()> {
        self.spv.select_block(Some(index))?;
        self.current_label = Some(label);
        Ok(())
    }

    /// Leave the current block unterminated, to be resumed later.
    ///
    /// Returns its index in the current function.
    pub fn suspend_block(&mut self) -> Result<usize> {
        let index = self
            .spv
            .selected_block()
            .ok_or_else(|| TranslatorError::Builder("no block to suspend".to_string()))?;
        self.spv.select_block(None)?;
        self.current_label = None;
        Ok(index)
    }

    /// Whether the insertion point has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.spv.selected_block().is_none()
    }

    /// Label of the block being filled.
    pub fn current_label(&self) -> Result<Word> {
        match self.current_label {
            Some(label) if !self.is_terminated() => Ok(label),
            _ => Err(TranslatorError::Builder("no block selected".to_string())),
        }
    }

    /// Open a fresh, unreachable block if the current one is terminated.
    pub fn ensure_build_point_available(&mut self) -> Result<()> {
        if self.is_terminated() {
            self.begin_block(None)?;
        }
        Ok(())
    }

    /// Branch to `target` unless the current block is already terminated.
    pub fn branch_if_open(&mut self, target: Word) -> Result<()> {
        if !self.is_terminated() {
            self.spv.branch(target)?;
        }
        Ok(())
    }

    //=========================================================================
    // Instructions
    //=========================================================================

    /// Call a GLSL.std.450 extended instruction.
    pub fn glsl(&mut self, result_type: Word, op: GLOp, operands: &[Word]) -> Result<Word> {
        let set = self.glsl_std_450;
        Ok(self.spv.ext_inst(
            result_type,
            None,
            set,
            op as u32,
            operands.iter().map(|&id| Operand::IdRef(id)),
        )?)
    }

    pub fn no_contraction(&mut self, id: Word) {
        self.spv.decorate(id, Decoration::NoContraction, []);
    }

    /// Select components of a float vector; one index gives a scalar.
    pub fn swizzle(&mut self, value: Word, indices: &[u32]) -> Result<Word> {
        if indices.len() == 1 {
            let ty = self.types.float;
            return Ok(self.spv.composite_extract(ty, None, value, [indices[0]])?);
        }
        let ty = self.types.float_vector(indices.len() as u32);
        Ok(self
            .spv
            .vector_shuffle(ty, None, value, value, indices.iter().copied())?)
    }

    /// Concatenate float scalars and vectors into one value.
    pub fn concat_float_vectors(&mut self, parts: &[FloatValue]) -> Result<FloatValue> {
        match parts {
            [] => Err(TranslatorError::Builder("empty concatenation".to_string())),
            [single] => Ok(*single),
            _ => {
                let components: u32 = parts.iter().map(|p| p.components).sum();
                let ty = self.types.float_vector(components);
                let id = self
                    .spv
                    .composite_construct(ty, None, parts.iter().map(|p| p.id))?;
                Ok(FloatValue::new(id, components))
            }
        }
    }

    /// Finish the module and return its words.
    pub fn finish(self) -> Vec<u32> {
        let mut module = self.spv.module();
        if let Some(header) = module.header.as_mut() {
            header.generator = GENERATOR_ID;
        }
        module.assemble()
    }
}
