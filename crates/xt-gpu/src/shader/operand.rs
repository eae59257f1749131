//! Operand loading and result storing
//!
//! Operands are read as a whole `float4` from their storage, then swizzled
//! down to the components an instruction needs and modified (abs, negate).
//! Results go the other way: the computed value is swizzled into the write
//! mask, constant 0/1 components are mixed in, and partially written targets
//! are read back first.

use rspirv::spirv::{GLOp, StorageClass, Word};
use tracing::trace;
use xt_core::{Result, TranslatorError, UnsupportedError};

use super::builder::FloatValue;
use super::translator::Translation;
use super::ucode::{
    InstructionOperand, InstructionResult, StorageAddressingMode, StorageSource, StorageTarget,
    SwizzleSource,
};

/// Shuffle index of a constant swizzle component, given the width of the
/// first shuffle operand. The second operand is the `float2(0, 1)` constant.
fn constant_shuffle_index(first_components: u32, source: SwizzleSource) -> u32 {
    first_components + u32::from(source == SwizzleSource::One)
}

impl Translation {
    /// The `float2(0, 1)` vector constant components are shuffled in from.
    fn zero_one(&mut self) -> Word {
        self.b.float_vector_constant(&[0.0, 1.0])
    }

    /// Storage index with a0 or aL applied, as an `int`.
    pub(super) fn storage_addressing_index(
        &mut self,
        mode: StorageAddressingMode,
        index: u32,
    ) -> Result<Word> {
        self.b.ensure_build_point_available()?;
        let int = self.b.types.int;
        let base = match mode {
            StorageAddressingMode::Static => return Ok(self.b.int_constant(index as i32)),
            StorageAddressingMode::AddressAbsolute => {
                self.b.load(int, None, self.var_address_absolute, None, [])?
            }
            StorageAddressingMode::AddressRelative => {
                // aL of the innermost loop is X of the stack.
                let pointer = self.b.pointer_type(StorageClass::Function, int);
                let zero = self.b.int_constant(0);
                let chain = self
                    .b
                    .access_chain(pointer, None, self.var_address_relative, [zero])?;
                self.b.load(int, None, chain, None, [])?
            }
        };
        if index == 0 {
            return Ok(base);
        }
        let offset = self.b.int_constant(index as i32);
        Ok(self.b.i_add(int, None, base, offset)?)
    }

    /// Load the whole `float4` an operand reads from.
    pub(super) fn load_operand_storage(&mut self, operand: &InstructionOperand) -> Result<Word> {
        let float4 = self.b.types.float_vector(4);
        let (variable, storage_class, prefix) = match operand.storage_source {
            StorageSource::Register => (self.var_registers, StorageClass::Function, None),
            StorageSource::ConstantFloat => (self.float_constants, StorageClass::Uniform, Some(0)),
            other => return Err(UnsupportedError::StorageSource(other as u32).into()),
        };
        let Some(variable) = variable else {
            trace!("{:?} operand without storage, reading zero", operand.storage_source);
            return Ok(self.b.float_splat(0.0, 4));
        };
        let index =
            self.storage_addressing_index(operand.storage_addressing_mode, operand.storage_index)?;
        let mut indices = Vec::with_capacity(2);
        if let Some(member) = prefix {
            indices.push(self.b.int_constant(member));
        }
        indices.push(index);
        let pointer = self.b.pointer_type(storage_class, float4);
        let chain = self.b.access_chain(pointer, None, variable, indices)?;
        Ok(self.b.load(float4, None, chain, None, [])?)
    }

    /// Swizzle the components in `mask` out of an operand's storage.
    pub(super) fn unmodified_operand_components(
        &mut self,
        storage: Word,
        operand: &InstructionOperand,
        mask: u32,
    ) -> Result<FloatValue> {
        let mask = mask & 0b1111;
        if mask == 0 {
            return Err(TranslatorError::Builder("operand read with an empty mask".to_string()));
        }
        if mask == 0b1111 && operand.is_standard_swizzle() {
            return Ok(FloatValue::new(storage, 4));
        }
        self.b.ensure_build_point_available()?;
        let sources: Vec<SwizzleSource> = (0..4)
            .filter(|&i| mask & (1 << i) != 0)
            .map(|i| operand.component(i))
            .collect();
        let count = sources.len() as u32;

        if let [source] = sources[..] {
            let id = match source {
                SwizzleSource::Zero => self.b.float_constant(0.0),
                SwizzleSource::One => self.b.float_constant(1.0),
                _ => {
                    let float = self.b.types.float;
                    let index = source.component_index().unwrap_or(0);
                    self.b.composite_extract(float, None, storage, [index])?
                }
            };
            return Ok(FloatValue::new(id, 1));
        }

        if sources.iter().all(|s| !s.is_constant()) {
            let indices: Vec<u32> = sources.iter().filter_map(|s| s.component_index()).collect();
            let id = self.b.swizzle(storage, &indices)?;
            return Ok(FloatValue::new(id, count));
        }
        let zero_one = self.zero_one();
        let indices: Vec<u32> = sources
            .iter()
            .map(|&s| s.component_index().unwrap_or_else(|| constant_shuffle_index(4, s)))
            .collect();
        let ty = self.b.types.float_vector(count);
        let id = self.b.vector_shuffle(ty, None, storage, zero_one, indices)?;
        Ok(FloatValue::new(id, count))
    }

    /// Apply the absolute value and negation modifiers.
    ///
    /// `invert_negate` flips the negation, `force_absolute` takes the absolute
    /// value regardless of the operand.
    pub(super) fn apply_operand_modifiers(
        &mut self,
        value: FloatValue,
        operand: &InstructionOperand,
        invert_negate: bool,
        force_absolute: bool,
    ) -> Result<FloatValue> {
        let ty = self.b.types.float_vector(value.components);
        let mut id = value.id;
        if operand.is_absolute_value || force_absolute {
            self.b.ensure_build_point_available()?;
            id = self.b.glsl(ty, GLOp::FAbs, &[id])?;
        }
        if operand.is_negated != invert_negate {
            self.b.ensure_build_point_available()?;
            id = self.b.f_negate(ty, None, id)?;
            self.b.no_contraction(id);
        }
        Ok(FloatValue::new(id, value.components))
    }

    /// Swizzled and modified components of an operand.
    pub(super) fn operand_components(
        &mut self,
        storage: Word,
        operand: &InstructionOperand,
        mask: u32,
    ) -> Result<FloatValue> {
        let value = self.unmodified_operand_components(storage, operand, mask)?;
        self.apply_operand_modifiers(value, operand, false, false)
    }

    /// Pointer to the storage of a result and its component count, `None` if
    /// the target isn't backed by anything in this shader.
    fn result_target(&mut self, result: &InstructionResult) -> Result<Option<(Word, u32)>> {
        let float4 = self.b.types.float_vector(4);
        let target = match result.storage_target {
            StorageTarget::Register => match self.var_registers {
                Some(registers) => {
                    let index = self
                        .storage_addressing_index(result.storage_addressing_mode, result.storage_index)?;
                    let pointer = self.b.pointer_type(StorageClass::Function, float4);
                    Some((self.b.access_chain(pointer, None, registers, [index])?, 4))
                }
                None => None,
            },
            StorageTarget::Position => match self.per_vertex {
                Some(per_vertex) => {
                    let pointer = self.b.pointer_type(StorageClass::Output, float4);
                    let zero = self.b.int_constant(0);
                    Some((self.b.access_chain(pointer, None, per_vertex, [zero])?, 4))
                }
                None => None,
            },
            StorageTarget::PointSizeEdgeFlagKillVertex => {
                self.var_point_size_edge_flag_kill_vertex.map(|var| (var, 3))
            }
            _ => None,
        };
        if target.is_none() {
            trace!("Dropping write to {:?}", result.storage_target);
        }
        Ok(target)
    }

    /// Write a value to an instruction result.
    ///
    /// `value` holds the components of `used_result_components()` in order,
    /// or a scalar to replicate. `None` writes zeros to every non-constant
    /// component.
    pub(super) fn store_result(
        &mut self,
        result: &InstructionResult,
        value: Option<FloatValue>,
    ) -> Result<()> {
        let used_write_mask = result.used_write_mask();
        if used_write_mask == 0 {
            return Ok(());
        }
        self.b.ensure_build_point_available()?;
        let Some((target_pointer, target_components)) = self.result_target(result)? else {
            return Ok(());
        };

        let (mut constant_components, constant_values) = result.used_constant_components();
        if value.is_none() {
            constant_components = used_write_mask;
        }
        let non_constant_components = used_write_mask & !constant_components;

        let mut value = match value {
            Some(value) => value,
            None => FloatValue::new(self.b.float_constant(0.0), 1),
        };

        if result.is_clamped && non_constant_components != 0 {
            let ty = self.b.types.float_vector(value.components);
            let zero = self.b.float_splat(0.0, value.components);
            let one = self.b.float_splat(1.0, value.components);
            value.id = self.b.glsl(ty, GLOp::NClamp, &[value.id, zero, one])?;
        }

        // Where each written component comes from in `value`.
        let mut unswizzled = [0u32; 4];
        if value.components > 1 {
            let used_result_components = result.used_result_components();
            let mut next = 0;
            for (component, slot) in unswizzled.iter_mut().enumerate() {
                if used_result_components & (1 << component) != 0 {
                    *slot = next.min(value.components - 1);
                    next += 1;
                }
            }
        }
        let mut swizzled = [0u32; 4];
        for (i, slot) in swizzled.iter_mut().enumerate() {
            if non_constant_components & (1 << i) == 0 {
                continue;
            }
            if let Some(component) = result.components[i].component_index() {
                *slot = unswizzled[component as usize];
            }
        }

        let float = self.b.types.float;
        let target_type = self.b.types.float_vector(target_components);
        let target_mask = (1u32 << target_components) - 1;
        let constant = |i: u32| constant_values & (1 << i) != 0;

        let value_to_store = if used_write_mask == target_mask {
            if constant_components == 0 {
                // Only the computed value.
                if target_components > 1 {
                    if value.components > 1 {
                        let identity = value.components == target_components
                            && (0..target_components).all(|i| swizzled[i as usize] == i);
                        if identity {
                            value.id
                        } else {
                            let indices = swizzled[..target_components as usize].iter().copied();
                            self.b
                                .vector_shuffle(target_type, None, value.id, value.id, indices)?
                        }
                    } else {
                        let parts = vec![value.id; target_components as usize];
                        self.b.composite_construct(target_type, None, parts)?
                    }
                } else if value.components > 1 {
                    self.b.composite_extract(float, None, value.id, [swizzled[0]])?
                } else {
                    value.id
                }
            } else if non_constant_components == 0 {
                // Only constants.
                let values: Vec<f32> = (0..target_components)
                    .map(|i| if constant(i) { 1.0 } else { 0.0 })
                    .collect();
                self.b.float_vector_constant(&values)
            } else if value.components > 1 {
                // Mixed: shuffle the value with float2(0, 1).
                let zero_one = self.zero_one();
                let indices: Vec<u32> = (0..target_components)
                    .map(|i| {
                        if constant_components & (1 << i) != 0 {
                            value.components + u32::from(constant(i))
                        } else {
                            swizzled[i as usize]
                        }
                    })
                    .collect();
                self.b
                    .vector_shuffle(target_type, None, value.id, zero_one, indices)?
            } else {
                let zero = self.b.float_constant(0.0);
                let one = self.b.float_constant(1.0);
                let parts: Vec<Word> = (0..target_components)
                    .map(|i| {
                        if constant_components & (1 << i) == 0 {
                            value.id
                        } else if constant(i) {
                            one
                        } else {
                            zero
                        }
                    })
                    .collect();
                self.b.composite_construct(target_type, None, parts)?
            }
        } else {
            // Partial write: merge into what's already there.
            let mut current = self.b.load(target_type, None, target_pointer, None, [])?;
            if constant_components != 0 {
                let zero_one = self.zero_one();
                let indices: Vec<u32> = (0..target_components)
                    .map(|i| {
                        if constant_components & (1 << i) != 0 {
                            target_components + u32::from(constant(i))
                        } else {
                            i
                        }
                    })
                    .collect();
                current = self
                    .b
                    .vector_shuffle(target_type, None, current, zero_one, indices)?;
            }
            if non_constant_components != 0 {
                if value.components > 1 {
                    let indices: Vec<u32> = (0..target_components)
                        .map(|i| {
                            if non_constant_components & (1 << i) != 0 {
                                target_components + swizzled[i as usize]
                            } else {
                                i
                            }
                        })
                        .collect();
                    current = self
                        .b
                        .vector_shuffle(target_type, None, current, value.id, indices)?;
                } else {
                    for i in (0..target_components).filter(|&i| non_constant_components & (1 << i) != 0) {
                        current = self
                            .b
                            .composite_insert(target_type, None, value.id, current, [i])?;
                    }
                }
            }
            current
        };

        self.b.store(target_pointer, value_to_store, None, [])?;
        Ok(())
    }
}
