//! ALU vector instructions
//!
//! Multiplication follows the Direct3D 9 rule that +0 or -0 times anything,
//! infinity and NaN included, is +0. Shaders rely on it (multiplying by a
//! zeroed constant to disable a term), so any product whose factors aren't
//! known to be the same value is checked with `min(|a|, |b|) == 0`.

use rspirv::spirv::{GLOp, SelectionControl, Word};
use tracing::warn;
use xt_core::{Result, TranslatorError, UnsupportedError};

use super::builder::FloatValue;
use super::translator::Translation;
use super::ucode::{AluInstruction, AluVectorOpcode, InstructionOperand};
use crate::xenos::ShaderType;

/// Float comparisons used by the vector opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compare {
    Equal,
    /// Unordered, so NaN != x is true.
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
}

impl Compare {
    /// Comparison of the set, kill, setp and cnd families.
    fn of(opcode: AluVectorOpcode) -> Option<Self> {
        use AluVectorOpcode::*;
        let compare = match opcode {
            Seq | SetpEqPush | KillEq | CndEq => Compare::Equal,
            Sne | SetpNePush | KillNe => Compare::NotEqual,
            Sgt | SetpGtPush | KillGt | CndGt => Compare::Greater,
            Sge | SetpGePush | KillGe | CndGe | Max | MaxA => Compare::GreaterEqual,
            Min => Compare::Less,
            _ => return None,
        };
        Some(compare)
    }
}

/// Position of `component` among the set bits of `mask`.
fn position_in_mask(mask: u32, component: u32) -> u32 {
    (mask & ((1 << component) - 1)).count_ones()
}

impl Translation {
    pub(super) fn alu(&mut self, instr: &AluInstruction) -> Result<()> {
        if instr.is_nop() {
            return Ok(());
        }
        self.update_instruction_predication(instr.is_predicated, instr.predicate_condition)?;
        let (value, predicate_written) = self.vector_operation(instr)?;
        self.store_result(&instr.vector_and_constant_result, value)?;
        if predicate_written {
            self.predicate_written = true;
            // Following instructions must check the new p0.
            self.close_instruction_predication()?;
        }
        Ok(())
    }

    fn compare(&mut self, compare: Compare, components: u32, a: Word, b: Word) -> Result<Word> {
        let ty = self.b.types.bool_vector(components);
        let id = match compare {
            Compare::Equal => self.b.f_ord_equal(ty, None, a, b)?,
            Compare::NotEqual => self.b.f_unord_not_equal(ty, None, a, b)?,
            Compare::Greater => self.b.f_ord_greater_than(ty, None, a, b)?,
            Compare::GreaterEqual => self.b.f_ord_greater_than_equal(ty, None, a, b)?,
            Compare::Less => self.b.f_ord_less_than(ty, None, a, b)?,
        };
        Ok(id)
    }

    /// One component of a value loaded with `mask`.
    fn component_of(&mut self, value: FloatValue, mask: u32, component: u32) -> Result<Word> {
        if value.components == 1 {
            return Ok(value.id);
        }
        let float = self.b.types.float;
        let index = position_in_mask(mask, component);
        Ok(self.b.composite_extract(float, None, value.id, [index])?)
    }

    /// Replace `product` with +0 where either factor is ±0.
    ///
    /// All three values have `components` components.
    fn zero_guarded_product(
        &mut self,
        components: u32,
        product: Word,
        factors: [(Word, &InstructionOperand); 2],
    ) -> Result<Word> {
        let ty = self.b.types.float_vector(components);
        let mut absolute = [0; 2];
        for (slot, (value, operand)) in absolute.iter_mut().zip(factors) {
            *slot = if operand.is_absolute_value && !operand.is_negated {
                value
            } else {
                self.b.glsl(ty, GLOp::FAbs, &[value])?
            };
        }
        let min = self.b.glsl(ty, GLOp::NMin, &absolute)?;
        let zero = self.b.float_splat(0.0, components);
        let is_zero = self.compare(Compare::Equal, components, min, zero)?;
        Ok(self.b.select(ty, None, is_zero, zero, product)?)
    }

    /// Apply the +0 rule to the `different` components of a `used`-wide product.
    fn zero_guarded_partial_product(
        &mut self,
        used: u32,
        different: u32,
        product: Word,
        factors: [(FloatValue, &InstructionOperand); 2],
    ) -> Result<Word> {
        let used_count = used.count_ones();
        let positions: Vec<u32> = (0..4)
            .filter(|&c| different & (1 << c) != 0)
            .map(|c| position_in_mask(used, c))
            .collect();
        let count = positions.len() as u32;
        if count == used_count {
            return self.zero_guarded_product(
                count,
                product,
                [(factors[0].0.id, factors[0].1), (factors[1].0.id, factors[1].1)],
            );
        }

        let a = self.b.swizzle(factors[0].0.id, &positions)?;
        let b = self.b.swizzle(factors[1].0.id, &positions)?;
        let partial = self.b.swizzle(product, &positions)?;
        let guarded = self.zero_guarded_product(count, partial, [(a, factors[0].1), (b, factors[1].1)])?;

        let ty = self.b.types.float_vector(used_count);
        if count == 1 {
            return Ok(self.b.composite_insert(ty, None, guarded, product, [positions[0]])?);
        }
        let indices: Vec<u32> = (0..used_count)
            .map(|i| match positions.iter().position(|&p| p == i) {
                Some(j) => used_count + j as u32,
                None => i,
            })
            .collect();
        Ok(self.b.vector_shuffle(ty, None, product, guarded, indices)?)
    }

    /// Compute the vector result and whether p0 was written.
    fn vector_operation(&mut self, instr: &AluInstruction) -> Result<(Option<FloatValue>, bool)> {
        use AluVectorOpcode::*;

        let opcode = instr.vector_opcode;
        let used = instr.vector_and_constant_result.used_result_components();
        if used == 0 && !opcode.has_side_effects() {
            return Ok((None, false));
        }
        if opcode == Cube {
            return Err(UnsupportedError::AluVectorOpcode(opcode as u32).into());
        }

        let operand_count = opcode.operand_count();
        let operands = instr.vector_operands.get(..operand_count).ok_or_else(|| {
            TranslatorError::Builder(format!("{:?} needs {} operands", opcode, operand_count))
        })?;
        let mut storage = Vec::with_capacity(operand_count);
        for operand in operands {
            storage.push(self.load_operand_storage(operand)?);
        }

        let used_count = used.count_ones();
        let result_type = self.b.types.float_vector(used_count);
        let float = self.b.types.float;
        let value = |id: Word| Some(FloatValue::new(id, used_count));

        match opcode {
            Add => {
                let a = self.operand_components(storage[0], &operands[0], used)?;
                let b = self.operand_components(storage[1], &operands[1], used)?;
                let sum = self.b.f_add(result_type, None, a.id, b.id)?;
                self.b.no_contraction(sum);
                Ok((value(sum), false))
            }

            Mul | Mad => {
                let a = self.operand_components(storage[0], &operands[0], used)?;
                let b = self.operand_components(storage[1], &operands[1], used)?;
                let mut product = self.b.f_mul(result_type, None, a.id, b.id)?;
                self.b.no_contraction(product);
                let different = used & !operands[0].identical_components(&operands[1]);
                if different != 0 {
                    product = self.zero_guarded_partial_product(
                        used,
                        different,
                        product,
                        [(a, &operands[0]), (b, &operands[1])],
                    )?;
                }
                if opcode == Mad {
                    let c = self.operand_components(storage[2], &operands[2], used)?;
                    product = self.b.f_add(result_type, None, product, c.id)?;
                    self.b.no_contraction(product);
                }
                Ok((value(product), false))
            }

            Max | Min | MaxA => {
                let is_maxa = opcode == MaxA;
                // MaxA also needs W of the first operand for a0.
                let operand_0_mask = if is_maxa { used | 0b1000 } else { used };
                let operand_0 = self.operand_components(storage[0], &operands[0], operand_0_mask)?;
                let mut maxa_w = None;
                if is_maxa {
                    let w = self.component_of(operand_0, operand_0_mask, 3)?;
                    maxa_w = Some(w);
                    // a0 = int(clamp(floor(w + 0.5), -256, 255))
                    let half = self.b.float_constant(0.5);
                    let rounded = self.b.f_add(float, None, w, half)?;
                    self.b.no_contraction(rounded);
                    let rounded = self.b.glsl(float, GLOp::Floor, &[rounded])?;
                    let low = self.b.float_constant(-256.0);
                    let high = self.b.float_constant(255.0);
                    let clamped = self.b.glsl(float, GLOp::NClamp, &[rounded, low, high])?;
                    let int = self.b.types.int;
                    let address = self.b.convert_f_to_s(int, None, clamped)?;
                    self.b.store(self.var_address_absolute, address, None, [])?;
                }
                if used == 0 {
                    return Ok((None, false));
                }

                let identical = operands[0].identical_components(&operands[1]) & used;
                let operand_0_per_component =
                    if is_maxa && used & 0b1000 == 0 && (identical == used || identical == 0) {
                        // Drop the W that was only read for a0.
                        let indices: Vec<u32> = (0..used_count).collect();
                        FloatValue::new(self.b.swizzle(operand_0.id, &indices)?, used_count)
                    } else {
                        operand_0
                    };
                if identical == used {
                    // max(a, a) is a move.
                    return Ok((Some(operand_0_per_component), false));
                }

                let compare = Compare::of(opcode).unwrap_or(Compare::GreaterEqual);
                let operand_1 = self.operand_components(storage[1], &operands[1], used)?;
                if identical == 0 {
                    let condition =
                        self.compare(compare, used_count, operand_0_per_component.id, operand_1.id)?;
                    let selected = self.b.select(
                        result_type,
                        None,
                        condition,
                        operand_0_per_component.id,
                        operand_1.id,
                    )?;
                    return Ok((value(selected), false));
                }

                let mut parts = Vec::with_capacity(used_count as usize);
                for (index, component) in (0..4u32).filter(|&c| used & (1 << c) != 0).enumerate() {
                    let a = match maxa_w {
                        Some(w) if component == 3 => w,
                        _ => self.b.composite_extract(float, None, operand_0.id, [index as u32])?,
                    };
                    if identical & (1 << component) != 0 {
                        parts.push(a);
                        continue;
                    }
                    let b = self
                        .b
                        .composite_extract(float, None, operand_1.id, [index as u32])?;
                    let condition = self.compare(compare, 1, a, b)?;
                    parts.push(self.b.select(float, None, condition, a, b)?);
                }
                Ok((value(self.b.composite_construct(result_type, None, parts)?), false))
            }

            Seq | Sgt | Sge | Sne => {
                let a = self.operand_components(storage[0], &operands[0], used)?;
                let b = self.operand_components(storage[1], &operands[1], used)?;
                let compare = Compare::of(opcode).unwrap_or(Compare::Equal);
                let condition = self.compare(compare, used_count, a.id, b.id)?;
                let one = self.b.float_splat(1.0, used_count);
                let zero = self.b.float_splat(0.0, used_count);
                Ok((value(self.b.select(result_type, None, condition, one, zero)?), false))
            }

            Frc | Trunc | Floor => {
                let a = self.operand_components(storage[0], &operands[0], used)?;
                let op = match opcode {
                    Frc => GLOp::Fract,
                    Trunc => GLOp::Trunc,
                    _ => GLOp::Floor,
                };
                Ok((value(self.b.glsl(result_type, op, &[a.id])?), false))
            }

            CndEq | CndGe | CndGt => {
                let a = self.operand_components(storage[0], &operands[0], used)?;
                let b = self.operand_components(storage[1], &operands[1], used)?;
                let c = self.operand_components(storage[2], &operands[2], used)?;
                let compare = Compare::of(opcode).unwrap_or(Compare::Equal);
                let zero = self.b.float_splat(0.0, used_count);
                let condition = self.compare(compare, used_count, a.id, zero)?;
                Ok((value(self.b.select(result_type, None, condition, b.id, c.id)?), false))
            }

            Dp4 | Dp3 | Dp2Add => {
                let component_count = match opcode {
                    Dp4 => 4,
                    Dp3 => 3,
                    _ => 2,
                };
                let mask = (1 << component_count) - 1;
                let a = self.operand_components(storage[0], &operands[0], mask)?;
                let b = self.operand_components(storage[1], &operands[1], mask)?;
                let different = mask & !operands[0].identical_components(&operands[1]);
                let mut sum = None;
                for i in 0..component_count {
                    let a_i = self.b.composite_extract(float, None, a.id, [i])?;
                    let b_i = self.b.composite_extract(float, None, b.id, [i])?;
                    let mut product = self.b.f_mul(float, None, a_i, b_i)?;
                    self.b.no_contraction(product);
                    if different & (1 << i) != 0 {
                        product = self.zero_guarded_product(
                            1,
                            product,
                            [(a_i, &operands[0]), (b_i, &operands[1])],
                        )?;
                    }
                    sum = Some(match sum {
                        Some(sum) => {
                            let id = self.b.f_add(float, None, sum, product)?;
                            self.b.no_contraction(id);
                            id
                        }
                        None => product,
                    });
                }
                let mut sum = sum.unwrap_or_else(|| self.b.float_constant(0.0));
                if opcode == Dp2Add {
                    let c = self.operand_components(storage[2], &operands[2], 0b0001)?;
                    sum = self.b.f_add(float, None, sum, c.id)?;
                    self.b.no_contraction(sum);
                }
                Ok((Some(FloatValue::new(sum, 1)), false))
            }

            Max4 => {
                let a = self.operand_components(storage[0], &operands[0], 0b1111)?;
                // Components reading the same swizzle source only count once.
                let mut seen = Vec::with_capacity(4);
                let mut max = None;
                for i in 0..4 {
                    let source = operands[0].component(i);
                    if seen.contains(&source) {
                        continue;
                    }
                    seen.push(source);
                    let component = self.b.composite_extract(float, None, a.id, [i])?;
                    max = Some(match max {
                        Some(max) => self.b.glsl(float, GLOp::NMax, &[max, component])?,
                        None => component,
                    });
                }
                let max = max.unwrap_or_else(|| self.b.float_constant(0.0));
                Ok((Some(FloatValue::new(max, 1)), false))
            }

            SetpEqPush | SetpNePush | SetpGtPush | SetpGePush => {
                let compare = Compare::of(opcode).unwrap_or(Compare::Equal);
                let mask = if used != 0 { 0b1001 } else { 0b1000 };
                let a = self.operand_components(storage[0], &operands[0], mask)?;
                let b = self.operand_components(storage[1], &operands[1], mask)?;
                let zero = self.b.float_constant(0.0);
                let boolean = self.b.types.boolean;

                // p0 = src0.w == 0 && src1.w op 0
                let a_w = self.component_of(a, mask, 3)?;
                let b_w = self.component_of(b, mask, 3)?;
                let a_w_zero = self.compare(Compare::Equal, 1, a_w, zero)?;
                let b_w_test = self.compare(compare, 1, b_w, zero)?;
                let predicate = self.b.logical_and(boolean, None, a_w_zero, b_w_test)?;
                self.b.store(self.var_predicate, predicate, None, [])?;
                if used == 0 {
                    return Ok((None, true));
                }

                // result = (src0.x == 0 && src1.x op 0) ? 0 : src0.x + 1
                let a_x = self.component_of(a, mask, 0)?;
                let b_x = self.component_of(b, mask, 0)?;
                let a_x_zero = self.compare(Compare::Equal, 1, a_x, zero)?;
                let b_x_test = self.compare(compare, 1, b_x, zero)?;
                let condition = self.b.logical_and(boolean, None, a_x_zero, b_x_test)?;
                let minus_one = self.b.float_constant(-1.0);
                let selected = self.b.select(float, None, condition, minus_one, a_x)?;
                let one = self.b.float_constant(1.0);
                let result = self.b.f_add(float, None, selected, one)?;
                self.b.no_contraction(result);
                Ok((Some(FloatValue::new(result, 1)), true))
            }

            KillEq | KillGt | KillGe | KillNe => {
                let compare = Compare::of(opcode).unwrap_or(Compare::Equal);
                let a = self.operand_components(storage[0], &operands[0], 0b1111)?;
                let b = self.operand_components(storage[1], &operands[1], 0b1111)?;
                let tests = self.compare(compare, 4, a.id, b.id)?;
                let boolean = self.b.types.boolean;
                let condition = self.b.any(boolean, None, tests)?;
                if self.info.shader_type == ShaderType::Pixel {
                    let kill = self.b.id();
                    let merge = self.b.id();
                    self.b.selection_merge(merge, SelectionControl::NONE)?;
                    self.b.branch_conditional(condition, kill, merge, [])?;
                    self.b.begin_block(Some(kill))?;
                    self.b.kill()?;
                    self.b.begin_block(Some(merge))?;
                } else {
                    warn!("{:?} in a vertex shader, ignoring", opcode);
                }
                let result = if used != 0 {
                    Some(FloatValue::new(self.b.float_constant(0.0), 1))
                } else {
                    None
                };
                Ok((result, false))
            }

            Dst => {
                // (1, src0.y * src1.y, src0.z, src1.w)
                let mask_0 = used & 0b0110;
                let mask_1 = used & 0b1010;
                let a = match mask_0 {
                    0 => None,
                    mask => Some(self.operand_components(storage[0], &operands[0], mask)?),
                };
                let b = match mask_1 {
                    0 => None,
                    mask => Some(self.operand_components(storage[1], &operands[1], mask)?),
                };
                let mut parts = Vec::with_capacity(used_count as usize);
                for component in (0..4u32).filter(|&c| used & (1 << c) != 0) {
                    let part = match (component, a, b) {
                        (1, Some(a), Some(b)) => {
                            let a_y = self.component_of(a, mask_0, 1)?;
                            let b_y = self.component_of(b, mask_1, 1)?;
                            let mut product = self.b.f_mul(float, None, a_y, b_y)?;
                            self.b.no_contraction(product);
                            if operands[0].identical_components(&operands[1]) & 0b0010 == 0 {
                                product = self.zero_guarded_product(
                                    1,
                                    product,
                                    [(a_y, &operands[0]), (b_y, &operands[1])],
                                )?;
                            }
                            product
                        }
                        (2, Some(a), _) => self.component_of(a, mask_0, 2)?,
                        (3, _, Some(b)) => self.component_of(b, mask_1, 3)?,
                        _ => self.b.float_constant(1.0),
                    };
                    parts.push(part);
                }
                let id = if parts.len() == 1 {
                    parts[0]
                } else {
                    self.b.composite_construct(result_type, None, parts)?
                };
                Ok((value(id), false))
            }

            Cube => Err(UnsupportedError::AluVectorOpcode(opcode as u32).into()),
        }
    }
}
