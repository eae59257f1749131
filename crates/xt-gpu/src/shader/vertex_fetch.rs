//! Vertex fetch
//!
//! A fetch reads the dwords of one vertex from shared memory at
//! `fetch_constant.address + index * stride + offset`, swaps them to little
//! endian as the fetch constant says, and decodes the components the result
//! uses. The arithmetic mirrors [`crate::vertex::decode_reference`].

use rspirv::spirv::{GLOp, StorageClass, Word};
use tracing::warn;
use xt_core::{Result, UnsupportedError};

use super::builder::FloatValue;
use super::translator::Translation;
use super::ucode::VertexFetchInstruction;
use crate::vertex::{
    exp_adjust_factor, needed_words, signed_scale, unsigned_scale, FormatFamily, FormatInfo,
};
use crate::xenos::SignedRepeatingFractionMode;

/// Position of `bit` among the set bits of `mask`.
fn rank(mask: u32, bit: u32) -> u32 {
    (mask & ((1 << bit) - 1)).count_ones()
}

impl Translation {
    fn load_fetch_constant_word(&mut self, dword: u32) -> Result<Word> {
        let uint = self.b.types.uint;
        let pointer = self.b.pointer_type(StorageClass::Uniform, uint);
        let indices = [
            self.b.int_constant(0),
            self.b.int_constant((dword >> 2) as i32),
            self.b.int_constant((dword & 3) as i32),
        ];
        let chain = self
            .b
            .access_chain(pointer, None, self.fetch_constants, indices)?;
        Ok(self.b.load(uint, None, chain, None, [])?)
    }

    fn load_shared_memory_word(&mut self, address: Word) -> Result<Word> {
        let uint = self.b.types.uint;
        let pointer = self.b.pointer_type(self.shared_memory_class, uint);
        let zero = self.b.int_constant(0);
        let chain = self
            .b
            .access_chain(pointer, None, self.shared_memory, [zero, address])?;
        Ok(self.b.load(uint, None, chain, None, [])?)
    }

    /// Swap `value` (`components` words) by the endian mode in bits 0:1 of
    /// `endian_word`, without branching.
    ///
    /// Mode 1 swaps bytes in halves, 3 swaps halves, 2 does both.
    pub(super) fn endian_swap(&mut self, value: Word, components: u32, endian_word: Word) -> Result<Word> {
        let uint = self.b.types.uint;
        let boolean = self.b.types.boolean;
        let ty = self.b.types.uint_vector(components);

        let three = self.b.uint_constant(3);
        let mode = self.b.bitwise_and(uint, None, endian_word, three)?;
        let one = self.b.uint_constant(1);
        let two = self.b.uint_constant(2);
        let is_1 = self.b.i_equal(boolean, None, mode, one)?;
        let is_2 = self.b.i_equal(boolean, None, mode, two)?;
        let is_3 = self.b.i_equal(boolean, None, mode, three)?;
        let mut swap_bytes = self.b.logical_or(boolean, None, is_1, is_2)?;
        let mut swap_halves = self.b.logical_or(boolean, None, is_2, is_3)?;
        if components > 1 {
            // Select on vectors needs a vector condition before 1.4.
            let bool_vector = self.b.types.bool_vector(components);
            swap_bytes = self.b.composite_construct(
                bool_vector,
                None,
                vec![swap_bytes; components as usize],
            )?;
            swap_halves = self.b.composite_construct(
                bool_vector,
                None,
                vec![swap_halves; components as usize],
            )?;
        }

        let byte_mask = self.b.uint_splat(0x00FF_00FF, components);
        let eight = self.b.uint_splat(8, components);
        let sixteen = self.b.uint_splat(16, components);

        let low = self.b.bitwise_and(ty, None, value, byte_mask)?;
        let low = self.b.shift_left_logical(ty, None, low, eight)?;
        let high = self.b.shift_right_logical(ty, None, value, eight)?;
        let high = self.b.bitwise_and(ty, None, high, byte_mask)?;
        let swapped = self.b.bitwise_or(ty, None, low, high)?;
        let value = self.b.select(ty, None, swap_bytes, swapped, value)?;

        let low = self.b.shift_left_logical(ty, None, value, sixteen)?;
        let high = self.b.shift_right_logical(ty, None, value, sixteen)?;
        let swapped = self.b.bitwise_or(ty, None, low, high)?;
        Ok(self.b.select(ty, None, swap_halves, swapped, value)?)
    }

    /// `value * factor` for a float scalar or vector.
    fn scale(&mut self, value: Word, components: u32, factor: f32) -> Result<Word> {
        let ty = self.b.types.float_vector(components);
        let factor = self.b.float_constant(factor);
        let id = if components > 1 {
            self.b.vector_times_scalar(ty, None, value, factor)?
        } else {
            self.b.f_mul(ty, None, value, factor)?
        };
        self.b.no_contraction(id);
        Ok(id)
    }

    pub(super) fn vertex_fetch(&mut self, instr: &VertexFetchInstruction) -> Result<()> {
        self.update_instruction_predication(instr.is_predicated, instr.predicate_condition)?;

        let attributes = &instr.attributes;
        let info = attributes
            .data_format
            .info()
            .ok_or(UnsupportedError::VertexFormat(attributes.data_format as u32))?;
        let used = instr.result.used_result_components();
        let needed = needed_words(&info, used);
        if needed == 0 {
            // Only constants or components the format lacks.
            return self.store_result(&instr.result, None);
        }
        self.b.ensure_build_point_available()?;

        let uint = self.b.types.uint;
        let int = self.b.types.int;
        let float = self.b.types.float;

        // Vertex address in dwords.
        let fetch_constant_dword = instr.fetch_constant_index * 2;
        let word_0 = self.load_fetch_constant_word(fetch_constant_dword)?;
        let two = self.b.uint_constant(2);
        let address = self.b.shift_right_logical(uint, None, word_0, two)?;
        let mut address = self.b.bitcast(int, None, address)?;
        if attributes.stride != 0 {
            let storage = self.load_operand_storage(&instr.index_operand)?;
            let mut index = self
                .operand_components(storage, &instr.index_operand, 0b0001)?
                .id;
            if attributes.is_index_rounded {
                let half = self.b.float_constant(0.5);
                index = self.b.f_add(float, None, index, half)?;
                self.b.no_contraction(index);
            }
            let index = self.b.glsl(float, GLOp::Floor, &[index])?;
            let mut index = self.b.convert_f_to_s(int, None, index)?;
            if attributes.stride > 1 {
                let stride = self.b.int_constant(attributes.stride as i32);
                index = self.b.i_mul(int, None, index, stride)?;
            }
            address = self.b.i_add(int, None, address, index)?;
        }

        let mut words = Vec::with_capacity(info.word_count as usize);
        for word in (0..info.word_count).filter(|&w| needed & (1 << w) != 0) {
            let offset = attributes.offset.wrapping_add(word as i32);
            let word_address = if offset != 0 {
                let offset = self.b.int_constant(offset);
                self.b.i_add(int, None, address, offset)?
            } else {
                address
            };
            words.push(self.load_shared_memory_word(word_address)?);
        }
        let word_count = words.len() as u32;
        let words = if word_count > 1 {
            let ty = self.b.types.uint_vector(word_count);
            self.b.composite_construct(ty, None, words)?
        } else {
            words[0]
        };
        let word_1 = self.load_fetch_constant_word(fetch_constant_dword + 1)?;
        let words = self.endian_swap(words, word_count, word_1)?;

        let used_format = used & ((1 << info.component_count) - 1);
        let mut result = self.decode_vertex_words(&info, instr, words, needed, used_format)?;

        if attributes.exp_adjust != 0 {
            result.id = self.scale(result.id, result.components, exp_adjust_factor(attributes.exp_adjust))?;
        }

        // Components past the end of the format read as zero.
        let missing = used & !used_format;
        if missing != 0 {
            let count = missing.count_ones();
            let zero = FloatValue::new(self.b.float_splat(0.0, count), count);
            result = self.b.concat_float_vectors(&[result, zero])?;
        }

        self.store_result(&instr.result, Some(result))
    }

    /// Turn swapped words into the `used_format` components, normalized.
    fn decode_vertex_words(
        &mut self,
        info: &FormatInfo,
        instr: &VertexFetchInstruction,
        words: Word,
        needed: u32,
        used_format: u32,
    ) -> Result<FloatValue> {
        let attributes = &instr.attributes;
        let word_count = needed.count_ones();
        let count = used_format.count_ones();
        let float = self.b.types.float;
        let float_type = self.b.types.float_vector(count);
        let signed = attributes.is_signed;

        match info.family {
            FormatFamily::Packed => {
                let (scalar, words) = if signed {
                    let ty = self.b.types.int_vector(word_count);
                    (self.b.types.int, self.b.bitcast(ty, None, words)?)
                } else {
                    (self.b.types.uint, words)
                };
                let mut components = Vec::with_capacity(count as usize);
                let mut scales = Vec::with_capacity(count as usize);
                for i in (0..info.component_count).filter(|&i| used_format & (1 << i) != 0) {
                    let field = info.fields[i as usize];
                    let word = if word_count > 1 {
                        self.b
                            .composite_extract(scalar, None, words, [rank(needed, field.word)])?
                    } else {
                        words
                    };
                    let offset = self.b.int_constant(field.offset as i32);
                    let width = self.b.int_constant(field.width as i32);
                    components.push(if signed {
                        self.b.bit_field_s_extract(scalar, None, word, offset, width)?
                    } else {
                        self.b.bit_field_u_extract(scalar, None, word, offset, width)?
                    });
                    scales.push(if signed {
                        signed_scale(field.width, attributes.signed_rf_mode)
                    } else {
                        unsigned_scale(field.width)
                    });
                }
                let values = if count > 1 {
                    let ty = if signed {
                        self.b.types.int_vector(count)
                    } else {
                        self.b.types.uint_vector(count)
                    };
                    self.b.composite_construct(ty, None, components)?
                } else {
                    components[0]
                };
                let mut result = if signed {
                    self.b.convert_s_to_f(float_type, None, values)?
                } else {
                    self.b.convert_u_to_f(float_type, None, values)?
                };

                if !attributes.is_integer {
                    if info.same_width(used_format) {
                        result = self.scale(result, count, scales[0])?;
                    } else {
                        let factors = self.b.float_vector_constant(&scales);
                        result = self.b.f_mul(float_type, None, result, factors)?;
                        self.b.no_contraction(result);
                    }
                    if signed {
                        match attributes.signed_rf_mode {
                            SignedRepeatingFractionMode::ZeroClampMinusOne => {
                                // The most negative value maps slightly below -1.
                                let minus_one = self.b.float_splat(-1.0, count);
                                result = self.b.glsl(float_type, GLOp::FMax, &[result, minus_one])?;
                            }
                            SignedRepeatingFractionMode::NoZero => {
                                let halves: Vec<f32> = scales.iter().map(|s| 0.5 * s).collect();
                                let bias = self.b.float_vector_constant(&halves);
                                result = self.b.f_add(float_type, None, result, bias)?;
                                self.b.no_contraction(result);
                            }
                        }
                    }
                }
                Ok(FloatValue::new(result, count))
            }

            FormatFamily::HalfFloat => {
                warn!("Half float vertex data unpacked without NaN and denormal guarantees");
                let float2 = self.b.types.float_vector(2);
                let uint = self.b.types.uint;
                let mut parts = Vec::with_capacity(info.word_count as usize);
                for word_index in 0..info.word_count {
                    let lanes = (used_format >> (word_index * 2)) & 0b11;
                    if lanes == 0 {
                        continue;
                    }
                    let word = if word_count > 1 {
                        self.b
                            .composite_extract(uint, None, words, [rank(needed, word_index)])?
                    } else {
                        words
                    };
                    let unpacked = self.b.glsl(float2, GLOp::UnpackHalf2x16, &[word])?;
                    parts.push(if lanes == 0b11 {
                        FloatValue::new(unpacked, 2)
                    } else {
                        let lane = self.b.composite_extract(float, None, unpacked, [lanes >> 1])?;
                        FloatValue::new(lane, 1)
                    });
                }
                self.b.concat_float_vectors(&parts)
            }

            FormatFamily::Int32 => {
                let mut result = if signed {
                    let ty = self.b.types.int_vector(count);
                    let values = self.b.bitcast(ty, None, words)?;
                    self.b.convert_s_to_f(float_type, None, values)?
                } else {
                    self.b.convert_u_to_f(float_type, None, words)?
                };
                if !attributes.is_integer {
                    if signed {
                        let scale = signed_scale(32, attributes.signed_rf_mode);
                        result = self.scale(result, count, scale)?;
                        if attributes.signed_rf_mode == SignedRepeatingFractionMode::NoZero {
                            let bias = self.b.float_splat(0.5 * scale, count);
                            result = self.b.f_add(float_type, None, result, bias)?;
                            self.b.no_contraction(result);
                        }
                    } else {
                        result = self.scale(result, count, unsigned_scale(32))?;
                    }
                }
                Ok(FloatValue::new(result, count))
            }

            FormatFamily::Float32 => {
                let result = self.b.bitcast(float_type, None, words)?;
                Ok(FloatValue::new(result, count))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank() {
        assert_eq!(rank(0b10, 1), 0);
        assert_eq!(rank(0b11, 1), 1);
        assert_eq!(rank(0b1101, 3), 2);
    }
}
