//! Xenos vertex formats
//!
//! The format table here drives both the SPIR-V the translator emits for
//! vertex fetches and [`decode_reference`], a host model of the same
//! arithmetic.

use crate::shader::ucode::VertexFetchAttributes;
use crate::xenos::{Endian, SignedRepeatingFractionMode, VertexFetchConstant};

/// Vertex data formats (values of the fetch instruction's format field)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    K8_8_8_8 = 6,
    K2_10_10_10 = 7,
    K10_11_11 = 16,
    K11_11_10 = 17,
    K16_16 = 25,
    K16_16_16_16 = 26,
    K16_16Float = 31,
    K16_16_16_16Float = 32,
    K32 = 33,
    K32_32 = 34,
    K32_32_32_32 = 35,
    K32Float = 36,
    K32_32Float = 37,
    K32_32_32_32Float = 38,
    K32_32_32Float = 57,
    /// Not usable for vertex fetch
    Undefined = 63,
}

impl From<u32> for VertexFormat {
    fn from(v: u32) -> Self {
        match v {
            6 => VertexFormat::K8_8_8_8,
            7 => VertexFormat::K2_10_10_10,
            16 => VertexFormat::K10_11_11,
            17 => VertexFormat::K11_11_10,
            25 => VertexFormat::K16_16,
            26 => VertexFormat::K16_16_16_16,
            31 => VertexFormat::K16_16Float,
            32 => VertexFormat::K16_16_16_16Float,
            33 => VertexFormat::K32,
            34 => VertexFormat::K32_32,
            35 => VertexFormat::K32_32_32_32,
            36 => VertexFormat::K32Float,
            37 => VertexFormat::K32_32Float,
            38 => VertexFormat::K32_32_32_32Float,
            57 => VertexFormat::K32_32_32Float,
            _ => VertexFormat::Undefined,
        }
    }
}

/// How the words of a format are turned into components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// Bit fields packed into one or two words
    Packed,
    /// Pairs of half floats per word
    HalfFloat,
    /// One 32-bit integer per component
    Int32,
    /// One 32-bit float per component
    Float32,
}

/// Location of a packed component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedField {
    pub word: u32,
    pub offset: u32,
    pub width: u32,
}

const fn field(word: u32, offset: u32, width: u32) -> PackedField {
    PackedField { word, offset, width }
}

const NO_FIELDS: [PackedField; 4] = [field(0, 0, 0); 4];

/// Layout of a vertex format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub family: FormatFamily,
    pub component_count: u32,
    pub word_count: u32,
    /// Per component, for packed formats.
    pub fields: [PackedField; 4],
}

impl FormatInfo {
    const fn packed(component_count: u32, word_count: u32, fields: [PackedField; 4]) -> Self {
        Self { family: FormatFamily::Packed, component_count, word_count, fields }
    }

    const fn wide(family: FormatFamily, component_count: u32, word_count: u32) -> Self {
        Self { family, component_count, word_count, fields: NO_FIELDS }
    }

    /// Whether all used packed fields have the same width.
    pub fn same_width(&self, used_components: u32) -> bool {
        let mut widths = (0..self.component_count)
            .filter(|&i| used_components & (1 << i) != 0)
            .map(|i| self.fields[i as usize].width);
        match widths.next() {
            Some(first) => widths.all(|w| w == first),
            None => true,
        }
    }
}

impl VertexFormat {
    /// Layout of the format, `None` if it can't be fetched as vertex data.
    pub fn info(self) -> Option<FormatInfo> {
        use FormatFamily::*;
        let info = match self {
            VertexFormat::K8_8_8_8 => FormatInfo::packed(
                4,
                1,
                [field(0, 0, 8), field(0, 8, 8), field(0, 16, 8), field(0, 24, 8)],
            ),
            VertexFormat::K2_10_10_10 => FormatInfo::packed(
                4,
                1,
                [field(0, 0, 10), field(0, 10, 10), field(0, 20, 10), field(0, 30, 2)],
            ),
            VertexFormat::K10_11_11 => FormatInfo::packed(
                3,
                1,
                [field(0, 0, 11), field(0, 11, 11), field(0, 22, 10), field(0, 0, 0)],
            ),
            VertexFormat::K11_11_10 => FormatInfo::packed(
                3,
                1,
                [field(0, 0, 10), field(0, 10, 11), field(0, 21, 11), field(0, 0, 0)],
            ),
            VertexFormat::K16_16 => FormatInfo::packed(
                2,
                1,
                [field(0, 0, 16), field(0, 16, 16), field(0, 0, 0), field(0, 0, 0)],
            ),
            VertexFormat::K16_16_16_16 => FormatInfo::packed(
                4,
                2,
                [field(0, 0, 16), field(0, 16, 16), field(1, 0, 16), field(1, 16, 16)],
            ),
            VertexFormat::K16_16Float => FormatInfo::wide(HalfFloat, 2, 1),
            VertexFormat::K16_16_16_16Float => FormatInfo::wide(HalfFloat, 4, 2),
            VertexFormat::K32 => FormatInfo::wide(Int32, 1, 1),
            VertexFormat::K32_32 => FormatInfo::wide(Int32, 2, 2),
            VertexFormat::K32_32_32_32 => FormatInfo::wide(Int32, 4, 4),
            VertexFormat::K32Float => FormatInfo::wide(Float32, 1, 1),
            VertexFormat::K32_32Float => FormatInfo::wide(Float32, 2, 2),
            VertexFormat::K32_32_32Float => FormatInfo::wide(Float32, 3, 3),
            VertexFormat::K32_32_32_32Float => FormatInfo::wide(Float32, 4, 4),
            VertexFormat::Undefined => return None,
        };
        Some(info)
    }

    pub fn component_count(self) -> u32 {
        self.info().map_or(0, |info| info.component_count)
    }
}

/// Mask of the words that must be loaded to produce `used_components`.
///
/// Components the format doesn't have need no words.
pub fn needed_words(info: &FormatInfo, used_components: u32) -> u32 {
    let used = used_components & ((1 << info.component_count) - 1);
    match info.family {
        FormatFamily::Packed => (0..info.component_count)
            .filter(|&i| used & (1 << i) != 0)
            .fold(0, |mask, i| mask | (1 << info.fields[i as usize].word)),
        FormatFamily::HalfFloat => (0..info.word_count)
            .filter(|&w| used & (0b11 << (w * 2)) != 0)
            .fold(0, |mask, w| mask | (1 << w)),
        FormatFamily::Int32 | FormatFamily::Float32 => used,
    }
}

/// Reciprocal of the largest value of an unsigned field.
pub fn unsigned_scale(width: u32) -> f32 {
    1.0 / ((1u64 << width) - 1) as f32
}

/// Scale mapping a signed field onto [-1, 1].
pub fn signed_scale(width: u32, mode: SignedRepeatingFractionMode) -> f32 {
    let max = ((1u64 << (width - 1)) - 1) as f32;
    match mode {
        SignedRepeatingFractionMode::ZeroClampMinusOne => 1.0 / max,
        SignedRepeatingFractionMode::NoZero => 1.0 / (max + 0.5),
    }
}

/// `2^exp`, the exponent adjustment factor.
pub fn exp_adjust_factor(exp: i32) -> f32 {
    (2.0f64).powi(exp) as f32
}

fn normalize(value: f32, width: u32, attributes: &VertexFetchAttributes) -> f32 {
    if attributes.is_integer {
        return value;
    }
    if !attributes.is_signed {
        return value * unsigned_scale(width);
    }
    let scale = signed_scale(width, attributes.signed_rf_mode);
    match attributes.signed_rf_mode {
        SignedRepeatingFractionMode::ZeroClampMinusOne => (value * scale).max(-1.0),
        SignedRepeatingFractionMode::NoZero => value * scale + 0.5 * scale,
    }
}

/// Decode one vertex from its (already byte-swapped) words.
///
/// Components the format lacks are zero. Integer paths use the same f32
/// operations, in the same order, as the emitted code.
pub fn decode_reference(attributes: &VertexFetchAttributes, words: &[u32]) -> Option<[f32; 4]> {
    let info = attributes.data_format.info()?;
    let word = |i: u32| words.get(i as usize).copied().unwrap_or(0);
    let mut out = [0.0f32; 4];
    for i in 0..info.component_count {
        out[i as usize] = match info.family {
            FormatFamily::Packed => {
                let f = info.fields[i as usize];
                let raw = (word(f.word) >> f.offset) & ((1u64 << f.width) - 1) as u32;
                let value = if attributes.is_signed {
                    let shift = 32 - f.width;
                    (((raw << shift) as i32) >> shift) as f32
                } else {
                    raw as f32
                };
                normalize(value, f.width, attributes)
            }
            FormatFamily::HalfFloat => {
                let w = word(i / 2);
                let bits = if i % 2 == 0 { w & 0xFFFF } else { w >> 16 };
                half::f16::from_bits(bits as u16).to_f32()
            }
            FormatFamily::Int32 => {
                let value = if attributes.is_signed {
                    word(i) as i32 as f32
                } else {
                    word(i) as f32
                };
                normalize(value, 32, attributes)
            }
            FormatFamily::Float32 => f32::from_bits(word(i)),
        };
    }
    if attributes.exp_adjust != 0 {
        let factor = exp_adjust_factor(attributes.exp_adjust);
        for v in &mut out[..info.component_count as usize] {
            *v *= factor;
        }
    }
    Some(out)
}

/// Fetch and decode a vertex from shared memory the way an emitted shader does.
///
/// `memory` is shared memory as dwords. Reads past its end return zero.
pub fn fetch_reference(
    memory: &[u32],
    fetch_constant: &VertexFetchConstant,
    attributes: &VertexFetchAttributes,
    index: f32,
) -> Option<[f32; 4]> {
    let info = attributes.data_format.info()?;
    let mut address = fetch_constant.dword_address() as i32;
    if attributes.stride != 0 {
        let index = if attributes.is_index_rounded { index + 0.5 } else { index };
        address = address.wrapping_add((index.floor() as i32).wrapping_mul(attributes.stride as i32));
    }
    address = address.wrapping_add(attributes.offset);
    let endian: Endian = fetch_constant.endian();
    let words: Vec<u32> = (0..info.word_count as i32)
        .map(|w| {
            usize::try_from(address.wrapping_add(w))
                .ok()
                .and_then(|a| memory.get(a).copied())
                .map_or(0, |v| endian.swap(v))
        })
        .collect();
    decode_reference(attributes, &words)
}
