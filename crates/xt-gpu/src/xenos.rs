//! Xenos hardware constants and register layouts
//!
//! These mirror what the guest GPU exposes to shaders. The translator emits
//! code that reads them at runtime; the host-side helpers here decode the same
//! bits and are used to check the emitted code's expectations.

use bytemuck::{Pod, Zeroable};

/// Number of 256-bit fetch constant slots (each is 6 dwords).
pub const FETCH_CONSTANT_SLOTS: u32 = 32;

/// Number of dwords in the fetch constant buffer.
pub const FETCH_CONSTANT_DWORDS: u32 = FETCH_CONSTANT_SLOTS * 6;

/// Number of boolean constants.
pub const BOOL_CONSTANT_COUNT: u32 = 256;

/// Number of loop constants.
pub const LOOP_CONSTANT_COUNT: u32 = 32;

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Vertex,
    Pixel,
}

/// Byte order of a 32-bit word in guest memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Endian {
    None = 0,
    /// Swap bytes within each 16-bit half
    Swap8In16 = 1,
    /// Reverse all four bytes
    Swap8In32 = 2,
    /// Swap the two 16-bit halves
    Swap16In32 = 3,
}

impl Endian {
    /// Decode the 2-bit endian field of a fetch constant.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            1 => Endian::Swap8In16,
            2 => Endian::Swap8In32,
            3 => Endian::Swap16In32,
            _ => Endian::None,
        }
    }

    /// Whether bytes are swapped inside each 16-bit half.
    pub fn swaps_bytes(self) -> bool {
        matches!(self, Endian::Swap8In16 | Endian::Swap8In32)
    }

    /// Whether the 16-bit halves are swapped.
    pub fn swaps_halves(self) -> bool {
        matches!(self, Endian::Swap8In32 | Endian::Swap16In32)
    }

    /// Apply the swap to a word.
    ///
    /// Mirrors the two-stage select sequence the translator emits.
    pub fn swap(self, mut value: u32) -> u32 {
        if self.swaps_bytes() {
            value = ((value & 0x00FF_00FF) << 8) | ((value >> 8) & 0x00FF_00FF);
        }
        if self.swaps_halves() {
            value = value.rotate_left(16);
        }
        value
    }
}

/// How signed normalized values are mapped to floats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum SignedRepeatingFractionMode {
    /// Divide by the largest positive value and clamp the most negative to -1.
    #[default]
    ZeroClampMinusOne = 0,
    /// Map the full range symmetrically, so there is no exact zero.
    NoZero = 1,
}

/// A 32-bit loop constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopConstant(pub u32);

impl LoopConstant {
    pub fn new(count: u8, initial_address: u8, step: i8) -> Self {
        Self((count as u32) | ((initial_address as u32) << 8) | ((step as u8 as u32) << 16))
    }

    /// Iteration count (bits 0..8).
    pub fn count(self) -> u32 {
        self.0 & 0xFF
    }

    /// Initial value of the loop address register aL (bits 8..16).
    pub fn initial_address(self) -> i32 {
        ((self.0 >> 8) & 0xFF) as i32
    }

    /// Signed per-iteration step added to aL (bits 16..24).
    pub fn step(self) -> i32 {
        ((self.0 >> 16) & 0xFF) as u8 as i8 as i32
    }
}

/// Host mirror of the boolean and loop constant uniform block
///
/// Layout: 256 booleans packed as two `uint4`, then 32 loop constants packed
/// as eight `uint4` starting at byte 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BoolLoopConstants {
    pub bools: [u32; 8],
    pub loops: [u32; 32],
}

impl Default for BoolLoopConstants {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl BoolLoopConstants {
    /// Read a boolean constant the way emitted shaders do.
    ///
    /// Dword `(index >> 7, (index >> 5) & 3)` of the bool array, bit `index & 31`.
    pub fn bool_constant(&self, index: u32) -> bool {
        let vector = (index >> 7) as usize;
        let component = ((index >> 5) & 3) as usize;
        self.bools[vector * 4 + component] & (1 << (index & 31)) != 0
    }

    pub fn set_bool_constant(&mut self, index: u32, value: bool) {
        let dword = (index >> 5) as usize;
        if value {
            self.bools[dword] |= 1 << (index & 31);
        } else {
            self.bools[dword] &= !(1 << (index & 31));
        }
    }

    pub fn loop_constant(&self, index: u32) -> LoopConstant {
        LoopConstant(self.loops[index as usize])
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Host mirror of a vertex fetch constant (two dwords)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct VertexFetchConstant {
    /// Bits 2..32: dword address in shared memory; bits 0..2: type.
    pub dword_0: u32,
    /// Bits 0..2: endian; bits 2..26: size in dwords.
    pub dword_1: u32,
}

impl VertexFetchConstant {
    pub fn new(dword_address: u32, endian: Endian, size_dwords: u32) -> Self {
        Self {
            dword_0: (dword_address << 2) | 3,
            dword_1: (size_dwords << 2) | endian as u32,
        }
    }

    pub fn dword_address(&self) -> u32 {
        self.dword_0 >> 2
    }

    pub fn endian(&self) -> Endian {
        Endian::from_bits(self.dword_1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_swap() {
        let v = 0x1122_3344;
        assert_eq!(Endian::None.swap(v), 0x1122_3344);
        assert_eq!(Endian::Swap8In16.swap(v), 0x2211_4433);
        assert_eq!(Endian::Swap8In32.swap(v), 0x4433_2211);
        assert_eq!(Endian::Swap16In32.swap(v), 0x3344_1122);
        assert_eq!(Endian::Swap8In32.swap(v), v.swap_bytes());
    }

    #[test]
    fn test_endian_from_bits() {
        assert_eq!(Endian::from_bits(0), Endian::None);
        assert_eq!(Endian::from_bits(6), Endian::Swap8In32);
        assert_eq!(Endian::from_bits(0xFFFF_FFFF), Endian::Swap16In32);
    }

    #[test]
    fn test_bool_constant_addressing() {
        let mut constants = BoolLoopConstants::default();
        for index in [0, 31, 32, 127, 128, 200, 255] {
            assert!(!constants.bool_constant(index));
            constants.set_bool_constant(index, true);
            assert!(constants.bool_constant(index), "bool {} should be set", index);
        }
        // 200 = vector 1, component 2, bit 8
        assert_eq!(constants.bools[6], 1 << 8);
        constants.set_bool_constant(200, false);
        assert!(!constants.bool_constant(200));
    }

    #[test]
    fn test_bool_loop_layout() {
        assert_eq!(std::mem::size_of::<BoolLoopConstants>(), 160);
        let mut constants = BoolLoopConstants::default();
        constants.loops[0] = 0xAABB_CCDD;
        assert_eq!(&constants.as_bytes()[32..36], &0xAABB_CCDDu32.to_ne_bytes());
    }

    #[test]
    fn test_loop_constant_fields() {
        let c = LoopConstant::new(5, 3, -2);
        assert_eq!(c.count(), 5);
        assert_eq!(c.initial_address(), 3);
        assert_eq!(c.step(), -2);
        assert_eq!(LoopConstant(0x0001_0000).step(), 1);
    }

    #[test]
    fn test_vertex_fetch_constant() {
        let c = VertexFetchConstant::new(0x400, Endian::Swap8In32, 16);
        assert_eq!(c.dword_address(), 0x400);
        assert_eq!(c.endian(), Endian::Swap8In32);
    }
}
