//! Type and constant interning for SPIR-V modules
//!
//! Scalar and vector types used everywhere by the translator are created
//! once per module. Constants are interned by type and value so repeated
//! requests return the same id.

use std::collections::HashMap;

use rspirv::dr::Builder;
use rspirv::spirv::Word;

/// Common scalar and vector types
///
/// Vector arrays are indexed by component count minus one, so index 0 is the
/// scalar type.
#[derive(Debug, Clone)]
pub struct TypeCache {
    pub void: Word,
    pub boolean: Word,
    pub int: Word,
    pub uint: Word,
    pub float: Word,
    bool_vectors: [Word; 4],
    int_vectors: [Word; 4],
    uint_vectors: [Word; 4],
    float_vectors: [Word; 4],
}

impl TypeCache {
    pub fn new(b: &mut Builder) -> Self {
        let void = b.type_void();
        let boolean = b.type_bool();
        let int = b.type_int(32, 1);
        let uint = b.type_int(32, 0);
        let float = b.type_float(32);
        let mut vectors = |scalar: Word| {
            [scalar, b.type_vector(scalar, 2), b.type_vector(scalar, 3), b.type_vector(scalar, 4)]
        };
        let bool_vectors = vectors(boolean);
        let int_vectors = vectors(int);
        let uint_vectors = vectors(uint);
        let float_vectors = vectors(float);
        Self {
            void,
            boolean,
            int,
            uint,
            float,
            bool_vectors,
            int_vectors,
            uint_vectors,
            float_vectors,
        }
    }

    fn pick(vectors: &[Word; 4], components: u32) -> Word {
        vectors[components.clamp(1, 4) as usize - 1]
    }

    /// `float` for one component, `vecN` otherwise.
    pub fn float_vector(&self, components: u32) -> Word {
        Self::pick(&self.float_vectors, components)
    }

    pub fn int_vector(&self, components: u32) -> Word {
        Self::pick(&self.int_vectors, components)
    }

    pub fn uint_vector(&self, components: u32) -> Word {
        Self::pick(&self.uint_vectors, components)
    }

    pub fn bool_vector(&self, components: u32) -> Word {
        Self::pick(&self.bool_vectors, components)
    }
}

/// Interned constants of a module
#[derive(Debug, Default)]
pub struct ConstantCache {
    scalars: HashMap<(Word, u32), Word>,
    bools: HashMap<bool, Word>,
    composites: HashMap<(Word, Vec<Word>), Word>,
}

impl ConstantCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A 32-bit scalar constant of `ty` with the given bit pattern.
    pub fn scalar(&mut self, b: &mut Builder, ty: Word, bits: u32) -> Word {
        *self
            .scalars
            .entry((ty, bits))
            .or_insert_with(|| b.constant_bit32(ty, bits))
    }

    pub fn bool(&mut self, b: &mut Builder, ty: Word, value: bool) -> Word {
        *self.bools.entry(value).or_insert_with(|| {
            if value {
                b.constant_true(ty)
            } else {
                b.constant_false(ty)
            }
        })
    }

    pub fn composite(&mut self, b: &mut Builder, ty: Word, constituents: Vec<Word>) -> Word {
        if let Some(&id) = self.composites.get(&(ty, constituents.clone())) {
            return id;
        }
        let id = b.constant_composite(ty, constituents.iter().copied());
        self.composites.insert((ty, constituents), id);
        id
    }

    /// Number of distinct constants created.
    pub fn len(&self) -> usize {
        self.scalars.len() + self.bools.len() + self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_cache_vectors() {
        let mut b = Builder::new();
        let types = TypeCache::new(&mut b);
        assert_eq!(types.float_vector(1), types.float);
        assert_ne!(types.float_vector(2), types.float_vector(3));
        assert_eq!(types.uint_vector(1), types.uint);
        assert_ne!(types.int, types.uint);
        // Out-of-range counts clamp
        assert_eq!(types.float_vector(0), types.float);
        assert_eq!(types.bool_vector(7), types.bool_vector(4));
    }

    #[test]
    fn test_constant_interning() {
        let mut b = Builder::new();
        let types = TypeCache::new(&mut b);
        let mut constants = ConstantCache::new();
        let one = constants.scalar(&mut b, types.float, 1.0f32.to_bits());
        assert_eq!(constants.scalar(&mut b, types.float, 1.0f32.to_bits()), one);
        let int_one = constants.scalar(&mut b, types.int, 1);
        assert_ne!(one, int_one);

        let v = constants.composite(&mut b, types.float_vector(2), vec![one, one]);
        assert_eq!(constants.composite(&mut b, types.float_vector(2), vec![one, one]), v);
        let yes = constants.bool(&mut b, types.boolean, true);
        assert_eq!(constants.bool(&mut b, types.boolean, true), yes);
        assert_eq!(constants.len(), 4);
    }
}
