//! # HyperLogLog
//!
//! Purpose: Probabilistic cardinality estimation over 16,384 six-bit
//! registers packed densely (12 KiB per value). The estimator is the
//! classic harmonic mean with the small-range linear-counting correction;
//! merging takes the register-wise maximum.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

/// Number of registers (2^14).
pub const HLL_REGISTERS: usize = 16_384;
const HLL_P: u32 = 14;
const HLL_BITS: usize = 6;
const HLL_DENSE_BYTES: usize = HLL_REGISTERS * HLL_BITS / 8;

/// Fixed hash seeds so an element always lands on the same register for the
/// lifetime of the process; the dense register layout is not persisted.
fn register_hasher() -> RandomState {
    RandomState::with_seeds(
        0x9e37_79b9_7f4a_7c15,
        0xf39c_c060_5ced_c834,
        0x1082_276b_f3a2_7251,
        0x7109_87c8_825e_2df3,
    )
}

/// Dense HyperLogLog value.
#[derive(Clone)]
pub struct HllValue {
    registers: Box<[u8; HLL_DENSE_BYTES]>,
}

impl std::fmt::Debug for HllValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HllValue(~{})", self.cardinality())
    }
}

impl Default for HllValue {
    fn default() -> Self {
        HllValue::new()
    }
}

impl HllValue {
    /// Creates an empty HLL (all registers zero).
    pub fn new() -> HllValue {
        HllValue {
            registers: Box::new([0u8; HLL_DENSE_BYTES]),
        }
    }

    fn get_register(&self, index: usize) -> u8 {
        let bit = index * HLL_BITS;
        let byte = bit / 8;
        let shift = bit % 8;
        let word = self.registers[byte] as u16
            | ((*self.registers.get(byte + 1).unwrap_or(&0) as u16) << 8);
        ((word >> shift) & 0x3f) as u8
    }

    fn set_register(&mut self, index: usize, value: u8) {
        debug_assert!(value < 64);
        let bit = index * HLL_BITS;
        let byte = bit / 8;
        let shift = bit % 8;
        let mask = 0x3fu16 << shift;
        let mut word = self.registers[byte] as u16
            | ((*self.registers.get(byte + 1).unwrap_or(&0) as u16) << 8);
        word = (word & !mask) | ((value as u16) << shift);
        self.registers[byte] = (word & 0xff) as u8;
        if byte + 1 < HLL_DENSE_BYTES {
            self.registers[byte + 1] = (word >> 8) as u8;
        }
    }

    /// Observes an element; returns true when a register grew (the
    /// PFADD "modified" signal).
    pub fn add(&mut self, element: &[u8]) -> bool {
        let mut hasher = register_hasher().build_hasher();
        element.hash(&mut hasher);
        let hash = hasher.finish();

        let index = (hash & (HLL_REGISTERS as u64 - 1)) as usize;
        let rest = hash >> HLL_P;
        // Rank = position of the first set bit in the remaining 50 bits,
        // counting from 1; an all-zero remainder takes the maximum rank.
        let rank = if rest == 0 {
            (64 - HLL_P + 1) as u8
        } else {
            (rest.trailing_zeros() + 1) as u8
        };

        if rank > self.get_register(index) {
            self.set_register(index, rank);
            true
        } else {
            false
        }
    }

    /// Estimated cardinality.
    pub fn cardinality(&self) -> u64 {
        let m = HLL_REGISTERS as f64;
        let mut sum = 0.0;
        let mut zeros = 0u64;
        for i in 0..HLL_REGISTERS {
            let reg = self.get_register(i);
            if reg == 0 {
                zeros += 1;
            }
            sum += 1.0 / ((1u64 << reg) as f64);
        }

        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let raw = alpha * m * m / sum;

        // Small-range correction: linear counting while registers are sparse.
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }

    /// Register-wise maximum with the other HLLs.
    pub fn merge(&mut self, others: &[&HllValue]) {
        for other in others {
            for i in 0..HLL_REGISTERS {
                let theirs = other.get_register(i);
                if theirs > self.get_register(i) {
                    self.set_register(i, theirs);
                }
            }
        }
    }

    /// Approximate heap footprint; the dense layout is constant-size.
    pub fn dense_bytes() -> usize {
        HLL_DENSE_BYTES
    }
}
