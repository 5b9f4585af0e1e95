//! Depth keys and the stable LSD radix sort that orders splats back-to-front.
//!
//! The sort works on `(key, value)` pairs of `u32`. Each of the four passes
//! handles one 8-bit digit, least significant first, in three steps that the
//! GPU implementation mirrors one-to-one:
//!
//! 1. **upsweep**: a 256-bucket histogram per block of [`BLOCK_SIZE`] keys;
//! 2. **spine**: an exclusive scan over the digit-major block histograms,
//!    giving every (digit, block) pair its first output slot;
//! 3. **downsweep**: each key is scattered to its slot plus its rank among
//!    equal digits earlier in the same block.
//!
//! Because blocks are scanned in order and ranks count only earlier keys, equal
//! keys never change relative order.

use rayon::prelude::*;

use crate::error::{Result, SplatError};

pub const RADIX_BITS: u32 = 8;
pub const RADIX: usize = 1 << RADIX_BITS;
pub const PASSES: u32 = u32::BITS / RADIX_BITS;
/// Keys per histogram block (one GPU workgroup).
pub const BLOCK_SIZE: usize = 256;

/// IEEE-754 order-preserving map: `a < b` ⇔ `ordered_bits(a) < ordered_bits(b)`
/// for all non-NaN floats.
pub fn ordered_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Sort key for a view-space depth. Ascending key order is descending depth,
/// so the farthest splat sorts first.
pub fn depth_key(depth: f32) -> u32 {
    !ordered_bits(depth)
}

#[inline]
fn digit(key: u32, pass: u32) -> usize {
    ((key >> (pass * RADIX_BITS)) & (RADIX as u32 - 1)) as usize
}

/// Reusable scratch for [`RadixSort::sort_pairs`].
///
/// The alternate buffers are private to the sort; callers only ever see the
/// final ordering.
#[derive(Debug, Default)]
pub struct RadixSort {
    keys_alt: Vec<u32>,
    values_alt: Vec<u32>,
    spine: Vec<u32>,
    destinations: Vec<u32>,
}

impl RadixSort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable ascending sort of `keys`, permuting `values` alongside.
    pub fn sort_pairs(&mut self, keys: &mut Vec<u32>, values: &mut Vec<u32>) -> Result<()> {
        if keys.len() != values.len() {
            return Err(SplatError::Input(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        self.sort_matched(keys, values);
        Ok(())
    }

    fn sort_matched(&mut self, keys: &mut Vec<u32>, values: &mut Vec<u32>) {
        let n = keys.len();
        if n < 2 {
            return;
        }

        let blocks = n.div_ceil(BLOCK_SIZE);
        self.keys_alt.resize(n, 0);
        self.values_alt.resize(n, 0);
        self.destinations.resize(n, 0);
        self.spine.resize(blocks * RADIX, 0);

        for pass in 0..PASSES {
            self.upsweep(keys, pass, blocks);
            exclusive_scan(&mut self.spine);
            self.downsweep(keys, pass, blocks);

            for (i, &dst) in self.destinations.iter().enumerate() {
                self.keys_alt[dst as usize] = keys[i];
                self.values_alt[dst as usize] = values[i];
            }
            std::mem::swap(keys, &mut self.keys_alt);
            std::mem::swap(values, &mut self.values_alt);
        }
    }

    fn upsweep(&mut self, keys: &[u32], pass: u32, blocks: usize) {
        let histograms: Vec<[u32; RADIX]> = keys
            .par_chunks(BLOCK_SIZE)
            .map(|block| {
                let mut h = [0u32; RADIX];
                for &k in block {
                    h[digit(k, pass)] += 1;
                }
                h
            })
            .collect();

        // Digit-major: all blocks' counts for digit 0, then digit 1, ...
        for (b, h) in histograms.iter().enumerate() {
            for (d, &count) in h.iter().enumerate() {
                self.spine[d * blocks + b] = count;
            }
        }
    }

    fn downsweep(&mut self, keys: &[u32], pass: u32, blocks: usize) {
        let spine = &self.spine;
        self.destinations
            .par_chunks_mut(BLOCK_SIZE)
            .zip(keys.par_chunks(BLOCK_SIZE))
            .enumerate()
            .for_each(|(b, (dst, block))| {
                let mut offsets = [0u32; RADIX];
                for (d, o) in offsets.iter_mut().enumerate() {
                    *o = spine[d * blocks + b];
                }
                for (slot, &k) in dst.iter_mut().zip(block) {
                    let d = digit(k, pass);
                    *slot = offsets[d];
                    offsets[d] += 1;
                }
            });
    }
}

/// In-place exclusive prefix sum.
pub fn exclusive_scan(values: &mut [u32]) {
    let mut running = 0u32;
    for v in values.iter_mut() {
        let count = *v;
        *v = running;
        running += count;
    }
}

/// Reorder `indices` so their `keys` ascend; ties keep input order.
pub fn sort_indices(keys: &[u32], indices: &[u32]) -> Result<Vec<u32>> {
    let mut k = keys.to_vec();
    let mut v = indices.to_vec();
    RadixSort::new().sort_pairs(&mut k, &mut v)?;
    Ok(v)
}

/// Permutation of `0..keys.len()` that sorts `keys` ascending.
pub fn argsort(keys: &[u32]) -> Vec<u32> {
    let mut k = keys.to_vec();
    let mut v: Vec<u32> = (0..keys.len() as u32).collect();
    RadixSort::new().sort_matched(&mut k, &mut v);
    v
}
