// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{Coord, Error, Geometry, MachineShape, X, Y, Z};
use std::fmt;

const WORD_BITS: usize = 64;

/// A fixed-width bitmap over the machine's base partitions.
///
/// Width is set at construction and never changes; combining masks of
/// different widths is a caller bug and returns an error from the fallible
/// operations.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeMask {
    bits: usize,
    words: Vec<u64>,
}

impl NodeMask {
    /// An empty mask over `bits` nodes.
    pub fn new(bits: usize) -> NodeMask {
        NodeMask {
            bits,
            words: vec![0; bits.div_ceil(WORD_BITS)],
        }
    }

    /// A mask with every node set.
    pub fn full(bits: usize) -> NodeMask {
        let mut mask = NodeMask::new(bits);
        for i in 0..bits {
            mask.set(i);
        }
        mask
    }

    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.bits);
        self.words[idx / WORD_BITS] |= 1 << (idx % WORD_BITS);
    }

    pub fn unset(&mut self, idx: usize) {
        debug_assert!(idx < self.bits);
        self.words[idx / WORD_BITS] &= !(1 << (idx % WORD_BITS));
    }

    pub fn test(&self, idx: usize) -> bool {
        debug_assert!(idx < self.bits);
        self.words[idx / WORD_BITS] & (1 << (idx % WORD_BITS)) != 0
    }

    /// Number of set nodes.
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    fn check_width(&self, other: &NodeMask) -> Result<(), Error> {
        if self.bits != other.bits {
            return Err(Error::WidthMismatch(self.bits, other.bits));
        }
        Ok(())
    }

    /// Narrow this mask to the intersection with `other`.
    pub fn intersect_with(&mut self, other: &NodeMask) -> Result<(), Error> {
        self.check_width(other)?;
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= o;
        }
        Ok(())
    }

    /// True when the two masks share any node.
    pub fn intersects(&self, other: &NodeMask) -> bool {
        self.words.iter().zip(&other.words).any(|(w, o)| w & o != 0)
    }

    /// True when every node of `other` is also set here.
    pub fn is_superset_of(&self, other: &NodeMask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(w, o)| w & o == *o)
    }

    /// Set every node inside the box at `start` with shape `geometry`.
    pub fn set_box(
        &mut self,
        shape: &MachineShape,
        start: Coord,
        geometry: &Geometry,
    ) -> Result<(), Error> {
        for dx in 0..geometry.0[X] {
            for dy in 0..geometry.0[Y] {
                for dz in 0..geometry.0[Z] {
                    let coord = [start[X] + dx, start[Y] + dy, start[Z] + dz];
                    let idx = shape.index(coord)?;
                    self.set(idx);
                }
            }
        }
        Ok(())
    }

    /// Indices of the set nodes, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(|i| self.test(*i))
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeMask({}b,", self.bits)?;
        for word in self.words.iter().rev() {
            write!(f, "{:016x}", word)?;
        }
        write!(f, ")")
    }
}
