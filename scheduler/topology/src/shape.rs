// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{Coord, Error, X, Y, Z};

/// Machine dimensions in base partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineShape {
    pub dims: [u16; 3],
}

impl MachineShape {
    pub fn new(dims: [u16; 3]) -> MachineShape {
        MachineShape { dims }
    }

    /// Base partitions on the whole machine.
    pub fn node_count(&self) -> usize {
        self.dims.iter().map(|d| *d as usize).product()
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord[X] < self.dims[X] && coord[Y] < self.dims[Y] && coord[Z] < self.dims[Z]
    }

    /// Flat index of a coordinate, X major.
    pub fn index(&self, coord: Coord) -> Result<usize, Error> {
        if !self.contains(coord) {
            return Err(Error::OutOfShape(coord, self.dims));
        }
        let [_, y, z] = self.dims.map(|d| d as usize);
        Ok((coord[X] as usize * y + coord[Y] as usize) * z + coord[Z] as usize)
    }

    /// Inverse of [`MachineShape::index`].
    pub fn coord_of(&self, index: usize) -> Coord {
        let [_, y, z] = self.dims.map(|d| d as usize);
        [
            (index / (y * z)) as u16,
            (index / z % y) as u16,
            (index % z) as u16,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips() {
        let shape = MachineShape::new([4, 3, 2]);
        assert_eq!(shape.node_count(), 24);
        for i in 0..shape.node_count() {
            assert_eq!(shape.index(shape.coord_of(i)).unwrap(), i);
        }
    }

    #[test]
    fn out_of_shape_is_rejected() {
        let shape = MachineShape::new([2, 2, 2]);
        assert_eq!(
            shape.index([2, 0, 0]),
            Err(Error::OutOfShape([2, 0, 0], [2, 2, 2]))
        );
    }
}
