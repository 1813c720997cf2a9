// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Machine topology: 3-D coordinates, block geometry with its rotation
//! order, fixed-width node masks, and node-name parsing.

mod geometry;
mod mask;
mod names;
mod shape;

pub use geometry::{rotate_geo, Coord, Geometry, NO_DIM};
pub use mask::NodeMask;
pub use names::{format_block_nodes, parse_node_names, BlockFootprint};
pub use shape::MachineShape;

use thiserror::Error;

/// Axis indices into coordinate and geometry triples.
pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("coordinate {0:?} outside machine shape {1:?}")]
    OutOfShape(Coord, [u16; 3]),
    #[error("node mask widths differ, {0} vs {1}")]
    WidthMismatch(usize, usize),
    #[error("node list {0:?} is in a weird format")]
    BadNodeName(String),
}
