// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use arbor_proto::ConnectionType;
use arbor_topology::{Coord, Geometry, NodeMask};
use std::fmt;

/// Hardware state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Configuring,
    Ready,
    Deallocating,
    Error,
}

/// Occupancy of a block: free, running one job, or poisoned.
///
/// The error sentinel keeps failed blocks out of the occupancy and CPU
/// accounting without pretending a job owns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOwner {
    None,
    Job(u32),
    ErrorSentinel,
}

impl BlockOwner {
    pub fn is_job(&self) -> bool {
        matches!(self, BlockOwner::Job(_))
    }
}

/// The boot images a block was (or will be) brought up with.
///
/// A READY block's images are fixed; changing them means passing through
/// FREE and rebooting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockImages {
    pub blrts: Option<String>,
    pub linux: Option<String>,
    pub mloader: Option<String>,
    pub ramdisk: Option<String>,
}

/// A reserved, bounded region of the machine.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: String,
    pub owner: BlockOwner,
    pub state: BlockState,
    pub mask: NodeMask,
    pub geometry: Geometry,
    pub start: Coord,
    /// Base partitions in the block.
    pub bp_count: u32,
    /// Compute nodes in the block.
    pub node_cnt: u32,
    /// I/O node list for small blocks.
    pub ionodes: Option<String>,
    pub cpus_per_bp: u32,
    pub conn_type: ConnectionType,
    pub images: BlockImages,
    /// Queued for freeing once its job drains.
    pub pending_free: bool,
}

impl Block {
    /// Processors available on the block.
    pub fn procs(&self) -> u32 {
        self.bp_count * self.cpus_per_bp
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.mask.intersects(&other.mask)
    }

    pub fn contains(&self, mask: &NodeMask) -> bool {
        self.mask.is_superset_of(mask)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}bp {:?} {:?}",
            self.id, self.bp_count, self.state, self.owner
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_topology::MachineShape;

    fn block_at(id: &str, start: Coord, geo: [u16; 3]) -> Block {
        let shape = MachineShape::new([4, 4, 4]);
        let geometry = Geometry(geo);
        let mut mask = NodeMask::new(shape.node_count());
        mask.set_box(&shape, start, &geometry).unwrap();
        Block {
            id: id.to_owned(),
            owner: BlockOwner::None,
            state: BlockState::Free,
            mask,
            geometry,
            start,
            bp_count: geometry.size(),
            node_cnt: geometry.size() * 512,
            ionodes: None,
            cpus_per_bp: 512,
            conn_type: ConnectionType::Torus,
            images: BlockImages::default(),
            pending_free: false,
        }
    }

    #[test]
    fn overlap_is_mask_intersection() {
        let a = block_at("RMP0", [0, 0, 0], [2, 2, 2]);
        let b = block_at("RMP1", [1, 1, 1], [2, 2, 2]);
        let c = block_at("RMP2", [2, 2, 2], [2, 2, 2]);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn procs_scale_with_base_partitions() {
        let block = block_at("RMP0", [0, 0, 0], [2, 1, 1]);
        assert_eq!(block.procs(), 1024);
    }
}
