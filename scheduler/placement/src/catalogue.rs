// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The live set of blocks.
//!
//! Blocks live in an arena and are addressed by stable integer handles;
//! walks follow the insertion-order handle list, so iteration order is
//! stable while a lock is held. The catalogue also keeps the machine-wide
//! unused-CPU ledger that admission checks consult.

use crate::block::{Block, BlockOwner, BlockState};
use crate::Error;
use log::debug;

/// Stable identity of a block within the catalogue arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(usize);

/// Derived selections over the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    All,
    /// Blocks booted and ready for a job.
    Booted,
    /// Blocks currently running a job.
    JobBearing,
}

pub struct Catalogue {
    slots: Vec<Option<Block>>,
    order: Vec<BlockHandle>,
    unused_cpus: u32,
}

impl Catalogue {
    /// An empty catalogue over a machine with `total_cpus` processors.
    pub fn new(total_cpus: u32) -> Catalogue {
        Catalogue {
            slots: Vec::new(),
            order: Vec::new(),
            unused_cpus: total_cpus,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn unused_cpus(&self) -> u32 {
        self.unused_cpus
    }

    pub fn get(&self, handle: BlockHandle) -> Option<&Block> {
        self.slots.get(handle.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, handle: BlockHandle) -> Option<&mut Block> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    /// Handles in catalogue order.
    pub fn handles(&self) -> Vec<BlockHandle> {
        self.order.clone()
    }

    /// Handles of the blocks a view selects, in catalogue order.
    pub fn view_handles(&self, view: View) -> Vec<BlockHandle> {
        self.order
            .iter()
            .copied()
            .filter(|h| {
                let block = self.get(*h).expect("ordered handles are live");
                match view {
                    View::All => true,
                    View::Booted => block.state == BlockState::Ready,
                    View::JobBearing => block.owner.is_job(),
                }
            })
            .collect()
    }

    pub fn add(&mut self, block: Block) -> BlockHandle {
        let handle = BlockHandle(self.slots.len());
        debug!("adding block {} to the catalogue", block.id);
        self.slots.push(Some(block));
        self.order.push(handle);
        handle
    }

    /// Remove a block. Only a FREE block with no pending-free count may
    /// go; anything else is a state-consistency error.
    pub fn remove(&mut self, handle: BlockHandle) -> Result<Block, Error> {
        let block = self.get(handle).ok_or(Error::NoFit)?;
        if block.state != BlockState::Free
            || block.pending_free
            || block.owner != BlockOwner::None
        {
            return Err(Error::RemoveBusy(block.id.clone()));
        }
        self.order.retain(|h| *h != handle);
        Ok(self.slots[handle.0].take().expect("checked above"))
    }

    /// Poison a block after a hardware fault. A job's processors return
    /// to the ledger; the block itself stops counting.
    pub fn mark_error(&mut self, handle: BlockHandle) {
        if let Some(block) = self.get_mut(handle) {
            let had_job = block.owner.is_job();
            let procs = block.procs();
            block.owner = BlockOwner::ErrorSentinel;
            block.state = BlockState::Error;
            if had_job {
                self.unused_cpus += procs;
            }
        }
    }

    pub fn mark_free(&mut self, handle: BlockHandle) {
        if let Some(block) = self.get_mut(handle) {
            let had_job = block.owner.is_job();
            let procs = block.procs();
            block.owner = BlockOwner::None;
            block.state = BlockState::Free;
            block.pending_free = false;
            if had_job {
                self.unused_cpus += procs;
            }
        }
    }

    /// Give a block to a job, debiting the CPU ledger.
    pub fn assign_job(&mut self, handle: BlockHandle, job_id: u32) -> Result<(), Error> {
        let block = self.get_mut(handle).ok_or(Error::NoFit)?;
        match block.owner {
            BlockOwner::None => {
                block.owner = BlockOwner::Job(job_id);
                let procs = block.procs();
                self.unused_cpus = self.unused_cpus.saturating_sub(procs);
                Ok(())
            }
            _ => Err(Error::AlreadyOccupied(block.id.clone())),
        }
    }

    /// Release a block from its job, crediting the ledger. A block queued
    /// for freeing leaves the catalogue once its job drains.
    pub fn clear_job(&mut self, handle: BlockHandle) {
        let Some(block) = self.get_mut(handle) else {
            return;
        };
        let procs = block.procs();
        let was_job = block.owner.is_job();
        let pending_free = block.pending_free;
        block.owner = BlockOwner::None;
        if was_job {
            self.unused_cpus += procs;
        }
        if pending_free {
            self.mark_free(handle);
            let _ = self.remove(handle);
        }
    }

    /// Queue blocks for freeing. Occupied blocks stay behind, flagged, and
    /// are counted in the return value; idle ones are freed and dropped
    /// immediately.
    pub fn free_list(&mut self, targets: &[BlockHandle]) -> usize {
        let mut pending = 0;
        for handle in targets {
            let Some(block) = self.get_mut(*handle) else {
                continue;
            };
            if block.owner.is_job() {
                block.pending_free = true;
                pending += 1;
            } else {
                self.mark_free(*handle);
                let _ = self.remove(*handle);
            }
        }
        pending
    }

    /// Handles of live blocks overlapping the given one.
    pub fn overlapping(&self, handle: BlockHandle) -> Vec<BlockHandle> {
        let Some(block) = self.get(handle) else {
            return Vec::new();
        };
        self.order
            .iter()
            .copied()
            .filter(|other| {
                *other != handle
                    && self
                        .get(*other)
                        .map(|b| b.overlaps(block))
                        .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockImages;
    use arbor_proto::ConnectionType;
    use arbor_topology::{Geometry, MachineShape, NodeMask};

    fn block(id: &str, start: [u16; 3], geo: [u16; 3]) -> Block {
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
    fn assign_and_clear_keep_the_cpu_ledger() {
        let mut cat = Catalogue::new(32 * 1024);
        let h = cat.add(block("RMP0", [0, 0, 0], [2, 2, 2]));
        cat.assign_job(h, 42).unwrap();
        assert_eq!(cat.unused_cpus(), 32 * 1024 - 8 * 512);
        assert!(matches!(cat.assign_job(h, 43), Err(Error::AlreadyOccupied(_))));
        cat.clear_job(h);
        assert_eq!(cat.unused_cpus(), 32 * 1024);
    }

    #[test]
    fn busy_blocks_cannot_be_removed() {
        let mut cat = Catalogue::new(1024);
        let h = cat.add(block("RMP0", [0, 0, 0], [1, 1, 1]));
        cat.assign_job(h, 1).unwrap();
        assert!(matches!(cat.remove(h), Err(Error::RemoveBusy(_))));
        cat.clear_job(h);
        cat.remove(h).unwrap();
        assert!(cat.is_empty());
    }

    #[test]
    fn free_list_counts_pending_and_drops_idle() {
        let mut cat = Catalogue::new(64 * 1024);
        let idle = cat.add(block("RMP0", [0, 0, 0], [1, 1, 1]));
        let busy = cat.add(block("RMP1", [1, 0, 0], [1, 1, 1]));
        cat.assign_job(busy, 7).unwrap();
        assert_eq!(cat.free_list(&[idle, busy]), 1);
        assert_eq!(cat.len(), 1);
        assert!(cat.get(busy).unwrap().pending_free);
        // the pending block leaves once its job drains
        cat.clear_job(busy);
        assert!(cat.is_empty());
    }

    #[test]
    fn views_follow_state_and_occupancy() {
        let mut cat = Catalogue::new(64 * 1024);
        let a = cat.add(block("RMP0", [0, 0, 0], [1, 1, 1]));
        let b = cat.add(block("RMP1", [1, 0, 0], [1, 1, 1]));
        cat.get_mut(a).unwrap().state = BlockState::Ready;
        cat.assign_job(b, 9).unwrap();
        assert_eq!(cat.view_handles(View::All).len(), 2);
        assert_eq!(cat.view_handles(View::Booted), vec![a]);
        assert_eq!(cat.view_handles(View::JobBearing), vec![b]);
    }

    #[test]
    fn overlap_walk_uses_handles() {
        let mut cat = Catalogue::new(64 * 1024);
        let a = cat.add(block("RMP0", [0, 0, 0], [2, 2, 2]));
        let b = cat.add(block("RMP1", [1, 1, 1], [2, 2, 2]));
        let c = cat.add(block("RMP2", [3, 3, 3], [1, 1, 1]));
        assert_eq!(cat.overlapping(a), vec![b]);
        assert!(cat.overlapping(c).is_empty());
    }
}
