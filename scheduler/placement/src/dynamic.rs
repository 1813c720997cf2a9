// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Dynamic block synthesis: carve a new block out of the availability
//! mask without touching a set of obstacle blocks.

use crate::block::{Block, BlockImages, BlockOwner, BlockState};
use crate::request::JobRequest;
use arbor_topology::{rotate_geo, Coord, Geometry, MachineShape, NodeMask, X, Y, Z};
use log::debug;

/// Candidate shapes for a request, in the order they should be tried.
fn candidate_geometries(
    request_geo: &Geometry,
    target_size: u32,
    rotate: bool,
    shape: &MachineShape,
) -> Vec<Geometry> {
    if !request_geo.is_wildcard() {
        let mut geos = vec![*request_geo];
        if rotate {
            let mut geo = *request_geo;
            for rot in 0..5 {
                rotate_geo(&mut geo, rot);
                if !geos.contains(&geo) {
                    geos.push(geo);
                }
            }
        }
        return geos;
    }

    // No shape requested: enumerate boxes covering the size, most compact
    // first so torus wiring stays short.
    let mut geos = Vec::new();
    for a in 1..=target_size {
        if target_size % a != 0 {
            continue;
        }
        let rest = target_size / a;
        for b in 1..=rest {
            if rest % b != 0 {
                continue;
            }
            let c = rest / b;
            let geo = Geometry([a as u16, b as u16, c as u16]);
            if geo.0[X] <= shape.dims[X]
                && geo.0[Y] <= shape.dims[Y]
                && geo.0[Z] <= shape.dims[Z]
            {
                geos.push(geo);
            }
        }
    }
    geos.sort_by_key(|g| *g.0.iter().max().expect("three dims"));
    geos
}

/// Build the mask of one box, or `None` when it leaves the machine.
fn box_mask(shape: &MachineShape, start: Coord, geo: &Geometry) -> Option<NodeMask> {
    let mut mask = NodeMask::new(shape.node_count());
    mask.set_box(shape, start, geo).ok()?;
    Some(mask)
}

/// Try to carve a block for `job` out of `avail`, avoiding `obstacles`.
///
/// Explicit start coordinates pin the box; otherwise every start is tried
/// in machine order. Returns the block unregistered, still FREE and
/// ownerless.
pub fn synthesize_block(
    shape: &MachineShape,
    job: &JobRequest,
    target_size: u32,
    avail: &NodeMask,
    obstacles: &[&Block],
    cpus_per_bp: u32,
    bp_node_cnt: u32,
    id: String,
) -> Option<Block> {
    if target_size == 0 {
        return None;
    }
    let geos = candidate_geometries(&job.geometry, target_size, job.rotate, shape);
    for geo in geos {
        let starts: Vec<Coord> = match job.start {
            Some(start) => vec![start],
            None => (0..shape.node_count()).map(|i| shape.coord_of(i)).collect(),
        };
        for start in starts {
            if start[X] + geo.0[X] > shape.dims[X]
                || start[Y] + geo.0[Y] > shape.dims[Y]
                || start[Z] + geo.0[Z] > shape.dims[Z]
            {
                continue;
            }
            let Some(mask) = box_mask(shape, start, &geo) else {
                continue;
            };
            if !avail.is_superset_of(&mask) {
                continue;
            }
            if obstacles.iter().any(|b| b.mask.intersects(&mask)) {
                continue;
            }
            debug!("carved {} at {:?} shape {}", id, start, geo);
            let bp_count = geo.size();
            return Some(Block {
                id,
                owner: BlockOwner::None,
                state: BlockState::Free,
                mask,
                geometry: geo,
                start,
                bp_count,
                node_cnt: bp_count * bp_node_cnt,
                ionodes: None,
                cpus_per_bp,
                conn_type: job.conn_type,
                images: BlockImages {
                    blrts: job.images.blrts.clone(),
                    linux: job.images.linux.clone(),
                    mloader: job.images.mloader.clone(),
                    ramdisk: job.images.ramdisk.clone(),
                },
                pending_free: false,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::JobRequest;

    fn shape() -> MachineShape {
        MachineShape::new([4, 4, 4])
    }

    #[test]
    fn wildcard_request_carves_a_compact_box() {
        let shape = shape();
        let job = JobRequest::new(1, 500, 100, 512);
        let avail = NodeMask::full(shape.node_count());
        let block =
            synthesize_block(&shape, &job, 8, &avail, &[], 512, 512, "RMP1".into()).unwrap();
        assert_eq!(block.bp_count, 8);
        assert_eq!(block.geometry, Geometry([2, 2, 2]));
        assert_eq!(block.mask.count(), 8);
    }

    #[test]
    fn obstacles_push_the_box_aside() {
        let shape = shape();
        let job = JobRequest::new(1, 500, 100, 512);
        let avail = NodeMask::full(shape.node_count());
        let first =
            synthesize_block(&shape, &job, 8, &avail, &[], 512, 512, "RMP1".into()).unwrap();
        let second = synthesize_block(
            &shape,
            &job,
            8,
            &avail,
            &[&first],
            512,
            512,
            "RMP2".into(),
        )
        .unwrap();
        assert!(!first.mask.intersects(&second.mask));
    }

    #[test]
    fn explicit_geometry_is_honored() {
        let shape = shape();
        let mut job = JobRequest::new(1, 500, 100, 512);
        job.geometry = Geometry([4, 1, 1]);
        let avail = NodeMask::full(shape.node_count());
        let block =
            synthesize_block(&shape, &job, 4, &avail, &[], 512, 512, "RMP1".into()).unwrap();
        assert_eq!(block.geometry, Geometry([4, 1, 1]));
    }

    #[test]
    fn no_room_means_no_block() {
        let shape = shape();
        let job = JobRequest::new(1, 500, 100, 512);
        let avail = NodeMask::new(shape.node_count());
        assert!(
            synthesize_block(&shape, &job, 8, &avail, &[], 512, 512, "RMP1".into()).is_none()
        );
    }

    #[test]
    fn pinned_start_only_tries_that_corner() {
        let shape = shape();
        let mut job = JobRequest::new(1, 500, 100, 512);
        job.start = Some([2, 2, 2]);
        job.geometry = Geometry([2, 2, 2]);
        let avail = NodeMask::full(shape.node_count());
        let block =
            synthesize_block(&shape, &job, 8, &avail, &[], 512, 512, "RMP1".into()).unwrap();
        assert_eq!(block.start, [2, 2, 2]);

        job.start = Some([3, 3, 3]);
        assert!(
            synthesize_block(&shape, &job, 8, &avail, &[], 512, 512, "RMP2".into()).is_none()
        );
    }
}
