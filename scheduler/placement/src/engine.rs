// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The placement engine: match a pending job against the block catalogue,
//! retrying across image mismatches, overlap-layout passes and hardware
//! faults, and fall through to dynamic synthesis when the layout allows.

use crate::block::{Block, BlockState};
use crate::catalogue::{BlockHandle, Catalogue, View};
use crate::dynamic::synthesize_block;
use crate::images::ImageAcl;
use crate::request::{JobRequest, PlacementInfo};
use crate::Error;
use arbor_config::{Config, LayoutMode};
use arbor_proto::ConnectionType;
use arbor_topology::{format_block_nodes, parse_node_names, rotate_geo, MachineShape, NodeMask};
use log::{debug, error};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Verdict of a placement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// A block was chosen; its handle is returned.
    Placed(BlockHandle),
    /// The job can run here, but no block was materialized for it.
    RunnableUnassigned,
}

/// Checks the base-partition hardware under a block. The default accepts
/// everything; deployments wire the control-system query in here.
pub type BpStateCheck = dyn Fn(&Block) -> bool + Send + Sync;

pub struct PlacementEngine {
    config: Arc<Config>,
    shape: MachineShape,
    catalogue: Arc<Mutex<Catalogue>>,
    acl: ImageAcl,
    /// Serializes synthesise-or-place so two dynamic placements cannot
    /// race on the same free region.
    create_lock: Mutex<()>,
    bp_check: Box<BpStateCheck>,
    on_block_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    next_dyn_id: AtomicU32,
}

impl PlacementEngine {
    pub fn new(config: Arc<Config>, catalogue: Arc<Mutex<Catalogue>>, acl: ImageAcl) -> Self {
        let shape = MachineShape::new(config.machine_shape);
        PlacementEngine {
            config,
            shape,
            catalogue,
            acl,
            create_lock: Mutex::new(()),
            bp_check: Box::new(|_| true),
            on_block_error: None,
            next_dyn_id: AtomicU32::new(100),
        }
    }

    /// Install the hardware probe run on a chosen block before handing it
    /// to a job.
    pub fn with_bp_check(mut self, check: Box<BpStateCheck>) -> Self {
        self.bp_check = check;
        self
    }

    /// Install the trigger fired when a block is put into the error state.
    pub fn with_block_error_hook(mut self, hook: Box<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_block_error = Some(hook);
        self
    }

    pub fn catalogue(&self) -> &Arc<Mutex<Catalogue>> {
        &self.catalogue
    }

    /// Try to find resources for a job.
    ///
    /// `avail` is the set of nodes the scheduler can offer; on success it
    /// is narrowed to the chosen block's nodes. With `test_only` the
    /// engine answers whether the job could ever run without disturbing
    /// the catalogue.
    pub fn submit_job(
        &self,
        job: &mut JobRequest,
        avail: &mut NodeMask,
        min_nodes: u32,
        max_nodes: u32,
        req_nodes: u32,
        test_only: bool,
    ) -> Result<PlacementOutcome, Error> {
        debug!(
            "submit_job: job {} nodes={}-{}-{} procs={} test={}",
            job.job_id, min_nodes, req_nodes, max_nodes, job.procs_min, test_only
        );

        let dynamic = self.config.layout_mode == LayoutMode::Dynamic;
        let _create_guard = dynamic.then(|| self.create_lock.lock());

        let found = self.find_best_match(job, avail, min_nodes, max_nodes, req_nodes, test_only)?;

        match found {
            Some(handle) => {
                let cat = self.catalogue.lock();
                let record = cat.get(handle).expect("match is live");
                if record.ionodes.is_some() && !job.shared {
                    error!("small block used in non-shared partition");
                }
                job.placement = PlacementInfo {
                    block_id: Some(record.id.clone()),
                    ionodes: record.ionodes.clone(),
                    node_cnt: record.node_cnt,
                    geometry: Some(record.geometry),
                    conn_type: Some(record.conn_type),
                };
                if test_only {
                    job.placement.block_id = None;
                }
                Ok(PlacementOutcome::Placed(handle))
            }
            None => {
                debug!("job {} can run, but no block was made", job.job_id);
                let bp_node_cnt = self.config.bp_node_cnt;
                let cpus_per_node = self.config.cpus_per_node;
                let divisor = if job.procs_min > 0 && job.procs_min < bp_node_cnt {
                    (cpus_per_node * bp_node_cnt / job.procs_min).max(1)
                } else {
                    1
                };
                job.placement = PlacementInfo {
                    block_id: None,
                    ionodes: None,
                    node_cnt: min_nodes.max(1) * bp_node_cnt / divisor,
                    geometry: None,
                    conn_type: None,
                };
                Ok(PlacementOutcome::RunnableUnassigned)
            }
        }
    }

    /// The matching loop. Returns the chosen handle, or `None` when the
    /// job is runnable without a materialized block (test-only dynamic
    /// synthesis).
    fn find_best_match(
        &self,
        job: &mut JobRequest,
        avail: &mut NodeMask,
        mut min_nodes: u32,
        max_nodes: u32,
        req_nodes: u32,
        test_only: bool,
    ) -> Result<Option<BlockHandle>, Error> {
        if req_nodes > max_nodes {
            error!(
                "can't run this job, max bps is {} asking for {}",
                max_nodes, req_nodes
            );
            return Err(Error::TooManyNodes {
                req: req_nodes,
                max: max_nodes,
            });
        }

        if !test_only {
            let cat = self.catalogue.lock();
            if job.procs_min > cat.unused_cpus() {
                debug!(
                    "asking for {} but only {} cpus are unused",
                    job.procs_min,
                    cat.unused_cpus()
                );
                return Err(Error::NoFit);
            }
        }

        self.check_images(job, test_only)?;

        // Geometry derivation. An explicit triple forces the node floor;
        // a bare required-node list yields both shape and start corner.
        let mut target_size;
        if !job.geometry.is_wildcard() && job.geometry.0[0] != 0 {
            target_size = job.geometry.size();
            if target_size != min_nodes {
                debug!(
                    "min_nodes not set correctly, {} should be {} from {}",
                    min_nodes, target_size, job.geometry
                );
                min_nodes = target_size;
            }
        } else {
            if let (Some(list), None) = (&job.required_nodes, job.start) {
                match parse_node_names(&self.config.node_prefix, list, &self.shape) {
                    Ok(footprint) => {
                        job.geometry = footprint.geometry;
                        job.start = Some(footprint.start);
                        if job.required_mask.is_none() {
                            job.required_mask = Some(footprint.mask);
                        }
                    }
                    Err(e) => error!("{}", e),
                }
            }
            target_size = min_nodes;
        }
        if target_size == 0 {
            target_size = 1;
        }

        let layout = self.config.layout_mode;
        let mut check_image = true;
        let mut overlap_passes = 0u32;
        let mut created_dynamic = false;

        loop {
            let (found, image_miss) = self.one_pass(
                job,
                avail,
                min_nodes,
                req_nodes,
                target_size,
                test_only,
                check_image,
                overlap_passes,
                layout,
            )?;

            if let Some(handle) = found {
                if !test_only && !self.validate_bp_states(handle) {
                    continue;
                }
                let cat = self.catalogue.lock();
                let record = cat.get(handle).expect("validated above");
                debug!(
                    "found block {} <{}>",
                    record.id,
                    format_block_nodes(&self.config.node_prefix, record.start, &record.geometry)
                );
                avail.intersect_with(&record.mask)?;
                return Ok(Some(handle));
            }

            // A candidate failed only on images: one more pass, with the
            // caller on the hook to reboot the block.
            if image_miss && check_image {
                check_image = false;
                continue;
            }
            check_image = true;

            if layout == LayoutMode::Overlap && !test_only && overlap_passes < 2 {
                overlap_passes += 1;
                continue;
            }

            if layout != LayoutMode::Dynamic {
                debug!("find_best_match: none found");
                return Err(Error::NoFit);
            }

            if test_only {
                return self.test_only_synthesis(job, avail, target_size);
            }

            if created_dynamic {
                debug!("find_best_match: none found after dynamic creation");
                return Err(Error::NoFit);
            }
            if !self.create_across_views(job, avail, target_size)? {
                return Err(Error::NoFit);
            }
            created_dynamic = true;
        }
    }

    /// One walk over the catalogue. Returns the first surviving block and
    /// whether any candidate was rejected only because of its images.
    #[allow(clippy::too_many_arguments)]
    fn one_pass(
        &self,
        job: &JobRequest,
        avail: &NodeMask,
        min_nodes: u32,
        req_nodes: u32,
        target_size: u32,
        test_only: bool,
        check_image: bool,
        overlap_passes: u32,
        layout: LayoutMode,
    ) -> Result<(Option<BlockHandle>, bool), Error> {
        let mut cat = self.catalogue.lock();
        let mut image_miss = false;
        debug!(
            "number of blocks to check: {} state {}",
            cat.len(),
            test_only
        );

        'blocks: for handle in cat.handles() {
            let Some(record) = cat.get(handle) else {
                continue;
            };

            if record.state == BlockState::Error {
                debug!("block {} is in an error state (can't use)", record.id);
                continue;
            }
            if record.owner.is_job() && !test_only {
                debug!("block {} in use by job {:?}", record.id, record.owner);
                continue;
            }

            let proc_cnt = record.procs();
            if proc_cnt < job.procs_min
                || job.procs_max.map_or(false, |max| proc_cnt > max)
            {
                debug!("block {} cpu count ({}) not suitable", record.id, proc_cnt);
                continue;
            }

            if record.bp_count < min_nodes
                || (req_nodes != 0 && record.bp_count > req_nodes)
                || record.bp_count < target_size
            {
                debug!(
                    "block {} node count ({}) not suitable",
                    record.id, record.bp_count
                );
                continue;
            }

            // The block must sit inside what the job may use: nodes can
            // be down, drained, or promised elsewhere.
            if !avail.is_superset_of(&record.mask) {
                debug!("block {} has nodes not usable by this job", record.id);
                continue;
            }

            if let Some(required) = &job.required_mask {
                if !record.mask.is_superset_of(required) {
                    debug!("block {} lacks required nodes", record.id);
                    continue;
                }
            }

            // Nothing booted or running may share nodes with the block.
            let mut free_candidate = false;
            for other_handle in cat.overlapping(handle) {
                let record = cat.get(handle).expect("candidate is live");
                let other = cat.get(other_handle).expect("overlap walk is live");
                if !test_only && layout == LayoutMode::Overlap {
                    if overlap_passes == 0 && record.state != BlockState::Ready {
                        continue 'blocks;
                    }
                    if overlap_passes == 1 && other.state != BlockState::Free {
                        continue 'blocks;
                    }
                }
                if !test_only && (other.owner.is_job() || other.state == BlockState::Error) {
                    if other.state == BlockState::Error {
                        error!(
                            "can't use {}, overlapping block {} is in an error state",
                            record.id, other.id
                        );
                    } else {
                        debug!(
                            "can't use {}, a job is running on an overlapping block {}",
                            record.id, other.id
                        );
                    }
                    if layout == LayoutMode::Dynamic {
                        free_candidate = true;
                        break;
                    }
                    continue 'blocks;
                }
            }
            if free_candidate {
                // The candidate's space is poisoned by its occupied
                // neighbor; queue it for freeing and move on.
                cat.free_list(&[handle]);
                continue;
            }

            let record = cat.get(handle).expect("candidate is live");
            if check_image {
                let mismatch = [
                    (&job.images.blrts, &record.images.blrts),
                    (&job.images.linux, &record.images.linux),
                    (&job.images.mloader, &record.images.mloader),
                    (&job.images.ramdisk, &record.images.ramdisk),
                ]
                .iter()
                .any(|(want, have)| {
                    want.as_deref()
                        .map(|w| !have.as_deref().unwrap_or("").eq_ignore_ascii_case(w))
                        .unwrap_or(false)
                });
                if mismatch {
                    image_miss = true;
                    continue;
                }
            }

            if job.conn_type != record.conn_type && job.conn_type != ConnectionType::Nav {
                debug!(
                    "block {} conn-type not usable, asking for {} block is {}",
                    record.id, job.conn_type, record.conn_type
                );
                continue;
            }

            if !job.geometry.is_wildcard() {
                let mut geo = job.geometry;
                let mut matched = false;
                for rot in 0..6 {
                    if record.geometry.holds(&geo) {
                        matched = true;
                        break;
                    }
                    if !job.rotate {
                        break;
                    }
                    rotate_geo(&mut geo, rot);
                }
                if !matched {
                    continue;
                }
            }

            debug!("we found one! {}", record.id);
            return Ok((Some(handle), image_miss));
        }

        Ok((None, image_miss))
    }

    /// Probe the hardware under a chosen block. On failure the block goes
    /// into the error state, the trigger fires, and the caller restarts
    /// its matching loop.
    fn validate_bp_states(&self, handle: BlockHandle) -> bool {
        let mut cat = self.catalogue.lock();
        let Some(record) = cat.get(handle) else {
            return false;
        };
        if (self.bp_check)(record) {
            return true;
        }
        let id = record.id.clone();
        error!(
            "marking block {} in an error state because of bad bps",
            id
        );
        cat.mark_error(handle);
        drop(cat);
        if let Some(hook) = &self.on_block_error {
            hook(&id);
        }
        false
    }

    fn check_images(&self, job: &JobRequest, test_only: bool) -> Result<(), Error> {
        let checks: [(&'static str, &Option<String>, &Vec<_>); 4] = [
            ("BlrtsImage", &job.images.blrts, &self.config.blrts_images),
            ("LinuxImage", &job.images.linux, &self.config.linux_images),
            (
                "MloaderImage",
                &job.images.mloader,
                &self.config.mloader_images,
            ),
            (
                "RamdiskImage",
                &job.images.ramdisk,
                &self.config.ramdisk_images,
            ),
        ];
        for (kind, image, list) in checks {
            let Some(image) = image else {
                continue;
            };
            if !self.acl.check(job.user_id, job.group_id, image, list) {
                error!(
                    "user {}:{} is not allowed to use {} {}",
                    job.user_id, job.group_id, kind, image
                );
                if !test_only {
                    return Err(Error::ImageDenied {
                        uid: job.user_id,
                        gid: job.group_id,
                        kind,
                        image: image.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Test-only dynamic path: prove a block could exist, narrow the mask
    /// to it, and report the job runnable without materializing anything.
    fn test_only_synthesis(
        &self,
        job: &JobRequest,
        avail: &mut NodeMask,
        target_size: u32,
    ) -> Result<Option<BlockHandle>, Error> {
        let base = job.required_mask.as_ref().unwrap_or(avail);
        debug!("trying with all free blocks");
        let block = synthesize_block(
            &self.shape,
            job,
            target_size,
            base,
            &[],
            self.config.cpus_per_bp(),
            self.config.bp_node_cnt,
            self.next_dyn_id(),
        );
        match block {
            Some(block) => {
                avail.intersect_with(&block.mask)?;
                Ok(None)
            }
            None => {
                error!("job {} will never run on this system", job.job_id);
                Err(Error::NeverRunnable)
            }
        }
    }

    /// Non-test dynamic creation: try progressively fewer obstacles —
    /// every block, then only booted ones, then only job-bearing ones —
    /// and register the first carve that works.
    fn create_across_views(
        &self,
        job: &JobRequest,
        avail: &NodeMask,
        target_size: u32,
    ) -> Result<bool, Error> {
        let base = job.required_mask.as_ref().unwrap_or(avail);
        for (attempt, view) in [View::All, View::Booted, View::JobBearing]
            .into_iter()
            .enumerate()
        {
            let mut cat = self.catalogue.lock();
            let obstacles: Vec<Block> = cat
                .view_handles(view)
                .into_iter()
                .filter_map(|h| cat.get(h).cloned())
                .collect();
            let obstacle_refs: Vec<&Block> = obstacles.iter().collect();
            debug!("trying to create with view {}", attempt + 1);
            if let Some(block) = synthesize_block(
                &self.shape,
                job,
                target_size,
                base,
                &obstacle_refs,
                self.config.cpus_per_bp(),
                self.config.bp_node_cnt,
                self.next_dyn_id(),
            ) {
                cat.add(block);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next_dyn_id(&self) -> String {
        format!("RMP{}", self.next_dyn_id.fetch_add(1, Ordering::Relaxed))
    }
}
