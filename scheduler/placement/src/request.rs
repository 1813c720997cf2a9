// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use arbor_proto::ConnectionType;
use arbor_topology::{Coord, Geometry, NodeMask};

/// Images a job asked to boot with. Unset fields accept whatever a block
/// already runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobImages {
    pub blrts: Option<String>,
    pub linux: Option<String>,
    pub mloader: Option<String>,
    pub ramdisk: Option<String>,
}

/// What placement wrote back into the job once a block was chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementInfo {
    /// Chosen block, `None` while unassigned.
    pub block_id: Option<String>,
    pub ionodes: Option<String>,
    /// Actual node count granted, as opposed to the requested range.
    pub node_cnt: u32,
    pub geometry: Option<Geometry>,
    pub conn_type: Option<ConnectionType>,
}

/// A pending job as the placement engine sees it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: u32,
    pub user_id: u32,
    pub group_id: u32,
    /// Requested processor range.
    pub procs_min: u32,
    pub procs_max: Option<u32>,
    /// Requested geometry; wildcard when the job only asked for a count.
    pub geometry: Geometry,
    pub rotate: bool,
    pub start: Option<Coord>,
    pub conn_type: ConnectionType,
    pub images: JobImages,
    /// Literal node list the job insists on, e.g. `bgl[000x133]`.
    pub required_nodes: Option<String>,
    pub required_mask: Option<NodeMask>,
    pub partition: String,
    /// Whether the job's partition allows sharing small blocks.
    pub shared: bool,
    pub placement: PlacementInfo,
}

impl JobRequest {
    pub fn new(job_id: u32, user_id: u32, group_id: u32, procs_min: u32) -> JobRequest {
        JobRequest {
            job_id,
            user_id,
            group_id,
            procs_min,
            procs_max: None,
            geometry: Geometry::wildcard(),
            rotate: false,
            start: None,
            conn_type: ConnectionType::Nav,
            images: JobImages::default(),
            required_nodes: None,
            required_mask: None,
            partition: String::new(),
            shared: false,
            placement: PlacementInfo::default(),
        }
    }
}
