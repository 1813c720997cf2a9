// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Block placement: the live block catalogue, image admission control,
//! and the engine that matches a pending job onto a block or synthesises
//! one dynamically.

mod block;
mod catalogue;
mod dynamic;
mod engine;
mod images;
mod request;

pub use block::{Block, BlockImages, BlockOwner, BlockState};
pub use catalogue::{BlockHandle, Catalogue, View};
pub use dynamic::synthesize_block;
pub use engine::{PlacementEngine, PlacementOutcome};
pub use images::{GroupLookup, ImageAcl, OsGroupLookup, StaticGroupLookup, MAX_GROUPS};
pub use request::{JobImages, JobRequest, PlacementInfo};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot run: asking for {req} base partitions, limit is {max}")]
    TooManyNodes { req: u32, max: u32 },
    #[error("user {uid}:{gid} is not allowed to use {kind} {image}")]
    ImageDenied {
        uid: u32,
        gid: u32,
        kind: &'static str,
        image: String,
    },
    #[error("no resources fit the request")]
    NoFit,
    #[error("the job will never run on this system")]
    NeverRunnable,
    #[error("block {0} is not free and cannot be removed")]
    RemoveBusy(String),
    #[error("block {0} already runs a job")]
    AlreadyOccupied(String),
    #[error("group lookup failed: {0}")]
    GroupLookup(String),
    #[error(transparent)]
    Topology(#[from] arbor_topology::Error),
}
