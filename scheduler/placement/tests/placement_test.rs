// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use arbor_config::{Config, ImageConf, LayoutMode};
use arbor_placement::{
    Block, BlockImages, BlockOwner, BlockState, Catalogue, Error, ImageAcl, JobRequest,
    PlacementEngine, PlacementOutcome, StaticGroupLookup,
};
use arbor_proto::ConnectionType;
use arbor_topology::{Geometry, MachineShape, NodeMask};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn test_config(layout: LayoutMode) -> Arc<Config> {
    let mut config = Config::default();
    config.machine_shape = [4, 4, 4];
    config.bp_node_cnt = 512;
    config.cpus_per_node = 1;
    config.layout_mode = layout;
    Arc::new(Config::new(config).unwrap())
}

fn shape() -> MachineShape {
    MachineShape::new([4, 4, 4])
}

fn make_block(id: &str, start: [u16; 3], geo: [u16; 3]) -> Block {
    let shape = shape();
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

fn engine_with(
    config: Arc<Config>,
    blocks: Vec<Block>,
    groups: Vec<(u32, Vec<u32>)>,
) -> PlacementEngine {
    let total_cpus = shape().node_count() as u32 * config.cpus_per_bp();
    let mut catalogue = Catalogue::new(total_cpus);
    for block in blocks {
        catalogue.add(block);
    }
    PlacementEngine::new(
        config,
        Arc::new(Mutex::new(catalogue)),
        ImageAcl::new(Box::new(StaticGroupLookup(groups))),
    )
}

fn full_avail() -> NodeMask {
    NodeMask::full(shape().node_count())
}

#[test]
fn wildcard_geometry_takes_the_single_fitting_block() {
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![make_block("RMP0", [0, 0, 0], [1, 1, 1])],
        vec![],
    );
    let mut job = JobRequest::new(1, 500, 100, 512);
    let mut avail = full_avail();

    let outcome = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap();

    let cat = engine.catalogue().lock();
    let handle = match outcome {
        PlacementOutcome::Placed(handle) => handle,
        other => panic!("expected placement, got {other:?}"),
    };
    let chosen = cat.get(handle).unwrap();
    assert_eq!(chosen.id, "RMP0");
    // availability narrowed to exactly the chosen block
    assert_eq!(avail, chosen.mask);
    assert_eq!(job.placement.block_id.as_deref(), Some("RMP0"));
    assert_eq!(job.placement.node_cnt, 512);
}

#[test]
fn fixed_geometry_matches_after_one_rotation() {
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![make_block("RMP0", [0, 0, 0], [2, 4, 2])],
        vec![],
    );
    let mut job = JobRequest::new(2, 500, 100, 512);
    job.geometry = Geometry([2, 2, 4]);
    job.rotate = true;
    let mut avail = full_avail();

    let outcome = engine
        .submit_job(&mut job, &mut avail, 8, 32, 0, false)
        .unwrap();
    assert!(matches!(outcome, PlacementOutcome::Placed(_)));
}

#[test]
fn fixed_geometry_without_rotation_fails() {
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![make_block("RMP0", [0, 0, 0], [2, 4, 2])],
        vec![],
    );
    let mut job = JobRequest::new(2, 500, 100, 512);
    job.geometry = Geometry([4, 2, 2]);
    job.rotate = false;
    let mut avail = full_avail();

    let err = engine
        .submit_job(&mut job, &mut avail, 8, 32, 0, false)
        .unwrap_err();
    assert!(matches!(err, Error::NoFit));
}

#[test]
fn denied_image_is_a_hard_fail_without_catalogue_mutation() {
    let mut config = Config::default();
    config.machine_shape = [4, 4, 4];
    config.linux_images = vec![ImageConf {
        name: "bar".to_owned(),
        default: false,
        groups: vec![999],
    }];
    let config = Arc::new(Config::new(config).unwrap());
    let engine = engine_with(
        config,
        vec![make_block("RMP0", [0, 0, 0], [1, 1, 1])],
        vec![(500, vec![100])],
    );

    let mut job = JobRequest::new(3, 500, 100, 512);
    job.images.linux = Some("foo".to_owned());
    let mut avail = full_avail();
    let before = avail.clone();

    let err = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap_err();
    assert!(matches!(err, Error::ImageDenied { .. }), "got {err:?}");
    assert_eq!(avail, before);
    let cat = engine.catalogue().lock();
    assert_eq!(cat.len(), 1);
    assert_eq!(cat.get(cat.handles()[0]).unwrap().state, BlockState::Free);
}

#[test]
fn procs_outside_block_range_do_not_match() {
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![make_block("RMP0", [0, 0, 0], [1, 1, 1])],
        vec![],
    );
    let mut job = JobRequest::new(4, 500, 100, 1024);
    let mut avail = full_avail();
    let err = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap_err();
    assert!(matches!(err, Error::NoFit));
}

#[test]
fn req_nodes_above_max_is_rejected_outright() {
    let engine = engine_with(test_config(LayoutMode::Static), vec![], vec![]);
    let mut job = JobRequest::new(5, 500, 100, 512);
    let mut avail = full_avail();
    let err = engine
        .submit_job(&mut job, &mut avail, 1, 2, 4, false)
        .unwrap_err();
    assert!(matches!(err, Error::TooManyNodes { req: 4, max: 2 }));
}

#[test]
fn occupied_overlapping_block_disqualifies_candidate() {
    let mut busy = make_block("RMP1", [0, 0, 0], [2, 2, 2]);
    busy.owner = BlockOwner::Job(77);
    // candidate shares nodes with the busy block
    let candidate = make_block("RMP0", [0, 0, 0], [2, 2, 2]);
    let clear = make_block("RMP2", [2, 2, 2], [2, 2, 2]);
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![candidate, busy, clear],
        vec![],
    );

    let mut job = JobRequest::new(6, 500, 100, 512);
    let mut avail = full_avail();
    let outcome = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap();
    let handle = match outcome {
        PlacementOutcome::Placed(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(engine.catalogue().lock().get(handle).unwrap().id, "RMP2");
}

#[test]
fn image_mismatch_retries_once_with_checks_disabled() {
    let mut block = make_block("RMP0", [0, 0, 0], [1, 1, 1]);
    block.images.linux = Some("old-linux".to_owned());
    let engine = engine_with(test_config(LayoutMode::Static), vec![block], vec![]);

    let mut job = JobRequest::new(7, 500, 100, 512);
    job.images.linux = Some("new-linux".to_owned());
    let mut avail = full_avail();

    // The only candidate differs solely in its image; the second pass
    // accepts it and the caller reboots it with the requested image.
    let outcome = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap();
    assert!(matches!(outcome, PlacementOutcome::Placed(_)));
}

#[test]
fn required_node_list_pins_geometry_and_start() {
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![
            make_block("RMP0", [2, 0, 0], [2, 1, 1]),
            make_block("RMP1", [0, 0, 0], [2, 2, 2]),
        ],
        vec![],
    );
    let mut job = JobRequest::new(8, 500, 100, 512);
    job.required_nodes = Some("bgl[000x111]".to_owned());
    let mut avail = full_avail();

    let outcome = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap();
    let handle = match outcome {
        PlacementOutcome::Placed(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    // only RMP1 contains the required box
    assert_eq!(engine.catalogue().lock().get(handle).unwrap().id, "RMP1");
    assert_eq!(job.geometry, Geometry([2, 2, 2]));
    assert_eq!(job.start, Some([0, 0, 0]));
}

#[test]
fn dynamic_layout_synthesizes_when_nothing_matches() {
    let engine = engine_with(test_config(LayoutMode::Dynamic), vec![], vec![]);
    let mut job = JobRequest::new(9, 500, 100, 512);
    let mut avail = full_avail();

    let outcome = engine
        .submit_job(&mut job, &mut avail, 8, 32, 0, false)
        .unwrap();
    let handle = match outcome {
        PlacementOutcome::Placed(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    let cat = engine.catalogue().lock();
    let block = cat.get(handle).unwrap();
    assert_eq!(block.bp_count, 8);
    assert!(block.id.starts_with("RMP"));
    assert_eq!(avail, block.mask);
}

#[test]
fn dynamic_test_only_narrows_without_materializing() {
    let engine = engine_with(test_config(LayoutMode::Dynamic), vec![], vec![]);
    let mut job = JobRequest::new(10, 500, 100, 512);
    let mut avail = full_avail();
    let before_count = avail.count();

    let outcome = engine
        .submit_job(&mut job, &mut avail, 8, 32, 0, true)
        .unwrap();
    assert_eq!(outcome, PlacementOutcome::RunnableUnassigned);
    assert!(engine.catalogue().lock().is_empty());
    assert!(avail.count() < before_count);
    assert_eq!(avail.count(), 8);
    assert_eq!(job.placement.block_id, None);
}

#[test]
fn impossible_test_only_request_is_never_runnable() {
    let engine = engine_with(test_config(LayoutMode::Dynamic), vec![], vec![]);
    let mut job = JobRequest::new(11, 500, 100, 512);
    job.geometry = Geometry([8, 1, 1]); // machine is only 4 wide
    let mut avail = full_avail();

    let err = engine
        .submit_job(&mut job, &mut avail, 8, 32, 0, true)
        .unwrap_err();
    assert!(matches!(err, Error::NeverRunnable));
}

#[test]
fn bad_bp_states_poison_the_block_and_fire_the_trigger() {
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_hook = Arc::clone(&fired);
    let engine = engine_with(
        test_config(LayoutMode::Static),
        vec![
            make_block("RMP0", [0, 0, 0], [1, 1, 1]),
            make_block("RMP1", [1, 0, 0], [1, 1, 1]),
        ],
        vec![],
    )
    .with_bp_check(Box::new(|block| block.id != "RMP0"))
    .with_block_error_hook(Box::new(move |_| {
        fired_hook.fetch_add(1, Ordering::SeqCst);
    }));

    let mut job = JobRequest::new(12, 500, 100, 512);
    let mut avail = full_avail();
    let outcome = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap();
    let handle = match outcome {
        PlacementOutcome::Placed(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };

    let cat = engine.catalogue().lock();
    assert_eq!(cat.get(handle).unwrap().id, "RMP1");
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    let poisoned = cat
        .handles()
        .into_iter()
        .find(|h| cat.get(*h).unwrap().id == "RMP0")
        .unwrap();
    assert_eq!(cat.get(poisoned).unwrap().state, BlockState::Error);
}

#[test]
fn cpu_budget_gates_non_test_submissions() {
    let config = test_config(LayoutMode::Static);
    let mut catalogue = Catalogue::new(512);
    let block = make_block("RMP0", [0, 0, 0], [2, 2, 2]);
    catalogue.add(block);
    let engine = PlacementEngine::new(
        config,
        Arc::new(Mutex::new(catalogue)),
        ImageAcl::new(Box::new(StaticGroupLookup(vec![]))),
    );

    let mut job = JobRequest::new(13, 500, 100, 4096);
    let mut avail = full_avail();
    let err = engine
        .submit_job(&mut job, &mut avail, 1, 32, 0, false)
        .unwrap_err();
    assert!(matches!(err, Error::NoFit));
}
