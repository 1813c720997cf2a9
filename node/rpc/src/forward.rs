// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Tree fan-out of a received message to the remainder of its targets.
//!
//! Each hop splits the residual target list into branches, relays the
//! frame's credential and body verbatim under a fresh header, and
//! aggregates branch replies as they come back. A branch that dies is
//! still accounted for: its head contributes a synthetic entry carrying
//! the transport error's code.

use crate::codec::recv_msg;
use crate::Error;
use arbor_auth::AuthProvider;
use arbor_config::DEFAULT_MSG_TIMEOUT_MS;
use arbor_proto::{
    push_reply, ForwardPlan, ForwardTarget, Header, MessageKind, NodeReply, RetEntry, ReturnCode,
};
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type BranchReport = (u16, Result<Vec<RetEntry>, u32>);

/// Spread `total` targets across `width` branches.
///
/// Branches are walked from the last toward the first, each taking the
/// even share (rounded up) of what remains, so later branches absorb the
/// remainder and small totals land one target on each trailing branch.
pub fn set_span(total: usize, width: u16) -> Vec<u32> {
    let width = width.max(1) as usize;
    let mut span = vec![0u32; width];
    let mut left = total;
    for i in (0..width).rev() {
        if left == 0 {
            break;
        }
        let share = left.div_ceil(i + 1);
        span[i] = share as u32;
        left -= share;
    }
    span
}

/// Branch workers in flight for one received message.
#[derive(Debug)]
pub struct FanOut {
    rx: Receiver<BranchReport>,
    /// Branch heads that have not reported yet.
    outstanding: Vec<u16>,
    branch_timeout_ms: u32,
}

impl FanOut {
    /// Number of branches still expected to report.
    pub fn expected_branches(&self) -> usize {
        self.outstanding.len()
    }

    /// Relay `residual` (credential + body bytes) to every target of the
    /// header's plan, one worker per branch.
    pub fn spawn(
        residual: Bytes,
        header: &Header,
        orig_addr: Option<SocketAddrV4>,
        tree_width: u16,
        auth: Arc<dyn AuthProvider>,
    ) -> FanOut {
        let plan = &header.forward;
        let span = set_span(plan.targets.len(), tree_width);
        let (tx, rx) = bounded(span.iter().filter(|s| **s > 0).count());

        let mut outstanding = Vec::new();
        let mut cursor = 0usize;
        for branch_size in span {
            if branch_size == 0 {
                continue;
            }
            let branch = &plan.targets[cursor..cursor + branch_size as usize];
            cursor += branch_size as usize;

            let head = branch[0].clone();
            let rest: Vec<ForwardTarget> = branch[1..].to_vec();
            outstanding.push(head.node_id);

            let mut child = header.clone();
            child.ret_entries.clear();
            child.orig_addr = orig_addr;
            // One hop of budget is spent getting to the head.
            let shrunk = plan
                .branch_timeout_ms
                .saturating_sub(DEFAULT_MSG_TIMEOUT_MS as u32)
                .max(DEFAULT_MSG_TIMEOUT_MS as u32);
            child.forward = ForwardPlan::new(rest, shrunk);

            let residual = residual.clone();
            let branch_tx = tx.clone();
            let auth = Arc::clone(&auth);
            let branch_timeout = plan.branch_timeout_ms.max(DEFAULT_MSG_TIMEOUT_MS as u32);
            let spawned = thread::Builder::new().name("fwd-branch".to_owned()).spawn(
                move || {
                    let head_id = head.node_id;
                    let report =
                        relay_branch(child, head, residual, branch_timeout, tree_width, auth);
                    if let Err(code) = &report {
                        debug!("forward branch {} failed with code {}", head_id, code);
                    }
                    let _ = branch_tx.send((head_id, report));
                },
            );
            if let Err(e) = spawned {
                error!("unable to spawn forward branch: {}", e);
                let _ = tx.send((
                    *outstanding.last().expect("just pushed"),
                    Err(ReturnCode::Error.as_wire()),
                ));
            }
        }

        FanOut {
            rx,
            outstanding,
            branch_timeout_ms: plan.branch_timeout_ms.max(DEFAULT_MSG_TIMEOUT_MS as u32),
        }
    }

    /// Collect one report per expected branch into `list`, synthesizing a
    /// timeout entry for any branch that never reports.
    pub fn wait(mut self, list: &mut Vec<RetEntry>) {
        let deadline = Instant::now() + Duration::from_millis(self.branch_timeout_ms as u64);
        while !self.outstanding.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok((head_id, report)) => {
                    self.outstanding.retain(|id| *id != head_id);
                    match report {
                        Ok(entries) => {
                            for entry in entries {
                                for node in entry.nodes {
                                    push_reply(list, entry.kind, entry.return_code, entry.err, node);
                                }
                            }
                        }
                        Err(code) => {
                            push_reply(list, MessageKind::Rc, code, code, NodeReply::bare(head_id));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let timeout_code = ReturnCode::RecvTimeout.as_wire();
        for head_id in self.outstanding.drain(..) {
            push_reply(
                list,
                MessageKind::Rc,
                timeout_code,
                timeout_code,
                NodeReply::bare(head_id),
            );
        }
    }
}

/// Send the relayed frame to one branch head and bring back its
/// aggregated reply list, with the head's own answer folded in.
fn relay_branch(
    header: Header,
    head: ForwardTarget,
    residual: Bytes,
    branch_timeout_ms: u32,
    tree_width: u16,
    auth: Arc<dyn AuthProvider>,
) -> Result<Vec<RetEntry>, u32> {
    let run = || -> Result<Vec<RetEntry>, Error> {
        let mut stream = arbor_net::connect(head.addr)?;

        let mut buf = BytesMut::with_capacity(residual.len() + 128);
        buf.put_u32(0);
        header.pack(&mut buf);
        buf.put_slice(&residual);
        let frame_length = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&frame_length.to_be_bytes());
        arbor_net::write_all_timeout(&mut stream, &buf, branch_timeout_ms as u64)?;

        let mut received = recv_msg(
            &mut stream,
            &auth,
            branch_timeout_ms as u64,
            tree_width,
            None,
        )?;
        let rc = received
            .msg
            .rc_code()
            .unwrap_or_else(|| ReturnCode::Error.as_wire());
        push_reply(
            &mut received.reply_list,
            received.msg.kind,
            rc,
            0,
            NodeReply {
                node_name: head.name.clone(),
                node_id: head.node_id,
                data: Bytes::new(),
            },
        );
        let _ = arbor_net::shutdown_conn(&stream);
        Ok(received.reply_list)
    };
    run().map_err(|e| e.return_code().as_wire())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_absorbs_remainder_on_late_branches() {
        assert_eq!(set_span(13, 4), vec![3, 3, 3, 4]);
    }

    #[test]
    fn span_sums_to_total() {
        for total in 0..40usize {
            for width in 1..8u16 {
                let span = set_span(total, width);
                assert_eq!(span.len(), width as usize);
                assert_eq!(span.iter().sum::<u32>() as usize, total);
                assert!(span.iter().all(|s| *s as usize <= total.max(1)));
            }
        }
    }

    #[test]
    fn small_totals_take_one_target_per_trailing_branch() {
        assert_eq!(set_span(3, 4), vec![0, 1, 1, 1]);
        assert_eq!(set_span(1, 4), vec![0, 0, 0, 1]);
        assert_eq!(set_span(0, 4), vec![0, 0, 0, 0]);
    }
}
