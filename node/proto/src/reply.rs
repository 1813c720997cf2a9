// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Forwarding plans and the aggregated reply entries they produce.

use crate::kinds::MessageKind;
use crate::pack::{pack_addr, pack_str, unpack_addr, unpack_str, PackBuf};
use crate::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;

/// One node a message should be relayed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub name: String,
    pub node_id: u16,
    pub addr: SocketAddrV4,
}

/// The residual dispatch tree carried in a header.
///
/// An empty target list disables fan-out. `branch_timeout_ms` is the wait
/// budget granted to each branch; every hop shrinks it before relaying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardPlan {
    pub targets: Vec<ForwardTarget>,
    pub branch_timeout_ms: u32,
}

impl ForwardPlan {
    pub fn new(targets: Vec<ForwardTarget>, branch_timeout_ms: u32) -> ForwardPlan {
        ForwardPlan {
            targets,
            branch_timeout_ms,
        }
    }

    pub fn count(&self) -> u16 {
        self.targets.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u16(self.count());
        buf.put_u32(self.branch_timeout_ms);
        for target in &self.targets {
            pack_str(buf, &target.name);
            buf.put_u16(target.node_id);
            pack_addr(buf, Some(target.addr));
        }
    }

    pub fn unpack(buf: &mut Bytes) -> Result<ForwardPlan, Error> {
        buf.need(6)?;
        let count = buf.get_u16() as usize;
        let branch_timeout_ms = buf.get_u32();
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            let name = unpack_str(buf)?;
            buf.need(2)?;
            let node_id = buf.get_u16();
            let addr = unpack_addr(buf)?.ok_or(Error::IncompletePacket)?;
            targets.push(ForwardTarget {
                name,
                node_id,
                addr,
            });
        }
        Ok(ForwardPlan {
            targets,
            branch_timeout_ms,
        })
    }
}

/// Reply payload from a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReply {
    pub node_name: String,
    pub node_id: u16,
    pub data: Bytes,
}

impl NodeReply {
    pub fn bare(node_id: u16) -> NodeReply {
        NodeReply {
            node_id,
            ..Default::default()
        }
    }
}

/// One group of equivalent replies in an aggregated response list.
///
/// Replies collapse into a group when they share `(return_code, kind)`;
/// the nodes list keeps one record per responding (or failed) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetEntry {
    pub kind: MessageKind,
    pub return_code: u32,
    pub err: u32,
    pub nodes: Vec<NodeReply>,
}

impl RetEntry {
    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u16(self.kind as u16);
        buf.put_u32(self.return_code);
        buf.put_u32(self.err);
        buf.put_u16(self.nodes.len() as u16);
        for node in &self.nodes {
            pack_str(buf, &node.node_name);
            buf.put_u16(node.node_id);
            buf.put_u32(node.data.len() as u32);
            buf.put_slice(&node.data);
        }
    }

    pub fn unpack(buf: &mut Bytes) -> Result<RetEntry, Error> {
        buf.need(12)?;
        let kind = MessageKind::from_wire(buf.get_u16())?;
        let return_code = buf.get_u32();
        let err = buf.get_u32();
        let count = buf.get_u16() as usize;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            let node_name = unpack_str(buf)?;
            buf.need(6)?;
            let node_id = buf.get_u16();
            let len = buf.get_u32() as usize;
            buf.need(len)?;
            let data = buf.copy_to_bytes(len);
            nodes.push(NodeReply {
                node_name,
                node_id,
                data,
            });
        }
        Ok(RetEntry {
            kind,
            return_code,
            err,
            nodes,
        })
    }
}

/// Fold one node reply into an aggregated list, grouping by
/// `(return_code, kind)` and preserving the arrival order of groups.
pub fn push_reply(
    list: &mut Vec<RetEntry>,
    kind: MessageKind,
    return_code: u32,
    err: u32,
    node: NodeReply,
) {
    for entry in list.iter_mut() {
        if entry.return_code == return_code && entry.kind == kind {
            entry.nodes.push(node);
            return;
        }
    }
    list.push(RetEntry {
        kind,
        return_code,
        err,
        nodes: vec![node],
    });
}

/// Total node replies across an aggregated list.
pub fn reply_node_count(list: &[RetEntry]) -> usize {
    list.iter().map(|e| e.nodes.len()).sum()
}
