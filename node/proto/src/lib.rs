// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Wire-level types for the arbor protocol: message kinds, return codes,
//! headers with forwarding plans, aggregated reply entries, and typed
//! message bodies.
//!
//! Everything here packs big-endian in declared field order. The framing
//! itself (length prefix, credential placement, body-length re-patching)
//! is driven by the rpc layer; this crate only knows how individual pieces
//! serialize.

mod body;
mod header;
mod kinds;
mod pack;
mod reply;
mod retcode;

pub use body::{Body, JobUpdate};
pub use header::{Header, HEADER_FLAGS_NONE};
pub use kinds::{ConnectionType, MessageKind};
pub use pack::{
    pack_addr, pack_opt_str, pack_str, unpack_addr, unpack_opt_str, unpack_str, PackBuf,
};
pub use reply::{push_reply, reply_node_count, ForwardPlan, ForwardTarget, NodeReply, RetEntry};
pub use retcode::ReturnCode;

use std::net::SocketAddrV4;
use thiserror::Error;

/// Protocol version tag carried in every header.
pub const PROTO_VERSION: u16 = 0x0300;

/// Sentinel for an unset 32-bit field.
pub const NO_VAL: u32 = 0xffff_fffe;
/// Sentinel for an unlimited 32-bit field.
pub const INFINITE: u32 = 0xffff_ffff;
/// Sentinel for an unset 16-bit field.
pub const NO_VAL16: u16 = 0xfffe;
/// Sentinel for an unlimited 16-bit field.
pub const INFINITE16: u16 = 0xffff;

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol version mismatch, got {0:#06x}")]
    VersionMismatch(u16),
    #[error("incomplete packet")]
    IncompletePacket,
    #[error("unknown message kind {0}")]
    UnknownKind(u16),
    #[error("malformed string field")]
    BadString,
}

/// A protocol message as held in memory on either side of the wire.
///
/// Immutable once handed to the send path. On the receive side the rpc
/// layer fills in the reply list and the forwarding state separately; the
/// message itself only carries what crossed the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub body: Body,
    pub forward: ForwardPlan,
    /// Address of the node the request originated from, when forwarded.
    pub orig_addr: Option<SocketAddrV4>,
    /// Node id of the sender within a forwarding span.
    pub source_node_id: u16,
    /// Destination for node-directed sends. Not packed.
    pub address: Option<SocketAddrV4>,
}

impl Message {
    pub fn new(kind: MessageKind, body: Body) -> Message {
        Message {
            kind,
            body,
            forward: ForwardPlan::default(),
            orig_addr: None,
            source_node_id: 0,
            address: None,
        }
    }

    /// A bare return-code message.
    pub fn rc(code: u32) -> Message {
        Message::new(MessageKind::Rc, Body::Rc { code })
    }

    pub fn with_address(mut self, addr: SocketAddrV4) -> Message {
        self.address = Some(addr);
        self
    }

    pub fn with_forward(mut self, forward: ForwardPlan) -> Message {
        self.forward = forward;
        self
    }

    /// The return code of an `Rc` reply, if this is one.
    pub fn rc_code(&self) -> Option<u32> {
        match self.body {
            Body::Rc { code } => Some(code),
            _ => None,
        }
    }
}
