// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::pack::{pack_addr, unpack_addr, PackBuf};
use crate::reply::{ForwardPlan, RetEntry};
use crate::{Error, MessageKind, Message, PROTO_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;

pub const HEADER_FLAGS_NONE: u16 = 0;

/// Byte offset of `body_length` inside a packed header: version, flags and
/// kind come first, two bytes each.
const BODY_LENGTH_OFFSET: usize = 6;

/// The wire header preceding every message body.
///
/// The header is packed once with a zero body length, and the length field
/// is patched in place after the body has been packed, so the value on the
/// wire is bit-exact without buffering the body twice.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u16,
    pub flags: u16,
    pub kind: MessageKind,
    pub body_length: u32,
    pub forward: ForwardPlan,
    /// Aggregated replies riding back upstream on a response.
    pub ret_entries: Vec<RetEntry>,
    pub orig_addr: Option<SocketAddrV4>,
    pub source_node_id: u16,
}

impl Header {
    /// Build a header describing `msg`, body length still unknown.
    pub fn for_message(msg: &Message) -> Header {
        Header {
            version: PROTO_VERSION,
            flags: HEADER_FLAGS_NONE,
            kind: msg.kind,
            body_length: 0,
            forward: msg.forward.clone(),
            ret_entries: Vec::new(),
            orig_addr: msg.orig_addr,
            source_node_id: msg.source_node_id,
        }
    }

    pub fn check_version(&self) -> Result<(), Error> {
        if self.version != PROTO_VERSION {
            return Err(Error::VersionMismatch(self.version));
        }
        Ok(())
    }

    pub fn pack(&self, buf: &mut BytesMut) {
        buf.put_u16(self.version);
        buf.put_u16(self.flags);
        buf.put_u16(self.kind as u16);
        buf.put_u32(self.body_length);
        self.forward.pack(buf);
        buf.put_u16(self.ret_entries.len() as u16);
        for entry in &self.ret_entries {
            entry.pack(buf);
        }
        pack_addr(buf, self.orig_addr);
        buf.put_u16(self.source_node_id);
    }

    pub fn unpack(buf: &mut Bytes) -> Result<Header, Error> {
        buf.need(10)?;
        let version = buf.get_u16();
        let flags = buf.get_u16();
        let kind = MessageKind::from_wire(buf.get_u16())?;
        let body_length = buf.get_u32();
        let forward = ForwardPlan::unpack(buf)?;
        buf.need(2)?;
        let ret_cnt = buf.get_u16() as usize;
        let mut ret_entries = Vec::with_capacity(ret_cnt);
        for _ in 0..ret_cnt {
            ret_entries.push(RetEntry::unpack(buf)?);
        }
        let orig_addr = unpack_addr(buf)?;
        buf.need(2)?;
        let source_node_id = buf.get_u16();
        Ok(Header {
            version,
            flags,
            kind,
            body_length,
            forward,
            ret_entries,
            orig_addr,
            source_node_id,
        })
    }

    /// Patch the body length into an already packed header that starts at
    /// `header_at` within `frame`.
    pub fn patch_body_length(frame: &mut [u8], header_at: usize, body_length: u32) {
        let at = header_at + BODY_LENGTH_OFFSET;
        frame[at..at + 4].copy_from_slice(&body_length.to_be_bytes());
    }
}
