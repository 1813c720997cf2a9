// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Framed send and receive.
//!
//! Frame layout: `u32 length · header · credential · body`. The header is
//! packed with a zero body length and patched once the body has been
//! packed, so the length on the wire is exact. The credential is created
//! and destroyed inside the send path; on receive it is verified and
//! destroyed before the body is touched.

use crate::forward::FanOut;
use crate::{Error, MAX_FRAME_LEN};
use arbor_auth::AuthProvider;
use arbor_config::DEFAULT_MSG_TIMEOUT_MS;
use arbor_proto::{Body, ForwardPlan, Header, Message, RetEntry, ReturnCode};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, error, warn};
use std::net::{SocketAddrV4, TcpStream};
use std::sync::Arc;

fn resolve(timeout_ms: u64) -> u64 {
    if timeout_ms == 0 {
        DEFAULT_MSG_TIMEOUT_MS
    } else {
        timeout_ms
    }
}

/// A message as it arrived, together with the replies already aggregated
/// below us and the fan-out still in flight.
#[derive(Debug)]
pub struct Received {
    pub msg: Message,
    pub reply_list: Vec<RetEntry>,
    pub pending: Option<FanOut>,
    /// Peer the frame arrived from.
    pub peer: Option<SocketAddrV4>,
}

/// Pack and send `msg`, folding `replies` into the header. Returns the
/// frame size in bytes.
pub fn send_msg_with_replies(
    stream: &mut TcpStream,
    msg: &Message,
    replies: Vec<RetEntry>,
    auth: &dyn AuthProvider,
    timeout_ms: u64,
) -> Result<usize, Error> {
    let mut header = Header::for_message(msg);
    header.ret_entries = replies;

    let mut buf = BytesMut::with_capacity(512);
    buf.put_u32(0); // frame length, patched below
    let header_at = buf.len();
    header.pack(&mut buf);

    let cred = auth.create()?;
    auth.pack(&cred, &mut buf);
    drop(cred);

    let body_at = buf.len();
    msg.body.pack(&mut buf);
    let body_length = (buf.len() - body_at) as u32;
    Header::patch_body_length(&mut buf, header_at, body_length);

    let frame_length = (buf.len() - 4) as u32;
    buf[0..4].copy_from_slice(&frame_length.to_be_bytes());

    arbor_net::write_all_timeout(stream, &buf, resolve(timeout_ms))?;
    Ok(buf.len())
}

/// Pack and send `msg` with no aggregated replies.
pub fn send_msg(
    stream: &mut TcpStream,
    msg: &Message,
    auth: &dyn AuthProvider,
    timeout_ms: u64,
) -> Result<usize, Error> {
    send_msg_with_replies(stream, msg, Vec::new(), auth, timeout_ms)
}

/// Receive one framed message.
///
/// Drains any aggregated entries the header carried into `reply_list`,
/// spawns the residual fan-out when the forward plan is non-empty, then
/// verifies the credential and unpacks the body.
pub fn recv_msg(
    stream: &mut TcpStream,
    auth: &Arc<dyn AuthProvider>,
    timeout_ms: u64,
    tree_width: u16,
    peer: Option<SocketAddrV4>,
) -> Result<Received, Error> {
    let timeout_ms = resolve(timeout_ms);

    let len_raw = arbor_net::read_exact_timeout(stream, 4, timeout_ms)?;
    let frame_len = u32::from_be_bytes(len_raw.try_into().expect("read four bytes")) as usize;
    if frame_len > MAX_FRAME_LEN {
        return Err(Error::OversizedFrame(frame_len));
    }
    let raw = arbor_net::read_exact_timeout(stream, frame_len, timeout_ms)?;
    let mut buf = Bytes::from(raw);

    let mut header = Header::unpack(&mut buf)?;
    header.check_version()?;

    let reply_list = std::mem::take(&mut header.ret_entries);

    // When we relay, the origin travels in the header; fill it from the
    // connection when we are the first hop.
    let orig_addr = header.orig_addr.or(peer);

    let pending = if !header.forward.is_empty() {
        debug!("forwarding to {} nodes", header.forward.count());
        // The remaining bytes (credential + body) relay verbatim.
        Some(FanOut::spawn(
            buf.clone(),
            &header,
            orig_addr,
            tree_width,
            Arc::clone(auth),
        ))
    } else {
        None
    };

    let cred = auth.unpack(&mut buf)?;
    let verified = auth.verify(&cred, None);
    drop(cred);
    if let Err(e) = verified {
        error!("authentication: {}", e);
        return Err(e.into());
    }

    if header.body_length as usize > buf.remaining() {
        return Err(Error::Proto(arbor_proto::Error::IncompletePacket));
    }
    let body = Body::unpack(header.kind, &mut buf)?;

    let msg = Message {
        kind: header.kind,
        body,
        forward: ForwardPlan::default(),
        orig_addr,
        source_node_id: header.source_node_id,
        address: None,
    };
    Ok(Received {
        msg,
        reply_list,
        pending,
        peer,
    })
}

/// Send a request and wait for its reply on the same connection.
///
/// When the request fans out, the receive deadline grows by one branch
/// budget per expected relay depth, mirroring how long the tree may
/// legitimately take to drain.
pub fn send_and_recv_msg(
    stream: &mut TcpStream,
    req: &Message,
    auth: &Arc<dyn AuthProvider>,
    timeout_ms: u64,
    tree_width: u16,
) -> Result<Received, Error> {
    send_msg(stream, req, auth.as_ref(), timeout_ms)?;

    let mut recv_timeout = resolve(timeout_ms);
    let fwd_cnt = req.forward.count() as u64;
    if fwd_cnt > 0 {
        let steps = fwd_cnt / tree_width.max(1) as u64 + 1;
        recv_timeout += steps * req.forward.branch_timeout_ms as u64;
    }
    recv_msg(stream, auth, recv_timeout, tree_width, None)
}

/// Answer a received request with a bare return code, folding everything
/// the fan-out collected into the response header.
pub fn send_rc_response(
    stream: &mut TcpStream,
    received: &mut Received,
    rc: ReturnCode,
    auth: &dyn AuthProvider,
    timeout_ms: u64,
) -> Result<usize, Error> {
    let mut replies = std::mem::take(&mut received.reply_list);
    if let Some(fanout) = received.pending.take() {
        fanout.wait(&mut replies);
    }

    let mut resp = Message::rc(rc.as_wire());
    resp.orig_addr = received.msg.orig_addr;
    resp.source_node_id = received.msg.source_node_id;
    send_msg_with_replies(stream, &resp, replies, auth, timeout_ms)
}

/// Log when a reply carries entries nobody asked for.
pub(crate) fn expect_no_replies(reply_list: &[RetEntry]) {
    if !reply_list.is_empty() {
        warn!(
            "got {} forwarded responses, expected none",
            reply_list.len()
        );
    }
}
