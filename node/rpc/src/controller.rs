// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The controller client: primary/backup failover, the standby-mode retry
//! window, and the send-only paths with bounded shutdown retries.

use crate::codec::{expect_no_replies, recv_msg, send_and_recv_msg, send_msg};
use crate::{Error, Received, RetryPolicy};
use arbor_auth::AuthProvider;
use arbor_config::Config;
use arbor_proto::{ForwardTarget, Message, MessageKind, RetEntry, ReturnCode};
use arbor_proto::{push_reply, NodeReply};
use bytes::Bytes;
use log::{debug, warn};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Which controller instance to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerId {
    Primary,
    Backup,
}

/// Remap generic transport failures to their controller-scoped variants,
/// preserving the rest of the taxonomy.
fn remap_controller_err(err: Error) -> Error {
    match err.return_code() {
        ReturnCode::ConnectionError => Error::ControllerConnection,
        ReturnCode::SendError => Error::ControllerSend,
        ReturnCode::RecvError | ReturnCode::RecvTimeout => Error::ControllerRecv,
        ReturnCode::ShutdownError => Error::ControllerShutdown,
        _ => err,
    }
}

pub struct ControllerClient {
    config: Arc<Config>,
    auth: Arc<dyn AuthProvider>,
}

impl ControllerClient {
    pub fn new(config: Arc<Config>, auth: Arc<dyn AuthProvider>) -> ControllerClient {
        ControllerClient { config, auth }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Connect to the primary, falling back to the backup when one is
    /// configured. The preference is re-evaluated on every call.
    pub fn open_controller_conn(&self) -> Result<TcpStream, Error> {
        match arbor_net::connect(self.config.primary()) {
            Ok(stream) => return Ok(stream),
            Err(e) => debug!("failed to contact primary controller: {}", e),
        }
        if let Some(backup) = self.config.backup() {
            match arbor_net::connect(backup) {
                Ok(stream) => return Ok(stream),
                Err(e) => debug!("failed to contact backup controller: {}", e),
            }
        }
        Err(Error::ControllerConnection)
    }

    /// Connect to one specific controller instance.
    pub fn open_controller_conn_to(&self, which: ControllerId) -> Result<TcpStream, Error> {
        let addr = match which {
            ControllerId::Primary => self.config.primary(),
            ControllerId::Backup => self.config.backup().ok_or(Error::ControllerConnection)?,
        };
        arbor_net::connect(addr).map_err(|e| remap_controller_err(e.into()))
    }

    /// Send a request to the controller and wait for its reply, riding out
    /// a backup takeover with the default standby schedule.
    pub fn send_recv_controller(&self, req: &Message) -> Result<Message, Error> {
        self.send_recv_controller_with(req, &RetryPolicy::standby())
    }

    /// As [`ControllerClient::send_recv_controller`], with a caller-supplied
    /// standby retry schedule.
    ///
    /// While the backup is asserting takeover the controller answers
    /// `Rc(InStandbyMode)`; that reply is transparent here until the grace
    /// window (`1.5 ×` the controller timeout) closes. Node registration
    /// never waits: the node should just re-register with whichever
    /// instance wins.
    pub fn send_recv_controller_with(
        &self,
        req: &Message,
        standby: &RetryPolicy,
    ) -> Result<Message, Error> {
        let start = Instant::now();
        let timeout = self.config.controller_timeout_secs;
        let window = Duration::from_secs(timeout + timeout / 2);

        let mut stream = self.open_controller_conn()?;
        let mut attempt = 0u32;
        loop {
            let result = self.exchange(&mut stream, req);
            let received = match result {
                Ok(received) => received,
                Err(e) => return Err(remap_controller_err(e)),
            };
            expect_no_replies(&received.reply_list);

            let standing_by =
                received.msg.rc_code() == Some(ReturnCode::InStandbyMode.as_wire());
            if standing_by
                && req.kind != MessageKind::NodeRegistration
                && self.config.backup().is_some()
                && attempt < standby.max_attempts
                && start.elapsed() < window
            {
                debug!("neither primary nor backup controller responding, sleep and retry");
                thread::sleep(standby.delay(attempt));
                attempt += 1;
                stream = match self.open_controller_conn() {
                    Ok(stream) => stream,
                    Err(e) => return Err(remap_controller_err(e)),
                };
                continue;
            }
            return Ok(received.msg);
        }
    }

    fn exchange(&self, stream: &mut TcpStream, req: &Message) -> Result<Received, Error> {
        let received = send_and_recv_msg(stream, req, &self.auth, 0, self.config.tree_width)?;
        arbor_net::shutdown_conn(stream)?;
        Ok(received)
    }

    /// Send to the controller without waiting for a reply.
    pub fn send_only_controller(&self, req: &Message) -> Result<(), Error> {
        let run = || -> Result<(), Error> {
            let mut stream = self.open_controller_conn()?;
            send_msg(&mut stream, req, self.auth.as_ref(), 0)?;
            arbor_net::shutdown_conn(&stream)?;
            Ok(())
        };
        run().map_err(remap_controller_err)
    }

    /// Send to the address carried by the message, without waiting.
    pub fn send_only_node(&self, req: &Message) -> Result<(), Error> {
        let addr = req.address.ok_or(Error::NoAddress)?;
        let mut stream = arbor_net::connect(addr)?;
        send_msg(&mut stream, req, self.auth.as_ref(), 0)?;
        arbor_net::shutdown_conn(&stream)?;
        Ok(())
    }

    /// Send to `dest` and aggregate the replies of the whole forwarding
    /// tree below it, the dialed node included.
    pub fn send_recv_node(
        &self,
        req: &Message,
        dest: &ForwardTarget,
        timeout_ms: u64,
    ) -> Result<(Message, Vec<RetEntry>), Error> {
        let mut stream = arbor_net::connect(dest.addr)?;
        let received =
            send_and_recv_msg(&mut stream, req, &self.auth, timeout_ms, self.config.tree_width)?;
        if let Err(e) = arbor_net::shutdown_conn(&stream) {
            warn!("shutdown after node exchange failed: {}", e);
        }

        let mut reply_list = received.reply_list;
        let rc = received
            .msg
            .rc_code()
            .unwrap_or_else(|| ReturnCode::Error.as_wire());
        push_reply(
            &mut reply_list,
            received.msg.kind,
            rc,
            0,
            NodeReply {
                node_name: dest.name.clone(),
                node_id: dest.node_id,
                data: Bytes::new(),
            },
        );
        Ok((received.msg, reply_list))
    }

    /// Receive one message on an accepted connection, using the snapshot's
    /// width for any fan-out it asks for.
    pub fn recv_on(
        &self,
        stream: &mut TcpStream,
        timeout_ms: u64,
        peer: Option<std::net::SocketAddrV4>,
    ) -> Result<Received, Error> {
        recv_msg(stream, &self.auth, timeout_ms, self.config.tree_width, peer)
    }
}
