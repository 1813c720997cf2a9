// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Framed message exchange over the transport layer: the send/receive
//! codec, the forwarding fan-out, and the controller client with its
//! failover and retry behavior.

mod codec;
mod controller;
mod forward;

pub use codec::{
    recv_msg, send_and_recv_msg, send_msg, send_msg_with_replies, send_rc_response, Received,
};
pub use controller::{ControllerClient, ControllerId};
pub use forward::{set_span, FanOut};

use arbor_proto::ReturnCode;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on a single frame; anything larger is treated as garbage.
pub const MAX_FRAME_LEN: usize = 16 << 20;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Net(#[from] arbor_net::Error),
    #[error(transparent)]
    Proto(#[from] arbor_proto::Error),
    #[error("authentication: {0}")]
    Auth(#[from] arbor_auth::Error),
    #[error("frame of {0} bytes exceeds limit")]
    OversizedFrame(usize),
    #[error("unable to contact controller")]
    ControllerConnection,
    #[error("send to controller failed")]
    ControllerSend,
    #[error("receive from controller failed")]
    ControllerRecv,
    #[error("controller connection shutdown failed")]
    ControllerShutdown,
    #[error("message has no destination address")]
    NoAddress,
}

impl Error {
    /// The wire code a peer would record for this failure.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            Error::Net(arbor_net::Error::Connection { .. }) => ReturnCode::ConnectionError,
            Error::Net(arbor_net::Error::Send(_)) => ReturnCode::SendError,
            Error::Net(arbor_net::Error::Recv(_)) => ReturnCode::RecvError,
            Error::Net(arbor_net::Error::RecvTimeout(_)) => ReturnCode::RecvTimeout,
            Error::Net(arbor_net::Error::Shutdown(_)) => ReturnCode::ShutdownError,
            Error::Net(arbor_net::Error::Socket(_)) => ReturnCode::SocketError,
            Error::Proto(arbor_proto::Error::VersionMismatch(_)) => ReturnCode::VersionMismatch,
            Error::Proto(_) => ReturnCode::IncompletePacket,
            Error::Auth(_) => ReturnCode::AuthError,
            Error::OversizedFrame(_) => ReturnCode::IncompletePacket,
            Error::ControllerConnection => ReturnCode::ControllerConnectionError,
            Error::ControllerSend => ReturnCode::ControllerSendError,
            Error::ControllerRecv => ReturnCode::ControllerRecvError,
            Error::ControllerShutdown => ReturnCode::ControllerShutdownError,
            Error::NoAddress => ReturnCode::SocketError,
        }
    }
}

/// A bounded retry schedule supplied by the caller of a retrying
/// operation: `delay(i) = base_delay + growth * i` for attempt `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub growth: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, growth: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay,
            growth,
        }
    }

    /// The schedule used while a backup controller asserts takeover.
    pub fn standby() -> RetryPolicy {
        RetryPolicy::new(u32::MAX, Duration::from_secs(30), Duration::ZERO)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay + self.growth * attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_linearly() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(6));
        assert_eq!(policy.delay(9), Duration::from_secs(14));
    }

    #[test]
    fn transport_errors_map_to_their_codes() {
        let err = Error::Net(arbor_net::Error::RecvTimeout(100));
        assert_eq!(err.return_code(), ReturnCode::RecvTimeout);
        assert_eq!(
            Error::ControllerConnection.return_code(),
            ReturnCode::ControllerConnectionError
        );
    }
}
