// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt;

/// The numeric return-code space shared by every reply on the wire.
///
/// Codes are grouped: 1000s transport, 1100s protocol, 2000s scheduler,
/// 3000s placement. Callers branch on the code, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ReturnCode {
    Success = 0,
    Error = 1,

    ConnectionError = 1001,
    SendError = 1002,
    RecvError = 1003,
    ShutdownError = 1004,
    SocketError = 1005,
    RecvTimeout = 1006,

    ControllerConnectionError = 1011,
    ControllerSendError = 1012,
    ControllerRecvError = 1013,
    ControllerShutdownError = 1014,

    VersionMismatch = 1101,
    IncompletePacket = 1102,
    AuthError = 1103,

    AlreadyDone = 2001,
    InvalidJobId = 2002,
    TransitionStateNoUpdate = 2003,
    JobPending = 2004,
    InStandbyMode = 2005,
    Disabled = 2006,

    NoFit = 3001,
    NoChangeInData = 3002,
}

impl ReturnCode {
    pub fn from_wire(raw: u32) -> Option<ReturnCode> {
        ReturnCode::from_u32(raw)
    }

    pub fn as_wire(&self) -> u32 {
        self.to_u32().expect("return codes fit in u32")
    }

    /// True for the codes a cancel/signal loop may retry on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReturnCode::TransitionStateNoUpdate | ReturnCode::JobPending
        )
    }

    /// Short operator-facing description of the code.
    pub fn strerror(&self) -> &'static str {
        match self {
            ReturnCode::Success => "success",
            ReturnCode::Error => "unspecified error",
            ReturnCode::ConnectionError => "connection failure",
            ReturnCode::SendError => "message send failure",
            ReturnCode::RecvError => "message receive failure",
            ReturnCode::ShutdownError => "connection shutdown failure",
            ReturnCode::SocketError => "socket operation failure",
            ReturnCode::RecvTimeout => "message receive timeout",
            ReturnCode::ControllerConnectionError => "unable to contact controller",
            ReturnCode::ControllerSendError => "send to controller failed",
            ReturnCode::ControllerRecvError => "receive from controller failed",
            ReturnCode::ControllerShutdownError => "controller connection shutdown failed",
            ReturnCode::VersionMismatch => "protocol version mismatch",
            ReturnCode::IncompletePacket => "incomplete packet",
            ReturnCode::AuthError => "authentication failure",
            ReturnCode::AlreadyDone => "job already completed",
            ReturnCode::InvalidJobId => "invalid job id",
            ReturnCode::TransitionStateNoUpdate => "job state transition in progress",
            ReturnCode::JobPending => "job is pending",
            ReturnCode::InStandbyMode => "controller in standby mode",
            ReturnCode::Disabled => "operation disabled",
            ReturnCode::NoFit => "no resources fit the request",
            ReturnCode::NoChangeInData => "no change in data",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strerror())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        for code in [
            ReturnCode::Success,
            ReturnCode::ControllerRecvError,
            ReturnCode::InStandbyMode,
            ReturnCode::NoFit,
        ] {
            assert_eq!(ReturnCode::from_wire(code.as_wire()), Some(code));
        }
        assert_eq!(ReturnCode::from_wire(0xdead_beef), None);
    }

    #[test]
    fn retryable_split() {
        assert!(ReturnCode::TransitionStateNoUpdate.is_retryable());
        assert!(ReturnCode::JobPending.is_retryable());
        assert!(!ReturnCode::AlreadyDone.is_retryable());
        assert!(!ReturnCode::InvalidJobId.is_retryable());
    }
}
