// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::Error;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt;

/// Message kinds carried in the header. Values are stable wire constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum MessageKind {
    Ping = 1008,
    NodeRegistration = 1002,
    CancelJob = 4001,
    SignalJob = 4002,
    SignalStep = 4003,
    TerminateStep = 4004,
    RequeueJob = 4005,
    SuspendJob = 4006,
    UpdateJob = 4007,
    Rc = 8001,
}

impl MessageKind {
    pub fn from_wire(raw: u16) -> Result<MessageKind, Error> {
        MessageKind::from_u16(raw).ok_or(Error::UnknownKind(raw))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Wiring discipline requested for, or configured on, a block.
///
/// `Nav` ("no answer, very likely torus") accepts whatever the block has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum ConnectionType {
    Torus = 0,
    Mesh = 1,
    Nav = 2,
    HtcSmp = 3,
    HtcDual = 4,
    HtcVirtual = 5,
    HtcLinux = 6,
}

impl ConnectionType {
    pub fn from_wire(raw: u16) -> Option<ConnectionType> {
        ConnectionType::from_u16(raw)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Torus => "Torus",
            ConnectionType::Mesh => "Mesh",
            ConnectionType::Nav => "NAV",
            ConnectionType::HtcSmp => "HTC SMP",
            ConnectionType::HtcDual => "HTC Dual",
            ConnectionType::HtcVirtual => "HTC Virtual",
            ConnectionType::HtcLinux => "HTC Linux",
        };
        f.write_str(name)
    }
}
