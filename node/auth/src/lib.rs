// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Message credentials.
//!
//! Every framed message carries an opaque credential between the header and
//! the body. The provider is pluggable; the framing layer only needs the
//! create/pack/unpack/verify surface and reports every failure as an
//! authentication error. Credentials are single-owner values: they are
//! created for one send and dropped exactly once on the way out of the
//! send or receive path.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Length of the credential MAC on the wire.
pub const MAC_LEN: usize = 16;

/// Seconds a credential stays valid after creation.
pub const DEFAULT_CRED_LIFETIME_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("credential truncated")]
    Truncated,
    #[error("bad credential signature")]
    BadMac,
    #[error("credential expired, issued {0}s ago")]
    Expired(u64),
    #[error("credential uid {got} does not match expected {expected}")]
    WrongUid { got: u32, expected: u32 },
    #[error("credential creation failed: {0}")]
    Create(String),
}

/// An authentication token for a single message.
///
/// Deliberately not `Clone`: the value moves into the send path or out of
/// the receive path and is destroyed with it.
#[derive(Debug, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    pub stamp_secs: u64,
    mac: [u8; MAC_LEN],
}

/// Creates and checks credentials.
pub trait AuthProvider: Send + Sync {
    fn create(&self) -> Result<Credential, Error>;

    fn pack(&self, cred: &Credential, buf: &mut BytesMut);

    fn unpack(&self, buf: &mut Bytes) -> Result<Credential, Error>;

    /// Check signature and freshness; when `expected_uid` is given the
    /// credential must belong to that user.
    fn verify(&self, cred: &Credential, expected_uid: Option<u32>) -> Result<(), Error>;
}

/// Keyed-MAC credential provider. Every party on the cluster shares the
/// key; the MAC covers uid, gid and the creation stamp.
pub struct MacAuth {
    key: Vec<u8>,
    uid: u32,
    gid: u32,
    lifetime_secs: u64,
}

impl MacAuth {
    pub fn new(key: impl Into<Vec<u8>>, uid: u32, gid: u32) -> MacAuth {
        MacAuth {
            key: key.into(),
            uid,
            gid,
            lifetime_secs: DEFAULT_CRED_LIFETIME_SECS,
        }
    }

    pub fn with_lifetime(mut self, lifetime_secs: u64) -> MacAuth {
        self.lifetime_secs = lifetime_secs;
        self
    }

    fn mac_over(&self, uid: u32, gid: u32, stamp_secs: u64) -> [u8; MAC_LEN] {
        let mut input = [0u8; 16];
        input[..4].copy_from_slice(&uid.to_be_bytes());
        input[4..8].copy_from_slice(&gid.to_be_bytes());
        input[8..].copy_from_slice(&stamp_secs.to_be_bytes());
        let hash = blake2b_simd::Params::new()
            .hash_length(MAC_LEN)
            .key(&self.key)
            .hash(&input);
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(hash.as_bytes());
        mac
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl AuthProvider for MacAuth {
    fn create(&self) -> Result<Credential, Error> {
        let stamp_secs = Self::now_secs();
        if stamp_secs == 0 {
            return Err(Error::Create("system clock before epoch".to_owned()));
        }
        Ok(Credential {
            uid: self.uid,
            gid: self.gid,
            stamp_secs,
            mac: self.mac_over(self.uid, self.gid, stamp_secs),
        })
    }

    fn pack(&self, cred: &Credential, buf: &mut BytesMut) {
        buf.put_u32(cred.uid);
        buf.put_u32(cred.gid);
        buf.put_u64(cred.stamp_secs);
        buf.put_slice(&cred.mac);
    }

    fn unpack(&self, buf: &mut Bytes) -> Result<Credential, Error> {
        if buf.remaining() < 16 + MAC_LEN {
            return Err(Error::Truncated);
        }
        let uid = buf.get_u32();
        let gid = buf.get_u32();
        let stamp_secs = buf.get_u64();
        let mut mac = [0u8; MAC_LEN];
        buf.copy_to_slice(&mut mac);
        Ok(Credential {
            uid,
            gid,
            stamp_secs,
            mac,
        })
    }

    fn verify(&self, cred: &Credential, expected_uid: Option<u32>) -> Result<(), Error> {
        if self.mac_over(cred.uid, cred.gid, cred.stamp_secs) != cred.mac {
            return Err(Error::BadMac);
        }
        let age = Self::now_secs().saturating_sub(cred.stamp_secs);
        if age > self.lifetime_secs {
            return Err(Error::Expired(age));
        }
        if let Some(expected) = expected_uid {
            if cred.uid != expected {
                return Err(Error::WrongUid {
                    got: cred.uid,
                    expected,
                });
            }
        }
        Ok(())
    }
}
