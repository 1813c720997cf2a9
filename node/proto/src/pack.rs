// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Low-level packing helpers shared by the header and body codecs.

use crate::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Guard trait alias so unpack helpers can bound-check before reading.
pub trait PackBuf: Buf {
    fn need(&self, n: usize) -> Result<(), Error> {
        if self.remaining() < n {
            Err(Error::IncompletePacket)
        } else {
            Ok(())
        }
    }
}

impl<T: Buf> PackBuf for T {}

/// Pack a string as `u32 length` + bytes.
pub fn pack_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Pack an optional string; `None` packs as length zero.
pub fn pack_opt_str(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => pack_str(buf, s),
        None => buf.put_u32(0),
    }
}

pub fn unpack_str(buf: &mut Bytes) -> Result<String, Error> {
    buf.need(4)?;
    let len = buf.get_u32() as usize;
    buf.need(len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::BadString)
}

pub fn unpack_opt_str(buf: &mut Bytes) -> Result<Option<String>, Error> {
    let s = unpack_str(buf)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s))
    }
}

/// Pack an address as `u32 ip` + `u16 port`; a zero ip stands for "none".
pub fn pack_addr(buf: &mut BytesMut, addr: Option<SocketAddrV4>) {
    match addr {
        Some(addr) => {
            buf.put_u32(u32::from(*addr.ip()));
            buf.put_u16(addr.port());
        }
        None => {
            buf.put_u32(0);
            buf.put_u16(0);
        }
    }
}

pub fn unpack_addr(buf: &mut Bytes) -> Result<Option<SocketAddrV4>, Error> {
    buf.need(6)?;
    let ip = buf.get_u32();
    let port = buf.get_u16();
    if ip == 0 {
        Ok(None)
    } else {
        Ok(Some(SocketAddrV4::new(Ipv4Addr::from(ip), port)))
    }
}
