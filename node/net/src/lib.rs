// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Connection-oriented stream transport.
//!
//! Everything here is deliberately blocking: the daemons run one thread per
//! connection and every operation carries an explicit millisecond deadline.
//! Callers resolve a zero timeout against the configured default before it
//! reaches this layer; here the argument is taken literally.

use log::debug;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddrV4, TcpListener, TcpStream};
use std::time::Duration;
use thiserror::Error;

/// Attempts to close a connection before giving up on interrupts.
pub const MAX_SHUTDOWN_RETRY: u32 = 5;

/// Bound on how long a connect may take.
pub const CONNECT_TIMEOUT_MS: u64 = 8_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connect to {addr} failed: {source}")]
    Connection {
        addr: SocketAddrV4,
        source: std::io::Error,
    },
    #[error("send failed: {0}")]
    Send(std::io::Error),
    #[error("receive failed: {0}")]
    Recv(std::io::Error),
    #[error("receive timed out after {0}ms")]
    RecvTimeout(u64),
    #[error("shutdown failed: {0}")]
    Shutdown(std::io::Error),
    #[error("socket operation failed: {0}")]
    Socket(#[from] std::io::Error),
}

/// Bind a listening socket for the message engine.
pub fn listen_on(addr: SocketAddrV4) -> Result<TcpListener, Error> {
    let listener = TcpListener::bind(addr)?;
    debug!("message engine listening on {}", addr);
    Ok(listener)
}

/// Accept one connection, returning the stream and the peer address.
pub fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddrV4), Error> {
    let (stream, peer) = listener.accept()?;
    let peer = match peer {
        std::net::SocketAddr::V4(v4) => v4,
        std::net::SocketAddr::V6(_) => {
            return Err(Error::Socket(std::io::Error::new(
                ErrorKind::Unsupported,
                "ipv6 peer on message engine",
            )))
        }
    };
    Ok((stream, peer))
}

/// Open a connection to `addr`, bounded by the connect timeout.
pub fn connect(addr: SocketAddrV4) -> Result<TcpStream, Error> {
    TcpStream::connect_timeout(
        &addr.into(),
        Duration::from_millis(CONNECT_TIMEOUT_MS),
    )
    .map_err(|source| Error::Connection { addr, source })
}

/// Read exactly `n` bytes within `timeout_ms`.
pub fn read_exact_timeout(
    stream: &mut TcpStream,
    n: usize,
    timeout_ms: u64,
) -> Result<Vec<u8>, Error> {
    stream.set_read_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
    let mut buf = vec![0u8; n];
    match stream.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
            Err(Error::RecvTimeout(timeout_ms))
        }
        Err(e) => Err(Error::Recv(e)),
    }
}

/// Write the whole buffer within `timeout_ms`.
pub fn write_all_timeout(stream: &mut TcpStream, buf: &[u8], timeout_ms: u64) -> Result<(), Error> {
    stream.set_write_timeout(Some(Duration::from_millis(timeout_ms.max(1))))?;
    stream.write_all(buf).map_err(Error::Send)?;
    stream.flush().map_err(Error::Send)
}

/// Close both directions of a connection, retrying a bounded number of
/// times when interrupted.
pub fn shutdown_conn(stream: &TcpStream) -> Result<(), Error> {
    let mut retry = 0;
    loop {
        match stream.shutdown(Shutdown::Both) {
            Ok(()) => return Ok(()),
            // A peer that closed first is not an error worth surfacing.
            Err(e) if e.kind() == ErrorKind::NotConnected => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                retry += 1;
                if retry > MAX_SHUTDOWN_RETRY {
                    return Err(Error::Shutdown(e));
                }
            }
            Err(e) => return Err(Error::Shutdown(e)),
        }
    }
}

/// Toggle blocking mode on an open connection.
pub fn set_blocking(stream: &TcpStream, blocking: bool) -> Result<(), Error> {
    stream.set_nonblocking(!blocking)?;
    Ok(())
}
