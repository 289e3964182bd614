use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::net::error::SocketError;

pub const DEFAULT_BACKLOG: i32 = 128;
pub const DEFAULT_READ_LENGTH: usize = 65535;

/// Address family of a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv4() { Family::Ipv4 } else { Family::Ipv6 }
    }

    fn domain(self) -> Domain {
        match self {
            Family::Ipv4 => Domain::IPV4,
            Family::Ipv6 => Domain::IPV6,
        }
    }
}

/// Socket options that can be applied before `listen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    ReuseAddress(bool),
    ReusePort(bool),
    KeepAlive(bool),
    RecvTimeout(Option<Duration>),
    SendTimeout(Option<Duration>),
    NoDelay(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOptionKind {
    ReuseAddress,
    ReusePort,
    KeepAlive,
    RecvTimeout,
    SendTimeout,
    NoDelay,
}

/// Address and port of one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketName {
    pub address: IpAddr,
    pub port: u16,
}

impl SocketName {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<SocketAddr> for SocketName {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for SocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

/// Exclusive owner of one TCP socket descriptor.
///
/// A handle is either open or closed. Once closed every operation except
/// [`SocketHandle::is_closed`] and [`SocketHandle::close`] fails with
/// [`SocketError::Closed`]. Dropping an open handle closes it.
#[derive(Debug)]
pub struct SocketHandle {
    socket: Option<Socket>,
}

impl SocketHandle {
    pub fn create(family: Family) -> Result<Self, SocketError> {
        let socket = Socket::new(family.domain(), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| SocketError::from_io("create", e))?;
        Ok(Self {
            socket: Some(socket),
        })
    }

    fn open(&self, op: &'static str) -> Result<&Socket, SocketError> {
        self.socket.as_ref().ok_or(SocketError::Closed { op })
    }

    pub fn set_option(&self, option: SocketOption) -> Result<(), SocketError> {
        const OP: &str = "set_option";
        let socket = self.open(OP)?;
        let result = match option {
            SocketOption::ReuseAddress(on) => socket.set_reuse_address(on),
            SocketOption::ReusePort(on) => socket.set_reuse_port(on),
            SocketOption::KeepAlive(on) => socket.set_keepalive(on),
            SocketOption::RecvTimeout(timeout) => socket.set_read_timeout(timeout),
            SocketOption::SendTimeout(timeout) => socket.set_write_timeout(timeout),
            SocketOption::NoDelay(on) => socket.set_nodelay(on),
        };
        result.map_err(|e| SocketError::from_io(OP, e))
    }

    pub fn get_option(&self, kind: SocketOptionKind) -> Result<SocketOption, SocketError> {
        const OP: &str = "get_option";
        let socket = self.open(OP)?;
        let result = match kind {
            SocketOptionKind::ReuseAddress => socket.reuse_address().map(SocketOption::ReuseAddress),
            SocketOptionKind::ReusePort => socket.reuse_port().map(SocketOption::ReusePort),
            SocketOptionKind::KeepAlive => socket.keepalive().map(SocketOption::KeepAlive),
            SocketOptionKind::RecvTimeout => socket.read_timeout().map(SocketOption::RecvTimeout),
            SocketOptionKind::SendTimeout => socket.write_timeout().map(SocketOption::SendTimeout),
            SocketOptionKind::NoDelay => socket.nodelay().map(SocketOption::NoDelay),
        };
        result.map_err(|e| SocketError::from_io(OP, e))
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        self.open("set_nonblocking")?
            .set_nonblocking(nonblocking)
            .map_err(|e| SocketError::from_io("set_nonblocking", e))
    }

    pub fn bind(&self, address: IpAddr, port: u16) -> Result<(), SocketError> {
        let addr = SockAddr::from(SocketAddr::new(address, port));
        self.open("bind")?
            .bind(&addr)
            .map_err(|e| SocketError::from_io("bind", e))
    }

    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        self.open("listen")?
            .listen(backlog)
            .map_err(|e| SocketError::from_io("listen", e))
    }

    /// Accepts one pending connection, blocking unless a readiness wait
    /// already reported the listener as ready.
    pub fn accept(&self) -> Result<SocketHandle, SocketError> {
        let (socket, _) = self
            .open("accept")?
            .accept()
            .map_err(|e| SocketError::from_io("accept", e))?;
        Ok(SocketHandle {
            socket: Some(socket),
        })
    }

    /// Reads at most `max_length` bytes. An empty result means the peer closed.
    pub fn read(&self, max_length: usize) -> Result<Bytes, SocketError> {
        let mut socket = self.open("read")?;
        let mut buf = BytesMut::zeroed(max_length);
        let n = socket
            .read(&mut buf)
            .map_err(|e| SocketError::from_io("read", e))?;
        buf.truncate(n);
        Ok(buf.freeze())
    }

    /// Writes all of `data`, returning the number of bytes sent.
    pub fn write(&self, data: &[u8]) -> Result<usize, SocketError> {
        let mut socket = self.open("write")?;
        let mut sent = 0;
        while sent < data.len() {
            match socket.write(&data[sent..]) {
                Ok(0) => return Err(SocketError::Stalled { op: "write" }),
                Ok(n) => sent += n,
                // partial progress would be lost if EINTR surfaced to the caller
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SocketError::from_io("write", e)),
            }
        }
        Ok(sent)
    }

    /// Closes the descriptor. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.socket.take();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    pub fn peer_name(&self) -> Result<SocketName, SocketError> {
        let addr = self
            .open("peer_name")?
            .peer_addr()
            .map_err(|e| SocketError::from_io("peer_name", e))?;
        to_name("peer_name", &addr)
    }

    pub fn local_name(&self) -> Result<SocketName, SocketError> {
        let addr = self
            .open("local_name")?
            .local_addr()
            .map_err(|e| SocketError::from_io("local_name", e))?;
        to_name("local_name", &addr)
    }

    pub fn raw_fd(&self) -> Result<RawFd, SocketError> {
        Ok(self.open("raw_fd")?.as_raw_fd())
    }
}

fn to_name(op: &'static str, addr: &SockAddr) -> Result<SocketName, SocketError> {
    addr.as_socket()
        .map(SocketName::from)
        .ok_or_else(|| SocketError::from_code(op, libc::EAFNOSUPPORT))
}
