//! Socket enumeration from /proc/net.
//!
//! - `addr`: decoding of kernel `ip:port` hex pairs
//! - `inodes`: socket inode → owning `(pid, fd)` index
//! - `connections`: table parsing and per-kind enumeration

pub mod addr;
pub mod connections;
pub mod inodes;

use serde::Serialize;
use std::fmt;

pub use addr::decode_address;
pub use connections::{
    ConnectionEnumerator, ConnectionKind, ConnectionRecord, ConnectionStatus, SocketAddress,
};
pub use inodes::{parse_socket_inode, InodeIndex, SocketOwner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Inet,
    Inet6,
    Unix,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressFamily::Inet => "AF_INET",
            AddressFamily::Inet6 => "AF_INET6",
            AddressFamily::Unix => "AF_UNIX",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Stream,
    Datagram,
    SeqPacket,
    /// Unix socket type code not covered above.
    Other(u32),
}

impl SocketType {
    /// Maps the `Type` column of /proc/net/unix.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => SocketType::Stream,
            2 => SocketType::Datagram,
            5 => SocketType::SeqPacket,
            other => SocketType::Other(other),
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketType::Stream => f.write_str("SOCK_STREAM"),
            SocketType::Datagram => f.write_str("SOCK_DGRAM"),
            SocketType::SeqPacket => f.write_str("SOCK_SEQPACKET"),
            SocketType::Other(code) => write!(f, "SOCK_{}", code),
        }
    }
}
