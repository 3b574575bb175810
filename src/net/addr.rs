//! Decoding of `ip:port` pairs as printed in /proc/net/{tcp,udp}[6].
//!
//! The kernel prints the address as one (IPv4) or four (IPv6) 32-bit words,
//! each with `%08X` of its in-memory value. Reading a word back as a native
//! `u32` and taking its native-endian bytes restores network byte order on
//! any host. The port is plain big-endian hex.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{PsError, Result};
use crate::net::AddressFamily;

/// Decodes e.g. `"0500000A:0016"` into `10.0.0.5:22` on a little-endian host.
///
/// Returns `Ok(None)` for port `0000` or a missing port, which the kernel
/// uses for unconnected endpoints.
pub fn decode_address(hex: &str, family: AddressFamily) -> Result<Option<SocketAddr>> {
    let Some((ip_hex, port_hex)) = hex.split_once(':') else {
        return Ok(None);
    };
    if port_hex.is_empty() || port_hex == "0000" {
        return Ok(None);
    }

    let port = u16::from_str_radix(port_hex, 16)
        .map_err(|_| invalid(hex, "bad port"))?;

    let ip = match family {
        AddressFamily::Inet => {
            if ip_hex.len() != 8 {
                return Err(invalid(hex, "IPv4 address must be 8 hex digits"));
            }
            let word = parse_word(ip_hex).ok_or_else(|| invalid(hex, "bad IPv4 word"))?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        AddressFamily::Inet6 => {
            if ip_hex.len() != 32 {
                return Err(invalid(hex, "IPv6 address must be 32 hex digits"));
            }
            let mut bytes = [0u8; 16];
            for (i, chunk) in bytes.chunks_exact_mut(4).enumerate() {
                let word = parse_word(&ip_hex[i * 8..i * 8 + 8])
                    .ok_or_else(|| invalid(hex, "bad IPv6 word"))?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(bytes))
        }
        AddressFamily::Unix => {
            return Err(PsError::InvalidArgument(
                "unix sockets have no ip:port address".to_string(),
            ))
        }
    };

    Ok(Some(SocketAddr::new(ip, port)))
}

fn parse_word(s: &str) -> Option<u32> {
    if !s.is_ascii() {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

fn invalid(hex: &str, why: &str) -> PsError {
    PsError::InvalidArgument(format!("cannot decode address {:?}: {}", hex, why))
}
