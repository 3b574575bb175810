//! Socket tables joined with their owning processes, netstat style.
//!
//! Unix rows only carry the local path; the peer of a unix socket cannot be
//! recovered from /proc/net/unix.

use serde::{Serialize, Serializer};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::debug;

use crate::error::{is_not_found, PsError, Result};
use crate::net::addr::decode_address;
use crate::net::inodes::{InodeIndex, SocketOwner};
use crate::net::{AddressFamily, SocketType};
use crate::procfs::ProcFs;

/// Selects which kernel socket tables are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    #[default]
    All,
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
    Inet,
    Inet4,
    Inet6,
}

/// One kernel table: file under /proc/net, family, and the socket type when
/// the table implies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketTable {
    pub file: &'static str,
    pub family: AddressFamily,
    pub socket_type: Option<SocketType>,
}

const TCP4: SocketTable = SocketTable {
    file: "tcp",
    family: AddressFamily::Inet,
    socket_type: Some(SocketType::Stream),
};
const TCP6: SocketTable = SocketTable {
    file: "tcp6",
    family: AddressFamily::Inet6,
    socket_type: Some(SocketType::Stream),
};
const UDP4: SocketTable = SocketTable {
    file: "udp",
    family: AddressFamily::Inet,
    socket_type: Some(SocketType::Datagram),
};
const UDP6: SocketTable = SocketTable {
    file: "udp6",
    family: AddressFamily::Inet6,
    socket_type: Some(SocketType::Datagram),
};
const UNIX: SocketTable = SocketTable {
    file: "unix",
    family: AddressFamily::Unix,
    socket_type: None,
};

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 11] = [
        ConnectionKind::All,
        ConnectionKind::Tcp,
        ConnectionKind::Tcp4,
        ConnectionKind::Tcp6,
        ConnectionKind::Udp,
        ConnectionKind::Udp4,
        ConnectionKind::Udp6,
        ConnectionKind::Unix,
        ConnectionKind::Inet,
        ConnectionKind::Inet4,
        ConnectionKind::Inet6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::All => "all",
            ConnectionKind::Tcp => "tcp",
            ConnectionKind::Tcp4 => "tcp4",
            ConnectionKind::Tcp6 => "tcp6",
            ConnectionKind::Udp => "udp",
            ConnectionKind::Udp4 => "udp4",
            ConnectionKind::Udp6 => "udp6",
            ConnectionKind::Unix => "unix",
            ConnectionKind::Inet => "inet",
            ConnectionKind::Inet4 => "inet4",
            ConnectionKind::Inet6 => "inet6",
        }
    }

    /// Kernel tables read for this kind, in output order.
    pub fn tables(&self) -> &'static [SocketTable] {
        match self {
            ConnectionKind::All => &[TCP4, TCP6, UDP4, UDP6, UNIX],
            ConnectionKind::Tcp => &[TCP4, TCP6],
            ConnectionKind::Tcp4 => &[TCP4],
            ConnectionKind::Tcp6 => &[TCP6],
            ConnectionKind::Udp => &[UDP4, UDP6],
            ConnectionKind::Udp4 => &[UDP4],
            ConnectionKind::Udp6 => &[UDP6],
            ConnectionKind::Unix => &[UNIX],
            ConnectionKind::Inet => &[TCP4, TCP6, UDP4, UDP6],
            ConnectionKind::Inet4 => &[TCP4, UDP4],
            ConnectionKind::Inet6 => &[TCP6, UDP6],
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionKind {
    type Err = PsError;

    fn from_str(s: &str) -> Result<Self> {
        ConnectionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = ConnectionKind::ALL.iter().map(|k| k.as_str()).collect();
                PsError::InvalidArgument(format!(
                    "invalid connection kind {:?}; choose between {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    /// Datagram and unix sockets, and unknown TCP states.
    None,
}

impl ConnectionStatus {
    /// Maps the hex `st` column of /proc/net/tcp[6].
    pub fn from_tcp_code(code: &str) -> Self {
        match code {
            "01" => ConnectionStatus::Established,
            "02" => ConnectionStatus::SynSent,
            "03" => ConnectionStatus::SynRecv,
            "04" => ConnectionStatus::FinWait1,
            "05" => ConnectionStatus::FinWait2,
            "06" => ConnectionStatus::TimeWait,
            "07" => ConnectionStatus::Close,
            "08" => ConnectionStatus::CloseWait,
            "09" => ConnectionStatus::LastAck,
            "0A" => ConnectionStatus::Listen,
            "0B" => ConnectionStatus::Closing,
            _ => ConnectionStatus::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Established => "ESTABLISHED",
            ConnectionStatus::SynSent => "SYN_SENT",
            ConnectionStatus::SynRecv => "SYN_RECV",
            ConnectionStatus::FinWait1 => "FIN_WAIT1",
            ConnectionStatus::FinWait2 => "FIN_WAIT2",
            ConnectionStatus::TimeWait => "TIME_WAIT",
            ConnectionStatus::Close => "CLOSE",
            ConnectionStatus::CloseWait => "CLOSE_WAIT",
            ConnectionStatus::LastAck => "LAST_ACK",
            ConnectionStatus::Listen => "LISTEN",
            ConnectionStatus::Closing => "CLOSING",
            ConnectionStatus::None => "NONE",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A socket endpoint: `ip:port` for inet sockets, a path for unix sockets
/// (empty for unnamed ones).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    Inet(SocketAddr),
    Unix(String),
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Inet(addr) => write!(f, "{}", addr),
            SocketAddress::Unix(path) => f.write_str(path),
        }
    }
}

impl Serialize for SocketAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    pub inode: u64,
    pub family: AddressFamily,
    pub socket_type: SocketType,
    pub local: Option<SocketAddress>,
    pub remote: Option<SocketAddress>,
    pub status: ConnectionStatus,
    /// `None` when the owner could not be determined, usually for lack of
    /// permission to read its fd table.
    pub pid: Option<u32>,
    /// `-1` when `pid` is `None`.
    pub fd: i32,
}

/// Row decoded from a table, before owner lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SocketRow {
    inode: u64,
    family: AddressFamily,
    socket_type: SocketType,
    local: Option<SocketAddress>,
    remote: Option<SocketAddress>,
    status: ConnectionStatus,
}

impl SocketRow {
    fn into_records(self, owners: Option<&[SocketOwner]>) -> Vec<ConnectionRecord> {
        let pairs: Vec<Option<SocketOwner>> = match owners {
            Some(owners) if !owners.is_empty() => owners.iter().copied().map(Some).collect(),
            _ => vec![None],
        };
        pairs
            .into_iter()
            .map(|owner| ConnectionRecord {
                inode: self.inode,
                family: self.family,
                socket_type: self.socket_type,
                local: self.local.clone(),
                remote: self.remote.clone(),
                status: self.status,
                pid: owner.map(|o| o.pid),
                fd: owner.map_or(-1, |o| o.fd),
            })
            .collect()
    }
}

/// Parses the rows of /proc/net/{tcp,udp}[6]; the header line is skipped.
///
/// Rows with an unparsable inode or address are skipped.
fn parse_inet_table(content: &str, table: &SocketTable) -> Vec<SocketRow> {
    let socket_type = table.socket_type.unwrap_or(SocketType::Stream);
    let mut rows = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let Ok(inode) = fields[9].parse::<u64>() else {
            debug!("Skipping {} row with bad inode {:?}", table.file, fields[9]);
            continue;
        };
        let (local, remote) = match (
            decode_address(fields[1], table.family),
            decode_address(fields[2], table.family),
        ) {
            (Ok(local), Ok(remote)) => (
                local.map(SocketAddress::Inet),
                remote.map(SocketAddress::Inet),
            ),
            (Err(e), _) | (_, Err(e)) => {
                debug!("Skipping {} row for inode {}: {}", table.file, inode, e);
                continue;
            }
        };
        let status = if socket_type == SocketType::Stream {
            ConnectionStatus::from_tcp_code(fields[3])
        } else {
            ConnectionStatus::None
        };
        rows.push(SocketRow {
            inode,
            family: table.family,
            socket_type,
            local,
            remote,
            status,
        });
    }
    rows
}

/// Parses the rows of /proc/net/unix:
/// `Num RefCount Protocol Flags Type St Inode [Path]`.
fn parse_unix_table(content: &str) -> Vec<SocketRow> {
    let mut rows = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }
        let Ok(inode) = fields[6].parse::<u64>() else {
            continue;
        };
        let type_code = u32::from_str_radix(fields[4], 16).unwrap_or(0);
        // paths may contain spaces
        let path = fields.get(7..).map(|rest| rest.join(" ")).unwrap_or_default();
        rows.push(SocketRow {
            inode,
            family: AddressFamily::Unix,
            socket_type: SocketType::from_code(type_code),
            local: Some(SocketAddress::Unix(path)),
            remote: None,
            status: ConnectionStatus::None,
        });
    }
    rows
}

/// Reads the socket tables of one proc root and joins them with the fd tables.
#[derive(Debug, Clone, Default)]
pub struct ConnectionEnumerator {
    procfs: ProcFs,
}

impl ConnectionEnumerator {
    pub fn new(procfs: ProcFs) -> Self {
        Self { procfs }
    }

    /// System-wide (`scope_pid = None`) or single-process enumeration.
    ///
    /// A scoped call indexes only that pid's descriptors, best effort; an
    /// unreadable fd table yields no records rather than an error.
    pub fn enumerate(
        &self,
        kind: ConnectionKind,
        scope_pid: Option<u32>,
    ) -> Result<Vec<ConnectionRecord>> {
        let index = match scope_pid {
            Some(pid) => InodeIndex::for_pid_lossy(&self.procfs, pid),
            None => InodeIndex::build(&self.procfs)?,
        };
        self.enumerate_with_index(kind, &index, scope_pid)
    }

    /// Joins the selected tables against a prebuilt index.
    pub fn enumerate_with_index(
        &self,
        kind: ConnectionKind,
        index: &InodeIndex,
        scope_pid: Option<u32>,
    ) -> Result<Vec<ConnectionRecord>> {
        let mut records = Vec::new();

        for table in kind.tables() {
            let rows = self.read_table(table)?;
            for row in rows {
                // Scoped queries never need rows the pid does not own.
                if scope_pid.is_some() && !index.contains(row.inode) {
                    continue;
                }
                let owners = index.owners(row.inode);
                records.extend(
                    row.into_records(owners)
                        .into_iter()
                        .filter(|r| scope_pid.is_none() || r.pid == scope_pid),
                );
            }
        }

        debug!(
            "Enumerated {} {} connections (scope: {:?})",
            records.len(),
            kind,
            scope_pid
        );
        Ok(records)
    }

    fn read_table(&self, table: &SocketTable) -> Result<Vec<SocketRow>> {
        let rel = format!("net/{}", table.file);
        let content = match self.procfs.read_string(&rel) {
            Ok(content) => content,
            Err(e) if is_not_found(&e) && table.family == AddressFamily::Inet6 => {
                debug!("{} not present, kernel without IPv6", rel);
                return Ok(Vec::new());
            }
            Err(e) if is_not_found(&e) => {
                return Err(PsError::NotImplemented(format!(
                    "{} not available",
                    self.procfs.path(&rel).display()
                )))
            }
            Err(e) => return Err(io_context(e, &rel)),
        };

        match table.family {
            AddressFamily::Unix => Ok(parse_unix_table(&content)),
            _ => Ok(parse_inet_table(&content, table)),
        }
    }
}

fn io_context(err: io::Error, rel: &str) -> PsError {
    PsError::Io(io::Error::new(err.kind(), format!("reading {}: {}", rel, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n";
    const UNIX_HEADER: &str = "Num       RefCount Protocol Flags    Type St Inode Path\n";

    #[test]
    fn test_kind_from_str() {
        assert_eq!("tcp4".parse::<ConnectionKind>().unwrap(), ConnectionKind::Tcp4);
        assert_eq!("all".parse::<ConnectionKind>().unwrap(), ConnectionKind::All);
        let err = "sctp".parse::<ConnectionKind>().unwrap_err();
        assert!(matches!(err, PsError::InvalidArgument(_)));
        assert!(err.to_string().contains("inet6"));
    }

    #[test]
    fn test_kind_tables() {
        let files: Vec<&str> = ConnectionKind::Inet4.tables().iter().map(|t| t.file).collect();
        assert_eq!(files, vec!["tcp", "udp"]);
        assert_eq!(ConnectionKind::All.tables().len(), 5);
        for kind in ConnectionKind::ALL {
            assert!(!kind.tables().is_empty());
            assert_eq!(kind.as_str().parse::<ConnectionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_tcp_status_codes() {
        assert_eq!(ConnectionStatus::from_tcp_code("01"), ConnectionStatus::Established);
        assert_eq!(ConnectionStatus::from_tcp_code("0A"), ConnectionStatus::Listen);
        assert_eq!(ConnectionStatus::from_tcp_code("0B"), ConnectionStatus::Closing);
        assert_eq!(ConnectionStatus::from_tcp_code("FF"), ConnectionStatus::None);
        assert_eq!(ConnectionStatus::FinWait1.to_string(), "FIN_WAIT1");
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_parse_inet_table() {
        let content = format!(
            "{}   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1 0000000000000000 100 0 0 10 0\n\
                1: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 4243 1 0000000000000000 20 4 30 10 -1\n",
            TCP_HEADER
        );
        let rows = parse_inet_table(&content, &TCP4);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].inode, 4242);
        assert_eq!(rows[0].status, ConnectionStatus::Listen);
        assert_eq!(
            rows[0].local,
            Some(SocketAddress::Inet("127.0.0.1:8080".parse().unwrap()))
        );
        assert_eq!(rows[0].remote, None);

        assert_eq!(rows[1].status, ConnectionStatus::Established);
        assert_eq!(
            rows[1].remote,
            Some(SocketAddress::Inet("127.0.0.1:50000".parse().unwrap()))
        );
    }

    #[test]
    fn test_udp_rows_have_no_status() {
        let content = format!(
            "{}   0: 00000000:0044 00000000:0000 07 00000000:00000000 00:00000000 00000000     0        0 999 2 0000000000000000 0\n",
            TCP_HEADER
        );
        let rows = parse_inet_table(&content, &UDP4);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ConnectionStatus::None);
        assert_eq!(rows[0].socket_type, SocketType::Datagram);
    }

    #[test]
    fn test_malformed_address_row_is_skipped() {
        let content = format!(
            "{}   0: 0100007F:ZZZZ 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 77 1\n\
                1: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 78 1\n",
            TCP_HEADER
        );
        let rows = parse_inet_table(&content, &TCP4);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].inode, 78);
    }

    #[test]
    fn test_unix_path_with_spaces() {
        let content = format!(
            "{}0000000000000000: 00000002 00000000 00010000 0001 01 555 /tmp/my app/ctl.sock\n",
            UNIX_HEADER
        );
        let rows = parse_unix_table(&content);
        assert_eq!(
            rows[0].local,
            Some(SocketAddress::Unix("/tmp/my app/ctl.sock".into()))
        );
    }

    #[test]
    fn test_parse_unix_table() {
        let content = format!(
            "{}0000000000000000: 00000002 00000000 00010000 0001 01 12345 /run/systemd/notify\n\
             0000000000000000: 00000002 00000000 00000000 0002 01 12346\n\
             0000000000000000: 00000002 00000000 00000000 0005 01 12347 @abstract\n",
            UNIX_HEADER
        );
        let rows = parse_unix_table(&content);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].inode, 12345);
        assert_eq!(rows[0].socket_type, SocketType::Stream);
        assert_eq!(
            rows[0].local,
            Some(SocketAddress::Unix("/run/systemd/notify".into()))
        );
        assert_eq!(rows[1].socket_type, SocketType::Datagram);
        assert_eq!(rows[1].local, Some(SocketAddress::Unix(String::new())));
        assert_eq!(rows[2].socket_type, SocketType::SeqPacket);
        assert!(rows.iter().all(|r| r.remote.is_none()));
        assert!(rows.iter().all(|r| r.status == ConnectionStatus::None));
    }

    #[test]
    fn test_row_into_records_fans_out_owners() {
        let row = SocketRow {
            inode: 1,
            family: AddressFamily::Unix,
            socket_type: SocketType::Stream,
            local: None,
            remote: None,
            status: ConnectionStatus::None,
        };
        let owners = [SocketOwner { pid: 5, fd: 3 }, SocketOwner { pid: 6, fd: 9 }];
        let records = row.clone().into_records(Some(&owners));
        assert_eq!(records.len(), 2);
        assert_eq!((records[1].pid, records[1].fd), (Some(6), 9));

        let records = row.into_records(None);
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].pid, records[0].fd), (None, -1));
    }
}
