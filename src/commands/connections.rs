//! Connections command implementation.
//!
//! Lists sockets of the selected kind with the processes holding them.

use tracing::debug;

use herakles_proc_inspect::{
    ConnectionEnumerator, ConnectionKind, ConnectionRecord, ProcFs, SocketAddress,
};

use crate::commands::{emit, format_table};
use crate::config::Config;

/// Lists sockets, system-wide or held by `pid`.
pub fn command_connections(
    kind: Option<String>,
    pid: Option<u32>,
    config: &Config,
) -> anyhow::Result<()> {
    let kind: ConnectionKind = match kind {
        Some(k) => k.parse()?,
        None => config.connection_kind()?,
    };

    let enumerator = ConnectionEnumerator::new(ProcFs::new(config.proc_root()));
    let records = enumerator.enumerate(kind, pid)?;
    debug!("Found {} {} sockets", records.len(), kind);

    emit(&records, config.output(), |records| render_records(records))
}

fn render_records(records: &[ConnectionRecord]) -> String {
    let header: Vec<String> = ["FAMILY", "TYPE", "LOCAL", "REMOTE", "STATUS", "PID", "FD"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let addr = |a: &Option<SocketAddress>| match a {
        Some(a) => format!("{}", a),
        None => "-".to_string(),
    };
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.family.to_string(),
                r.socket_type.to_string(),
                addr(&r.local),
                addr(&r.remote),
                r.status.to_string(),
                r.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
                r.fd.to_string(),
            ]
        })
        .collect();
    format_table(&header, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_proc_inspect::{AddressFamily, ConnectionStatus, SocketType};

    #[test]
    fn test_render_records() {
        let records = vec![
            ConnectionRecord {
                inode: 1,
                family: AddressFamily::Inet,
                socket_type: SocketType::Stream,
                local: Some(SocketAddress::Inet("127.0.0.1:22".parse().unwrap())),
                remote: None,
                status: ConnectionStatus::Listen,
                pid: Some(100),
                fd: 3,
            },
            ConnectionRecord {
                inode: 2,
                family: AddressFamily::Unix,
                socket_type: SocketType::Datagram,
                local: Some(SocketAddress::Unix("/run/log".into())),
                remote: None,
                status: ConnectionStatus::None,
                pid: None,
                fd: -1,
            },
        ];
        let text = render_records(&records);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("AF_INET  SOCK_STREAM"));
        assert!(lines[1].contains("127.0.0.1:22"));
        assert!(lines[1].contains("LISTEN"));
        assert!(lines[2].contains("/run/log"));
        assert!(lines[2].ends_with("-1"));
    }
}
