//! dnsmasq lease file parsing.
//!
//! PC-class devices in the rack lease their address from the harness DHCP
//! server, so the lease database is the authoritative list of candidate
//! network endpoints on the wired side.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry from a dnsmasq lease database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpLease {
    pub expiry: DateTime<Utc>,
    pub mac: String,
    pub ip: String,
    pub hostname: String,
    pub client_id: String,
}

/// Parses one lease line of the form
/// `1472204117 54:ab:3a:0d:8f:10 192.168.30.105 buildpc-7 01:54:ab:3a:0d:8f:10`.
fn parse_lease_line(line: &str) -> Option<DhcpLease> {
    let mut fields = line.split_whitespace();
    let epoch: i64 = fields.next()?.parse().ok()?;
    let expiry = Utc.timestamp_opt(epoch, 0).single()?;
    Some(DhcpLease {
        expiry,
        mac: fields.next()?.to_string(),
        ip: fields.next()?.to_string(),
        hostname: fields.next()?.to_string(),
        client_id: fields.next()?.to_string(),
    })
}

/// Parses a whole lease database. Malformed lines are skipped.
pub fn parse_leases(content: &str) -> Vec<DhcpLease> {
    let mut leases = Vec::new();
    for line in content.lines() {
        match parse_lease_line(line) {
            Some(lease) => leases.push(lease),
            None => {
                if !line.trim().is_empty() {
                    debug!(line = %line, "Skipping malformed lease line");
                }
            }
        }
    }
    leases
}

pub fn read_leases(path: &Path) -> Result<Vec<DhcpLease>, LeaseError> {
    Ok(parse_leases(&std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease_line() {
        let line = "1472204117 54:ab:3a:0d:8f:10 192.168.30.105 buildpc-7 01:54:ab:3a:0d:8f:10";
        let lease = parse_lease_line(line).unwrap();
        assert_eq!(lease.mac, "54:ab:3a:0d:8f:10");
        assert_eq!(lease.ip, "192.168.30.105");
        assert_eq!(lease.hostname, "buildpc-7");
        assert_eq!(lease.client_id, "01:54:ab:3a:0d:8f:10");
        assert_eq!(lease.expiry.timestamp(), 1472204117);
    }

    #[test]
    fn test_parse_leases_skips_malformed() {
        let content = "\
1472204117 54:ab:3a:0d:8f:10 192.168.30.105 buildpc-7 01:54:ab:3a:0d:8f:10
not a lease line
1472204200 00:11:22:33:44:55 192.168.30.106 * *
";
        let leases = parse_leases(content);
        assert_eq!(leases.len(), 2);
        assert_eq!(leases[1].hostname, "*");
    }

    #[test]
    fn test_parse_leases_empty() {
        assert!(parse_leases("").is_empty());
        assert!(parse_leases("\n\n").is_empty());
    }

    #[test]
    fn test_read_leases_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnsmasq.leases");
        std::fs::write(
            &path,
            "1472204117 54:ab:3a:0d:8f:10 192.168.30.105 buildpc-7 *\n",
        )
        .unwrap();

        let leases = read_leases(&path).unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].mac, "54:ab:3a:0d:8f:10");
    }
}
