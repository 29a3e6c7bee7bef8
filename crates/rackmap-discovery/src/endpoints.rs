//! Network endpoint index.
//!
//! Builds the pool of candidate network endpoints visible while the whole
//! rack is powered:
//!
//! * PC-class devices appear as dnsmasq leases and are probed over SSH.
//! * USB-networked boards appear as kernel-log attach lines; each gets a
//!   private /30 whose host side we configure here, and is probed with ping.

use std::path::{Path, PathBuf};
use std::process::Command;

use rackmap_core::NetworkEndpoint;
use rackmap_probe::{ping_alive, ssh_alive};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kernellog::TimestampWindow;
use crate::leases::{read_leases, LeaseError};

/// Product string boards leave in their USB attach line.
const BOARD_MARKER: &str = "Edison";

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Leases(#[from] LeaseError),
    #[error("ip {args:?} exited with {status}")]
    IpTool { args: Vec<String>, status: String },
}

/// Allocator for board subnet slots. Each board consumes four consecutive
/// host numbers: network base, board side, harness side, spare. Slots are
/// never reused within a run, so two boards can never share an address even
/// if one later disappears.
#[derive(Debug, Clone)]
pub struct SubnetSlots {
    prefix: String,
    next: u32,
}

/// One allocated slot: the subnet base plus the harness-side address used
/// for liveness probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSlot {
    pub subnet: String,
    pub host_ip: String,
}

impl SubnetSlots {
    pub fn new(prefix: &str, start: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: start,
        }
    }

    pub fn allocate(&mut self) -> SubnetSlot {
        let base = self.next;
        self.next += 4;
        SubnetSlot {
            subnet: format!("{}{}", self.prefix, base),
            host_ip: format!("{}{}", self.prefix, base + 2),
        }
    }
}

/// Extracts the USB tree path from a board attach line:
/// `[328860.109597] usb 2-1.4.1.2: Product: Edison` yields `2-1.4.1.2`.
pub fn usb_path_from_line(line: &str) -> Option<String> {
    let token = line.split_whitespace().nth(2)?;
    Some(token.trim_end_matches(':').to_string())
}

/// Board attach lines that fall inside the evidence window.
pub fn board_attach_lines<'a>(lines: &'a [String], window: &TimestampWindow) -> Vec<&'a str> {
    lines
        .iter()
        .filter(|line| line.contains(BOARD_MARKER) && window.admits(line))
        .map(String::as_str)
        .collect()
}

/// Name of the network interface a board exposed for its USB tree path, read
/// from sysfs.
fn host_interface_for(usb_path: &str) -> Result<String, EndpointError> {
    let net_dir = PathBuf::from(format!("/sys/bus/usb/devices/{}:1.0/net", usb_path));
    for entry in std::fs::read_dir(&net_dir)? {
        return Ok(entry?.file_name().to_string_lossy().to_string());
    }
    Err(EndpointError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no interface under {}", net_dir.display()),
    )))
}

fn run_ip(args: &[&str]) -> Result<(), EndpointError> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(EndpointError::IpTool {
            args: args.iter().map(|a| a.to_string()).collect(),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Assigns the harness-side address of a board's /30 and brings the
/// interface up, so the board answers ping on its slot.
fn open_host_interface(usb_path: &str, host_ip: &str) -> Result<(), EndpointError> {
    let iface = host_interface_for(usb_path)?;
    run_ip(&["addr", "replace", &format!("{}/30", host_ip), "dev", &iface])?;
    run_ip(&["link", "set", &iface, "up"])?;
    debug!(iface = %iface, host_ip = %host_ip, "Opened host interface for board");
    Ok(())
}

/// Builds the endpoint pool under full power: one endpoint per board attach
/// line inside the window, then one per DHCP lease. A board whose host
/// interface cannot be opened is left out with a warning rather than
/// aborting the run.
pub fn collect_endpoints(
    log_lines: &[String],
    window: &TimestampWindow,
    leases_path: &Path,
    slots: &mut SubnetSlots,
) -> Result<Vec<NetworkEndpoint>, EndpointError> {
    let mut endpoints = Vec::new();

    for line in board_attach_lines(log_lines, window) {
        let Some(usb_path) = usb_path_from_line(line) else {
            continue;
        };
        let slot = slots.allocate();
        match open_host_interface(&usb_path, &slot.host_ip) {
            Ok(()) => {
                info!(usb_path = %usb_path, subnet = %slot.subnet, "Found USB-networked board");
                endpoints.push(NetworkEndpoint::EdisonUsb {
                    usb_path,
                    host_ip: slot.host_ip,
                    subnet: slot.subnet,
                });
            }
            Err(err) => {
                warn!(usb_path = %usb_path, error = %err, "Could not open host interface, skipping board");
            }
        }
    }

    for lease in read_leases(leases_path)? {
        endpoints.push(NetworkEndpoint::Pc {
            mac: lease.mac,
            ip: lease.ip,
        });
    }

    info!(count = endpoints.len(), "Collected candidate network endpoints");
    Ok(endpoints)
}

/// Liveness check for one endpoint: SSH for PC-class devices, ping on the
/// harness-side address for boards.
pub async fn is_reachable(
    endpoint: &NetworkEndpoint,
    ping_count: u32,
    ssh_timeout_secs: u64,
) -> bool {
    match endpoint {
        NetworkEndpoint::Pc { ip, .. } => ssh_alive(ip, ssh_timeout_secs).await,
        NetworkEndpoint::EdisonUsb { host_ip, .. } => ping_alive(host_ip, ping_count).await,
    }
}
