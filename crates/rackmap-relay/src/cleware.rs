//! Cleware USB switch driver
//!
//! Cleware switches are driven through the external `clewarecontrol` tool.
//! One [`ClewareCutter`] instance controls a single socket; multi-socket
//! switches yield one instance per socket.

use rackmap_core::CutterLink;
use std::process::Command;
use tracing::{debug, warn};

use crate::cutter::{PowerCutter, RelayError};

/// One physical switch from the `clewarecontrol -l` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClewareDevice {
    /// Serial number, used as the cutter id
    pub serial: String,
    /// Number of switchable sockets on this device
    pub sockets: u32,
}

impl ClewareDevice {
    /// One cutter per socket
    pub fn cutters(&self) -> Vec<ClewareCutter> {
        (0..self.sockets)
            .map(|socket| ClewareCutter::new(&self.serial, socket))
            .collect()
    }
}

/// List the Cleware switches currently attached to the host
pub fn available_cutters() -> Result<Vec<ClewareDevice>, RelayError> {
    let output = Command::new("clewarecontrol").arg("-l").output()?;
    if !output.status.success() {
        return Err(RelayError::Tool(format!(
            "clewarecontrol -l exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let devices = parse_listing(&stdout);
    debug!(count = devices.len(), "Listed Cleware switches");
    Ok(devices)
}

fn parse_listing(output: &str) -> Vec<ClewareDevice> {
    output.lines().filter_map(parse_listing_line).collect()
}

/// Parse a line from `clewarecontrol -l` output
fn parse_listing_line(line: &str) -> Option<ClewareDevice> {
    // Format: "Device: 0, type: 8 (Switch1), version: 106, serial number: 563412"
    if !line.trim_start().starts_with("Device:") {
        return None;
    }

    let type_id: u32 = field_after(line, "type:")?.parse().ok()?;
    let serial = field_after(line, "serial number:")?;

    Some(ClewareDevice {
        serial,
        sockets: socket_count(type_id),
    })
}

/// First whitespace-delimited token following `marker`
fn field_after(line: &str, marker: &str) -> Option<String> {
    let rest = &line[line.find(marker)? + marker.len()..];
    let token = rest.split_whitespace().next()?;
    Some(token.trim_end_matches(',').to_string())
}

fn socket_count(type_id: u32) -> u32 {
    match type_id {
        // USB-Switch1 and USB-Switch4
        8 => 1,
        29 => 4,
        other => {
            warn!(device_type = other, "Unknown Cleware device type, assuming one socket");
            1
        }
    }
}

/// One socket of a Cleware USB switch
#[derive(Debug, Clone)]
pub struct ClewareCutter {
    cutter: String,
    socket: u32,
}

impl ClewareCutter {
    pub fn new(serial: &str, socket: u32) -> Self {
        Self {
            cutter: serial.to_string(),
            socket,
        }
    }

    fn switch(&self, state: u8) -> Result<(), RelayError> {
        let output = Command::new("clewarecontrol")
            .args([
                "-c",
                "1",
                "-d",
                &self.cutter,
                "-as",
                &self.socket.to_string(),
                &state.to_string(),
            ])
            .output()?;

        if !output.status.success() {
            return Err(RelayError::Tool(format!(
                "clewarecontrol -d {} -as {} {} exited with {}",
                self.cutter, self.socket, state, output.status
            )));
        }
        Ok(())
    }
}

impl PowerCutter for ClewareCutter {
    fn connect(&self) -> Result<(), RelayError> {
        self.switch(1)
    }

    fn disconnect(&self) -> Result<(), RelayError> {
        self.switch(0)
    }

    fn link(&self) -> CutterLink {
        CutterLink::new(&self.cutter, Some(self.socket.to_string()))
    }
}
