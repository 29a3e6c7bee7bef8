//! Serial console probe
//!
//! After boot the devices under test leave their serial console in a state
//! where keystrokes are echoed straight back. The probe writes a short text
//! and blocks reading part of it back; only a port wired to a live console
//! lets that read complete.

use rackmap_core::{PortId, SERIAL_BAUD};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{FlowControl, SerialPortBuilderExt};
use tracing::debug;

use crate::batch::{probe_batch, ProbeError};

/// Text written to each candidate port
pub const PROBE_TEXT: &[u8] = b"Hello world!";

/// Write the probe text and read half of it back.
///
/// Getting anything back proves the console is live; insisting on the whole
/// text would make lossy consoles block the batch.
pub async fn echo_probe(port: &PortId) -> Result<(), ProbeError> {
    let mut stream = tokio_serial::new(port.device_path(), SERIAL_BAUD)
        .flow_control(FlowControl::Software)
        .open_native_async()?;

    stream.write_all(PROBE_TEXT).await?;

    let mut echo = vec![0u8; PROBE_TEXT.len() / 2];
    stream.read_exact(&mut echo).await?;
    Ok(())
}

/// Return the subset of `candidates` hosting a live serial console.
///
/// Sleeps `settle` before opening anything: a device mid-shutdown can still
/// echo and would register as a false positive. Non-`ttyUSB` device files
/// are ignored.
pub async fn scan_serial_ports(
    candidates: &[PortId],
    settle: Duration,
    budget: Duration,
    grace: Duration,
) -> Vec<PortId> {
    sleep(settle).await;

    let usb: Vec<PortId> = candidates
        .iter()
        .filter(|port| port.is_usb_serial())
        .cloned()
        .collect();

    debug!(candidates = usb.len(), "Scanning for live serial consoles");
    probe_batch(usb, budget, grace, |port: PortId| async move {
        echo_probe(&port).await
    })
    .await
}
