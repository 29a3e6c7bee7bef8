//! PEM playback client
//!
//! The PEM box injects scripted keystrokes into a device under test that has
//! no native input. It is driven over a serial connection: an ENQ/ACK
//! handshake, then one keystroke token per line, each acknowledged. On a
//! port without a PEM the handshake read never completes, so a playback task
//! finishes if and only if a PEM consumed the script. The port probe is
//! built on that property.

use rackmap_core::PortId;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::batch::{probe_batch, ProbeError};

const PEM_BAUD: u32 = 115200;
const ENQ: u8 = 0x05;
const ACK: u8 = 0x06;

/// Parse a keystroke script: one token per line, `#` comments and blank
/// lines skipped
pub fn parse_keystrokes(script: &str) -> Vec<String> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Play a keystroke script through the PEM on `port`. Returns once the whole
/// script has been acknowledged.
pub async fn play_keystrokes(port: &PortId, script: &str) -> Result<(), ProbeError> {
    let keys = parse_keystrokes(script);
    let mut stream = tokio_serial::new(port.device_path(), PEM_BAUD).open_native_async()?;

    stream.write_all(&[ENQ]).await?;
    expect_ack(&mut stream).await?;

    for key in &keys {
        stream.write_all(key.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        expect_ack(&mut stream).await?;
    }

    debug!(port = %port, keys = keys.len(), "Keystroke playback complete");
    Ok(())
}

async fn expect_ack(stream: &mut SerialStream) -> Result<(), ProbeError> {
    let mut reply = [0u8; 1];
    stream.read_exact(&mut reply).await?;
    if reply[0] != ACK {
        return Err(ProbeError::Protocol(format!(
            "expected ACK, got 0x{:02x}",
            reply[0]
        )));
    }
    Ok(())
}

/// Return the subset of `candidates` hosting a PEM, decided by whether a
/// playback task finished within `budget`.
///
/// Sleeps `settle` first so devices mid-transition do not register. Only
/// `ttyUSB` device files are considered.
pub async fn scan_pem_ports(
    candidates: &[PortId],
    keystrokes: &str,
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
    let script: Arc<str> = Arc::from(keystrokes);

    debug!(candidates = usb.len(), "Scanning for PEM interfaces");
    probe_batch(usb, budget, grace, move |port: PortId| {
        let script = Arc::clone(&script);
        async move { play_keystrokes(&port, &script).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keystrokes_skips_comments_and_blanks() {
        let script = "# boot menu\n\nF2\nDOWN\n  ENTER  \n\n# done\n";
        assert_eq!(parse_keystrokes(script), vec!["F2", "DOWN", "ENTER"]);
    }

    #[test]
    fn test_parse_empty_script() {
        assert!(parse_keystrokes("# nothing here\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_scan_without_pem_hardware_is_all_negative() {
        let candidates = vec![PortId::new("ttyUSB251"), PortId::new("fb0")];
        let active = scan_pem_ports(
            &candidates,
            "F2\n",
            Duration::from_millis(1),
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
        .await;
        assert!(active.is_empty());
    }
}
