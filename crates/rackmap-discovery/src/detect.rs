//! USB relay auto-detection.
//!
//! Serial-controlled relay boards enumerate as plain `ttyUSB` devices and
//! cannot report what they are, so they are found in two passes:
//!
//! 1. keep every `ttyUSB` device whose udev properties carry both the
//!    vendor and the model string of a known relay product,
//! 2. confirm each candidate by switching it on alone and watching the
//!    kernel log for a board enumerating behind it.

use std::process::Command;
use std::time::Duration;

use rackmap_relay::{PowerCutter, UsbRelay};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::kernellog::{self, KernelLogError, TimestampWindow};

/// USB identity a board announces when it powers up behind a relay.
const BOARD_VENDOR_MARKER: &str = "idVendor=8086";
const BOARD_PRODUCT_MARKER: &str = "idProduct=e005";

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    KernelLog(#[from] KernelLogError),
}

/// udev vendor/model strings identifying one relay product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbRelayMatch {
    pub vendor: String,
    pub model: String,
}

/// Whether udev output describes one of the given relay products. Both the
/// vendor and the model string of the same product must appear.
pub fn matches_relay_product(udev_info: &str, products: &[UsbRelayMatch]) -> bool {
    products
        .iter()
        .any(|p| udev_info.contains(&p.vendor) && udev_info.contains(&p.model))
}

fn udev_info(device: &str) -> Result<String, DetectError> {
    let output = Command::new("udevadm").args(["info", device]).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Every `ttyUSB` device file whose udev properties match a known relay
/// product. Candidates still need confirmation before they can be trusted
/// as power cutters.
pub fn relay_candidates(products: &[UsbRelayMatch]) -> Result<Vec<String>, DetectError> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir("/dev")? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if !name.starts_with("ttyUSB") {
            continue;
        }
        let device = format!("/dev/{}", name);
        if matches_relay_product(&udev_info(&device)?, products) {
            debug!(device = %device, "udev properties match a relay product");
            candidates.push(device);
        }
    }
    Ok(candidates)
}

fn board_powered_on(lines: &[String], window: &TimestampWindow) -> bool {
    lines.iter().any(|line| {
        window.admits(line)
            && line.contains(BOARD_VENDOR_MARKER)
            && line.contains(BOARD_PRODUCT_MARKER)
    })
}

/// Confirms which candidate devices actually switch a board: everything is
/// switched off first, then each candidate is powered alone and kept only
/// if a board enumerates in the kernel log afterwards. Confirmed relays are
/// left powered on.
pub async fn confirm_relays(
    candidates: Vec<String>,
    settle: Duration,
) -> Result<Vec<UsbRelay>, DetectError> {
    let relays: Vec<UsbRelay> = candidates.iter().map(|d| UsbRelay::new(d)).collect();

    for relay in &relays {
        if let Err(err) = relay.disconnect() {
            warn!(device = %relay.device(), error = %err, "Could not switch candidate off");
        }
    }
    sleep(settle).await;

    let mut confirmed = Vec::new();
    for relay in relays {
        let window = TimestampWindow::starting_at(kernellog::newest_timestamp()?);
        if let Err(err) = relay.connect() {
            warn!(device = %relay.device(), error = %err, "Could not switch candidate on");
            continue;
        }
        sleep(settle).await;

        if board_powered_on(&kernellog::snapshot()?, &window) {
            info!(device = %relay.device(), "Confirmed USB relay");
            confirmed.push(relay);
        } else {
            debug!(device = %relay.device(), "No board enumerated, not a relay");
        }
    }
    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> Vec<UsbRelayMatch> {
        vec![UsbRelayMatch {
            vendor: "1a86".to_string(),
            model: "USB2.0-Ser!".to_string(),
        }]
    }

    #[test]
    fn test_matches_relay_product_needs_both_strings() {
        let both = "E: ID_VENDOR_ID=1a86\nE: ID_MODEL=USB2.0-Ser!";
        let vendor_only = "E: ID_VENDOR_ID=1a86\nE: ID_MODEL=Serial-Thing";
        let model_only = "E: ID_VENDOR_ID=0403\nE: ID_MODEL=USB2.0-Ser!";

        assert!(matches_relay_product(both, &products()));
        assert!(!matches_relay_product(vendor_only, &products()));
        assert!(!matches_relay_product(model_only, &products()));
    }

    #[test]
    fn test_matches_relay_product_no_rules() {
        assert!(!matches_relay_product("anything", &[]));
    }

    #[test]
    fn test_board_powered_on() {
        let lines = vec![
            "[100.000000] usb 1-1: New USB device found, idVendor=8086, idProduct=e005".to_string(),
            "[102.000000] usb 1-2: New USB device found, idVendor=8086, idProduct=e005".to_string(),
            "[103.000000] usb 1-3: New USB device found, idVendor=0403, idProduct=6001".to_string(),
        ];

        assert!(board_powered_on(&lines, &TimestampWindow::starting_at(101)));
        assert!(!board_powered_on(&lines, &TimestampWindow::starting_at(102)));
    }
}
