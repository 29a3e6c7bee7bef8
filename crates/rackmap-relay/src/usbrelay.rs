//! Serial USB relay board driver
//!
//! These relay boards enumerate as a plain USB serial adapter and switch on
//! 4-byte command frames: `A0 01 <state> <checksum>` at 9600 baud. They
//! cannot report their own presence, so discovery identifies them separately
//! (see the topology correlator's relay detection).

use rackmap_core::CutterLink;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

use crate::cutter::{PowerCutter, RelayError};

const RELAY_BAUD: u32 = 9600;

/// A single-channel USB relay, addressed by its serial device file
#[derive(Debug, Clone)]
pub struct UsbRelay {
    device: String,
}

impl UsbRelay {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }

    /// Serial device file this relay answers on
    pub fn device(&self) -> &str {
        &self.device
    }

    fn write_frame(&self, state: u8) -> Result<(), RelayError> {
        let mut port = tokio_serial::new(&self.device, RELAY_BAUD)
            .timeout(Duration::from_secs(1))
            .open()?;
        port.write_all(&command_frame(state))?;
        debug!(device = %self.device, state = state, "Switched USB relay");
        Ok(())
    }
}

/// Build a relay command frame; the final byte is the mod-256 sum of the
/// preceding three
fn command_frame(state: u8) -> [u8; 4] {
    let frame = [0xA0, 0x01, state];
    let checksum = frame
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    [frame[0], frame[1], frame[2], checksum]
}

impl PowerCutter for UsbRelay {
    fn connect(&self) -> Result<(), RelayError> {
        self.write_frame(1)
    }

    fn disconnect(&self) -> Result<(), RelayError> {
        self.write_frame(0)
    }

    fn link(&self) -> CutterLink {
        CutterLink::new(&self.device, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_frame_checksum() {
        assert_eq!(command_frame(1), [0xA0, 0x01, 0x01, 0xA2]);
    }

    #[test]
    fn test_off_frame_checksum() {
        assert_eq!(command_frame(0), [0xA0, 0x01, 0x00, 0xA1]);
    }

    #[test]
    fn test_link_has_no_channel() {
        let relay = UsbRelay::new("/dev/ttyUSB7");
        let link = relay.link();
        assert_eq!(link.cutter, "/dev/ttyUSB7");
        assert!(link.channel.is_none());
    }
}
