//! The power cutter contract

use rackmap_core::CutterLink;
use thiserror::Error;

/// Errors raised by cutter drivers
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("relay tool failed: {0}")]
    Tool(String),
}

/// A controllable relay channel that energizes or de-energizes one device
/// under test.
///
/// Switching is synchronous: every driver either writes a sysfs file, writes
/// a handful of bytes to a serial device, or waits on a short external
/// command. State is not tracked here; the rack is the source of truth.
pub trait PowerCutter: Send + Sync {
    /// Energize the channel
    fn connect(&self) -> Result<(), RelayError>;

    /// De-energize the channel
    fn disconnect(&self) -> Result<(), RelayError>;

    /// Static channel description, merged into the device record that this
    /// channel is found to power
    fn link(&self) -> CutterLink;
}
