//! Mock cutter for synthetic rigs and tests

use rackmap_core::CutterLink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cutter::{PowerCutter, RelayError};

/// A cutter that flips a shared flag instead of hardware.
///
/// The flag handle can be cloned out so a synthetic rack can make its fake
/// ports and endpoints go dark when the channel does.
#[derive(Debug, Clone)]
pub struct MockCutter {
    id: String,
    channel: Option<String>,
    powered: Arc<AtomicBool>,
}

impl MockCutter {
    /// New mock channel, initially powered
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            channel: None,
            powered: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_channel(id: &str, channel: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            ..Self::new(id)
        }
    }

    /// Shared power flag, true while the channel is energized
    pub fn power_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.powered)
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }
}

impl PowerCutter for MockCutter {
    fn connect(&self) -> Result<(), RelayError> {
        self.powered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), RelayError> {
        self.powered.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn link(&self) -> CutterLink {
        CutterLink::new(&self.id, self.channel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_handle_tracks_switching() {
        let cutter = MockCutter::with_channel("mock-0", "3");
        let handle = cutter.power_handle();

        assert!(handle.load(Ordering::SeqCst));
        cutter.disconnect().unwrap();
        assert!(!handle.load(Ordering::SeqCst));
        cutter.connect().unwrap();
        assert!(cutter.is_powered());

        assert_eq!(cutter.link().channel.as_deref(), Some("3"));
    }
}
