//! Sysfs GPIO relay driver (Songle-style relay on a host GPIO pin)

use rackmap_core::CutterLink;
use std::path::PathBuf;

use crate::cutter::{PowerCutter, RelayError};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// A relay switched by writing `1`/`0` to an exported GPIO value file
#[derive(Debug, Clone)]
pub struct GpioCutter {
    gpio: u32,
    root: PathBuf,
}

impl GpioCutter {
    pub fn new(gpio: u32) -> Self {
        Self::at_root(gpio, SYSFS_GPIO_ROOT)
    }

    /// Use a different sysfs base directory
    pub fn at_root(gpio: u32, root: impl Into<PathBuf>) -> Self {
        Self {
            gpio,
            root: root.into(),
        }
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.gpio)).join("value")
    }

    fn write_value(&self, value: &str) -> Result<(), RelayError> {
        std::fs::write(self.value_path(), value)?;
        Ok(())
    }
}

impl PowerCutter for GpioCutter {
    fn connect(&self) -> Result<(), RelayError> {
        self.write_value("1")
    }

    fn disconnect(&self) -> Result<(), RelayError> {
        self.write_value("0")
    }

    fn link(&self) -> CutterLink {
        CutterLink::new(format!("gpio{}", self.gpio), None)
    }
}
