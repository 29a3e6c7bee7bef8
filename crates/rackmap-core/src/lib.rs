//! Rackmap Core - Record types and topology file model
//!
//! This crate provides the foundational types for the Rackmap system:
//! - Device records accumulated while probing a test rack
//! - Network endpoint variants (DHCP-leased PCs, USB-networked boards)
//! - Topology file assembly and INI-style rendering

pub mod record;
pub mod topology;

pub use record::{CutterLink, DeviceRecord, NetworkEndpoint, PortId, PEM_INTERFACE, SERIAL_BAUD};
pub use topology::{TopologyError, TopologyFile, TopologySection};
