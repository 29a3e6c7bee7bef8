//! Rackmap discovery engine
//!
//! Works out how a test rack is wired by correlating power-off events with
//! disappearing serial ports, PEM ports and network endpoints:
//!
//! - Kernel log parsing and evidence windows
//! - dnsmasq lease parsing
//! - Network endpoint indexing (SSH hosts and USB-networked boards)
//! - USB relay auto-detection
//! - The elimination-round correlator itself

pub mod correlator;
pub mod detect;
pub mod endpoints;
pub mod kernellog;
pub mod leases;

pub use correlator::{
    model_for_mac, CorrelatorConfig, DiscoveryError, DiscoveryEvent, LiveNetProbe, LivePortScan,
    LiveRackView, MacPrefixRule, NetProbe, PortScan, ProbeKind, RackView, TopologyCorrelator,
};
pub use detect::{confirm_relays, relay_candidates, DetectError, UsbRelayMatch};
pub use endpoints::{collect_endpoints, is_reachable, EndpointError, SubnetSlots};
pub use kernellog::{KernelLogError, TimestampWindow};
pub use leases::{parse_leases, read_leases, DhcpLease, LeaseError};
