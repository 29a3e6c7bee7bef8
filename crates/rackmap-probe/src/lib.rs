//! Rackmap Probe - Bounded-time peripheral probes
//!
//! Every probe in this crate answers the same question: does this device
//! file or address currently host a live peripheral? Port probes share one
//! mechanism, the [`batch::probe_batch`] engine: a worker per candidate, a
//! hard deadline, and the polarity that a worker finishing early means the
//! peripheral is there while a worker still blocked at the deadline means it
//! is not.

pub mod batch;
pub mod net;
pub mod pem;
pub mod serial;

pub use batch::{probe_batch, ProbeError};
pub use net::{ping_alive, ssh_alive};
pub use pem::{play_keystrokes, scan_pem_ports};
pub use serial::{echo_probe, scan_serial_ports};
