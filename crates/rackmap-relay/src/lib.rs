//! Rackmap Relay - Power cutter drivers
//!
//! A "cutter" is a controllable relay channel that energizes one device
//! under test. This crate provides the [`PowerCutter`] contract and drivers
//! for the relay hardware found in the racks:
//! - Cleware USB switches, driven through the external `clewarecontrol` tool
//! - Generic serial USB relay boards, driven by byte frames
//! - Sysfs GPIO relays
//! - A mock cutter for synthetic rigs

pub mod cleware;
pub mod cutter;
pub mod gpio;
pub mod mock;
pub mod usbrelay;

pub use cleware::{available_cutters, ClewareCutter, ClewareDevice};
pub use cutter::{PowerCutter, RelayError};
pub use gpio::GpioCutter;
pub use mock::MockCutter;
pub use usbrelay::UsbRelay;
