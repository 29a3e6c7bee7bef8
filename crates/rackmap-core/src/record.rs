//! Record types for discovered test-rack devices

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Baud rate recorded for every attributed serial port
pub const SERIAL_BAUD: u32 = 115200;

/// Interface tag recorded for every attributed PEM port
pub const PEM_INTERFACE: &str = "serialconnection";

/// Identifier for a serial-like device file, stored without the `/dev/` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub String);

impl PortId {
    /// Create a PortId from a bare device file name (e.g. `ttyUSB3`)
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Absolute device file path
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.0)
    }

    /// Only USB serial adapters can host a probe target
    pub fn is_usb_serial(&self) -> bool {
        self.0.starts_with("ttyUSB")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of one relay channel, merged into the device record
/// that the channel was found to power
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutterLink {
    /// Relay identifier (serial number or device file path)
    pub cutter: String,
    /// Socket index on the relay, absent for single-socket relays
    pub channel: Option<String>,
}

impl CutterLink {
    pub fn new(cutter: impl Into<String>, channel: Option<String>) -> Self {
        Self {
            cutter: cutter.into(),
            channel,
        }
    }
}

impl std::fmt::Display for CutterLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{}/{}", self.cutter, channel),
            None => write!(f, "{}", self.cutter),
        }
    }
}

/// A candidate network endpoint, tagged by how the device is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkEndpoint {
    /// PC-like device that leased an address over DHCP; liveness is an SSH
    /// handshake against the leased address
    Pc { mac: String, ip: String },
    /// USB-networked board reached through a host-side virtual interface.
    /// Liveness is a ping against the host-side address, which answers only
    /// while the board keeps the interface alive.
    EdisonUsb {
        /// USB device tree path from the kernel log (e.g. `2-1.4.1.2`)
        usb_path: String,
        /// Host-side interface address used for liveness pings
        host_ip: String,
        /// Subnet base assigned to this board's slot
        subnet: String,
    },
}

impl NetworkEndpoint {
    /// Address probed when testing whether the endpoint is still alive
    pub fn probe_ip(&self) -> &str {
        match self {
            Self::Pc { ip, .. } => ip,
            Self::EdisonUsb { host_ip, .. } => host_ip,
        }
    }
}

impl std::fmt::Display for NetworkEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pc { mac, ip } => write!(f, "pc {} ({})", ip, mac),
            Self::EdisonUsb { usb_path, host_ip, .. } => {
                write!(f, "usb-net {} ({})", host_ip, usb_path)
            }
        }
    }
}

/// Accumulator for one discovered device, one per relay channel.
///
/// Fields are attributed one elimination round at a time and serialized in
/// declaration order; every field may stay empty when the corresponding
/// peripheral was not observed to disappear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Relay channel this record belongs to
    pub cutter: Option<CutterLink>,
    /// Device model, inferred from the attributed network endpoint. A record
    /// that never gains a model is an unpopulated relay socket and is dropped
    /// at assembly time.
    pub model: Option<String>,
    /// Stable identifier: MAC address for PC-like devices, generated UUID for
    /// USB-networked boards
    pub id: Option<String>,
    /// Subnet base for USB-networked boards
    pub network_subnet: Option<String>,
    /// USB device tree path for USB-networked boards
    pub edison_usb_port: Option<String>,
    /// Attributed serial console device file
    pub serial_port: Option<String>,
    pub serial_bauds: Option<u32>,
    /// Attributed PEM keystroke-injection device file
    pub pem_port: Option<String>,
    pub pem_interface: Option<String>,
}

impl DeviceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the relay channel's static configuration
    pub fn set_cutter(&mut self, link: CutterLink) {
        self.cutter = Some(link);
    }

    /// Attribute a serial console port
    pub fn attribute_serial(&mut self, port: &PortId) {
        self.serial_port = Some(port.device_path());
        self.serial_bauds = Some(SERIAL_BAUD);
    }

    /// Attribute a PEM port
    pub fn attribute_pem(&mut self, port: &PortId) {
        self.pem_port = Some(port.device_path());
        self.pem_interface = Some(PEM_INTERFACE.to_string());
    }

    /// Attribute a PC-like network endpoint. The MAC address doubles as the
    /// stable id; the model comes from the caller's MAC-prefix lookup and may
    /// be unknown.
    pub fn attribute_pc(&mut self, mac: &str, model: Option<String>) {
        self.id = Some(mac.to_string());
        self.model = model;
    }

    /// Attribute a USB-networked board endpoint. The board has no usable MAC,
    /// so the id is a freshly generated UUID; it only needs to be unique
    /// within one topology file.
    pub fn attribute_usb_board(&mut self, subnet: &str, usb_path: &str, model: &str) {
        self.network_subnet = Some(subnet.to_string());
        self.edison_usb_port = Some(usb_path.to_string());
        self.id = Some(Uuid::new_v4().to_string());
        self.model = Some(model.to_string());
    }

    /// Export populated fields as flat string key/value pairs, in field order
    pub fn to_entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();

        if let Some(link) = &self.cutter {
            entries.push(("cutter".to_string(), link.cutter.clone()));
            if let Some(channel) = &link.channel {
                entries.push(("channel".to_string(), channel.clone()));
            }
        }
        push_entry(&mut entries, "model", &self.model);
        push_entry(&mut entries, "id", &self.id);
        push_entry(&mut entries, "network_subnet", &self.network_subnet);
        push_entry(&mut entries, "edison_usb_port", &self.edison_usb_port);
        push_entry(&mut entries, "serial_port", &self.serial_port);
        if let Some(bauds) = self.serial_bauds {
            entries.push(("serial_bauds".to_string(), bauds.to_string()));
        }
        push_entry(&mut entries, "pem_port", &self.pem_port);
        push_entry(&mut entries, "pem_interface", &self.pem_interface);

        entries
    }
}

fn push_entry(entries: &mut Vec<(String, String)>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        entries.push((key.to_string(), value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_device_path() {
        let port = PortId::new("ttyUSB3");
        assert_eq!(port.device_path(), "/dev/ttyUSB3");
        assert!(port.is_usb_serial());
        assert!(!PortId::new("ttyS0").is_usb_serial());
    }

    #[test]
    fn test_serial_attribution() {
        let mut record = DeviceRecord::new();
        record.attribute_serial(&PortId::new("ttyUSB2"));
        assert_eq!(record.serial_port.as_deref(), Some("/dev/ttyUSB2"));
        assert_eq!(record.serial_bauds, Some(115200));
    }

    #[test]
    fn test_pem_attribution() {
        let mut record = DeviceRecord::new();
        record.attribute_pem(&PortId::new("ttyUSB9"));
        assert_eq!(record.pem_port.as_deref(), Some("/dev/ttyUSB9"));
        assert_eq!(record.pem_interface.as_deref(), Some("serialconnection"));
    }

    #[test]
    fn test_usb_board_ids_are_unique() {
        let mut a = DeviceRecord::new();
        let mut b = DeviceRecord::new();
        a.attribute_usb_board("192.168.2.10", "2-1.4.1.2", "edison");
        b.attribute_usb_board("192.168.2.14", "2-1.4.1.3", "edison");
        assert_ne!(a.id, b.id);
        assert_eq!(a.model.as_deref(), Some("edison"));
    }

    #[test]
    fn test_entries_in_field_order_skip_empty() {
        let mut record = DeviceRecord::new();
        record.set_cutter(CutterLink::new("563412", Some("2".to_string())));
        record.attribute_pc("aa:bb:cc:dd:ee:ff", Some("minnowboard".to_string()));
        record.attribute_serial(&PortId::new("ttyUSB1"));

        let entries = record.to_entries();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["cutter", "channel", "model", "id", "serial_port", "serial_bauds"]
        );
        assert_eq!(entries[3].1, "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_endpoint_probe_ip() {
        let pc = NetworkEndpoint::Pc {
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            ip: "10.0.0.5".to_string(),
        };
        assert_eq!(pc.probe_ip(), "10.0.0.5");

        let board = NetworkEndpoint::EdisonUsb {
            usb_path: "2-1.4".to_string(),
            host_ip: "192.168.2.12".to_string(),
            subnet: "192.168.2.10".to_string(),
        };
        assert_eq!(board.probe_ip(), "192.168.2.12");
    }
}
