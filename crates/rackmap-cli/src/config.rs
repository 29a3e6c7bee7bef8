//! Configuration loading and validation

use anyhow::Result;
use rackmap_discovery::{CorrelatorConfig, MacPrefixRule, UsbRelayMatch};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub edison: EdisonConfig,
    #[serde(default, rename = "pc_device")]
    pub pc_devices: Vec<PcDeviceConfig>,
    #[serde(default, rename = "usb_relay")]
    pub usb_relays: Vec<UsbRelayConfig>,
    #[serde(default, rename = "gpio_cutter")]
    pub gpio_cutters: Vec<GpioCutterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Where the discovered topology is written
    #[serde(default = "default_topology_path")]
    pub path: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            path: default_topology_path(),
        }
    }
}

fn default_topology_path() -> PathBuf {
    PathBuf::from("/etc/rackmap/topology.cfg")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Wait budget for the baseline PEM scan in seconds
    #[serde(default = "default_pem_budget")]
    pub pem_baseline_budget_secs: u64,
    /// Wait budget for the baseline serial scan in seconds
    #[serde(default = "default_serial_budget")]
    pub serial_baseline_budget_secs: u64,
    /// Per-round wait budget for both port scans in seconds
    #[serde(default = "default_round_budget")]
    pub round_budget_secs: u64,
    /// Delay before a port scan opens anything, in seconds
    #[serde(default = "default_port_settle")]
    pub port_settle_secs: u64,
    /// Delay after switching a relay, in seconds
    #[serde(default = "default_relay_settle")]
    pub relay_settle_secs: u64,
    /// Boot allowance after powering the rack on, in seconds
    #[serde(default = "default_boot_wait")]
    pub boot_wait_secs: u64,
    /// Drain allowance for cancelled probe workers, in seconds
    #[serde(default = "default_probe_grace")]
    pub probe_grace_secs: u64,
    /// Echo count for board liveness pings
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    /// Connect timeout for SSH liveness checks, in seconds
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,
    /// Keystroke script played by the PEM probe
    #[serde(default = "default_keystrokes_path")]
    pub keystrokes: PathBuf,
    /// dnsmasq lease database
    #[serde(default = "default_leases_path")]
    pub leases: PathBuf,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            pem_baseline_budget_secs: default_pem_budget(),
            serial_baseline_budget_secs: default_serial_budget(),
            round_budget_secs: default_round_budget(),
            port_settle_secs: default_port_settle(),
            relay_settle_secs: default_relay_settle(),
            boot_wait_secs: default_boot_wait(),
            probe_grace_secs: default_probe_grace(),
            ping_count: default_ping_count(),
            ssh_timeout_secs: default_ssh_timeout(),
            keystrokes: default_keystrokes_path(),
            leases: default_leases_path(),
        }
    }
}

fn default_pem_budget() -> u64 {
    80 // PEM playback is slow, and devices boot in parallel with the scan
}

fn default_serial_budget() -> u64 {
    20
}

fn default_round_budget() -> u64 {
    30
}

fn default_port_settle() -> u64 {
    10
}

fn default_relay_settle() -> u64 {
    5
}

fn default_boot_wait() -> u64 {
    120
}

fn default_probe_grace() -> u64 {
    2
}

fn default_ping_count() -> u32 {
    10
}

fn default_ssh_timeout() -> u64 {
    10
}

fn default_keystrokes_path() -> PathBuf {
    PathBuf::from("/etc/rackmap/pem_keys.txt")
}

fn default_leases_path() -> PathBuf {
    PathBuf::from("/var/lib/misc/dnsmasq.leases")
}

/// Addressing for USB-networked boards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdisonConfig {
    /// Subnet prefix carved into /30 slots, one per board
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,
    /// First host number handed out
    #[serde(default = "default_ip_start")]
    pub ip_start: u32,
    /// Model name recorded for these boards
    #[serde(default = "default_board_model")]
    pub model: String,
}

impl Default for EdisonConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: default_subnet_prefix(),
            ip_start: default_ip_start(),
            model: default_board_model(),
        }
    }
}

fn default_subnet_prefix() -> String {
    "192.168.2.".to_string()
}

fn default_ip_start() -> u32 {
    10
}

fn default_board_model() -> String {
    "edison".to_string()
}

/// PC-class model identified by its MAC address prefixes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcDeviceConfig {
    pub model: String,
    pub mac_prefixes: Vec<String>,
}

/// udev identity of a USB relay product to auto-detect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbRelayConfig {
    pub vendor: String,
    pub model: String,
}

/// Statically configured GPIO power line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioCutterConfig {
    pub gpio: u32,
}

impl Config {
    /// Convert to CorrelatorConfig
    pub fn to_correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            pem_baseline_budget_secs: self.discovery.pem_baseline_budget_secs,
            serial_baseline_budget_secs: self.discovery.serial_baseline_budget_secs,
            round_budget_secs: self.discovery.round_budget_secs,
            port_settle_secs: self.discovery.port_settle_secs,
            relay_settle_secs: self.discovery.relay_settle_secs,
            boot_wait_secs: self.discovery.boot_wait_secs,
            probe_grace_secs: self.discovery.probe_grace_secs,
            ping_count: self.discovery.ping_count,
            ssh_timeout_secs: self.discovery.ssh_timeout_secs,
            subnet_prefix: self.edison.subnet_prefix.clone(),
            subnet_start: self.edison.ip_start,
            board_model: self.edison.model.clone(),
            pc_models: self
                .pc_devices
                .iter()
                .map(|d| MacPrefixRule {
                    model: d.model.clone(),
                    mac_prefixes: d.mac_prefixes.clone(),
                })
                .collect(),
            relay_products: self
                .usb_relays
                .iter()
                .map(|r| UsbRelayMatch {
                    vendor: r.vendor.clone(),
                    model: r.model.clone(),
                })
                .collect(),
            keystrokes_path: self.discovery.keystrokes.clone(),
            leases_path: self.discovery.leases.clone(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config {
            topology: TopologyConfig::default(),
            discovery: DiscoverySettings::default(),
            edison: EdisonConfig::default(),
            pc_devices: Vec::new(),
            usb_relays: Vec::new(),
            gpio_cutters: Vec::new(),
        })
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config {
        topology: TopologyConfig::default(),
        discovery: DiscoverySettings::default(),
        edison: EdisonConfig::default(),
        pc_devices: vec![PcDeviceConfig {
            model: "minnowboard".to_string(),
            mac_prefixes: vec!["54:ab".to_string()],
        }],
        usb_relays: vec![UsbRelayConfig {
            vendor: "1a86".to_string(),
            model: "USB2.0-Ser!".to_string(),
        }],
        gpio_cutters: Vec::new(),
    };

    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}
