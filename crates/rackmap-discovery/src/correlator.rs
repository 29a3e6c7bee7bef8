//! Elimination-based topology correlator.
//!
//! The correlator answers one question per relay channel: which serial port,
//! which PEM port and which network endpoint belong to the device behind it?
//! It does so by leave-one-out elimination:
//!
//! 1. capture baseline pools of live ports and endpoints under full power,
//! 2. switch channels off one at a time, cumulatively,
//! 3. whatever stopped answering after a switch-off belongs to that channel.
//!
//! Pools only ever shrink, channels are never re-energized mid-run, and an
//! attribution is made only when exactly one candidate disappeared.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rackmap_core::{CutterLink, DeviceRecord, NetworkEndpoint, PortId};
use rackmap_probe::{scan_pem_ports, scan_serial_ports};
use rackmap_relay::PowerCutter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::endpoints::{collect_endpoints, is_reachable, EndpointError, SubnetSlots};
use crate::kernellog::{self, KernelLogError, TimestampWindow};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    KernelLog(#[from] KernelLogError),
    #[error(transparent)]
    Endpoints(#[from] EndpointError),
}

/// Maps a device model to the MAC address prefixes its NICs ship with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacPrefixRule {
    pub model: String,
    pub mac_prefixes: Vec<String>,
}

/// Model for a MAC address, by case-insensitive prefix match. The first
/// matching rule wins.
pub fn model_for_mac(rules: &[MacPrefixRule], mac: &str) -> Option<String> {
    let mac = mac.to_lowercase();
    rules
        .iter()
        .find(|rule| {
            rule.mac_prefixes
                .iter()
                .any(|prefix| mac.starts_with(&prefix.to_lowercase()))
        })
        .map(|rule| rule.model.clone())
}

/// Correlator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Wait budget for the baseline PEM scan in seconds
    pub pem_baseline_budget_secs: u64,
    /// Wait budget for the baseline serial scan in seconds
    pub serial_baseline_budget_secs: u64,
    /// Per-round wait budget shared by both port scans in seconds
    pub round_budget_secs: u64,
    /// Delay before a port scan opens anything, in seconds
    pub port_settle_secs: u64,
    /// Delay between switching a relay and trusting what the rack reports
    pub relay_settle_secs: u64,
    /// Boot allowance after powering the whole rack on, in seconds
    pub boot_wait_secs: u64,
    /// Drain allowance for probe workers cancelled at their deadline
    pub probe_grace_secs: u64,
    /// Echo count for board liveness pings
    pub ping_count: u32,
    /// Connect timeout for SSH liveness checks, in seconds
    pub ssh_timeout_secs: u64,
    /// Subnet prefix carved into /30 slots for USB-networked boards
    pub subnet_prefix: String,
    /// First host number handed to a board slot
    pub subnet_start: u32,
    /// Model name recorded for USB-networked boards
    pub board_model: String,
    /// MAC prefix rules for identifying PC-class models
    pub pc_models: Vec<MacPrefixRule>,
    /// udev identities of USB relay products to auto-detect
    pub relay_products: Vec<crate::detect::UsbRelayMatch>,
    /// Keystroke script played by the PEM probe
    pub keystrokes_path: PathBuf,
    /// dnsmasq lease database
    pub leases_path: PathBuf,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            pem_baseline_budget_secs: 80, // PEM playback is slow, and boards boot in parallel
            serial_baseline_budget_secs: 20,
            round_budget_secs: 30,
            port_settle_secs: 10,
            relay_settle_secs: 5,
            boot_wait_secs: 120,
            probe_grace_secs: 2,
            ping_count: 10,
            ssh_timeout_secs: 10,
            subnet_prefix: "192.168.2.".to_string(),
            subnet_start: 10,
            board_model: "edison".to_string(),
            pc_models: Vec::new(),
            relay_products: vec![crate::detect::UsbRelayMatch {
                vendor: "1a86".to_string(),
                model: "USB2.0-Ser!".to_string(),
            }],
            keystrokes_path: PathBuf::from("/etc/rackmap/pem_keys.txt"),
            leases_path: PathBuf::from("/var/lib/misc/dnsmasq.leases"),
        }
    }
}

/// Which port pool an observation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Pem,
    Serial,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pem => write!(f, "pem"),
            Self::Serial => write!(f, "serial"),
        }
    }
}

/// Discovery event for progress reporting
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Baseline pools captured under full power
    BaselineCaptured {
        pem_ports: usize,
        serial_ports: usize,
        endpoints: usize,
    },
    /// An elimination round started for one channel
    RoundStarted { channel: CutterLink },
    /// A network endpoint stopped answering and was attributed
    EndpointAttributed {
        channel: CutterLink,
        endpoint: NetworkEndpoint,
    },
    /// A port disappeared and was attributed
    PortAttributed {
        channel: CutterLink,
        kind: ProbeKind,
        port: PortId,
    },
    /// More than one candidate disappeared at once; none was attributed
    AmbiguousDisappearance {
        channel: CutterLink,
        kind: ProbeKind,
        ports: Vec<PortId>,
    },
    /// The run finished
    RunCompleted { records: usize },
}

/// What the correlator reads from the host while a run executes: device
/// files, the kernel log mark, and the endpoint index.
pub trait RackView: Send {
    /// Device files currently present
    fn device_files(&mut self) -> Result<Vec<PortId>, DiscoveryError>;
    /// Mark for an evidence window over the kernel log
    fn log_mark(&mut self) -> Result<u64, DiscoveryError>;
    /// Candidate network endpoints that appeared inside the window
    fn endpoints(&mut self, window: &TimestampWindow)
        -> Result<Vec<NetworkEndpoint>, DiscoveryError>;
}

/// Port-probing seam. Implementations decide which of the candidate device
/// files host a live PEM or serial console within the budget.
pub trait PortScan: Send + Sync {
    fn pem_ports(
        &self,
        candidates: Vec<PortId>,
        budget: Duration,
    ) -> impl Future<Output = Vec<PortId>> + Send;

    fn serial_ports(
        &self,
        candidates: Vec<PortId>,
        budget: Duration,
    ) -> impl Future<Output = Vec<PortId>> + Send;
}

/// Endpoint liveness seam.
pub trait NetProbe: Send + Sync {
    fn is_alive(&self, endpoint: &NetworkEndpoint) -> impl Future<Output = bool> + Send;
}

/// Host evidence sources of a real rack: /dev, dmesg and the dnsmasq lease
/// database.
pub struct LiveRackView {
    leases_path: PathBuf,
    slots: SubnetSlots,
}

impl LiveRackView {
    pub fn new(config: &CorrelatorConfig) -> Self {
        Self {
            leases_path: config.leases_path.clone(),
            slots: SubnetSlots::new(&config.subnet_prefix, config.subnet_start),
        }
    }
}

impl RackView for LiveRackView {
    fn device_files(&mut self) -> Result<Vec<PortId>, DiscoveryError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir("/dev")? {
            files.push(PortId::new(&entry?.file_name().to_string_lossy()));
        }
        Ok(files)
    }

    fn log_mark(&mut self) -> Result<u64, DiscoveryError> {
        Ok(kernellog::newest_timestamp()?)
    }

    fn endpoints(
        &mut self,
        window: &TimestampWindow,
    ) -> Result<Vec<NetworkEndpoint>, DiscoveryError> {
        let lines = kernellog::snapshot()?;
        Ok(collect_endpoints(
            &lines,
            window,
            &self.leases_path,
            &mut self.slots,
        )?)
    }
}

/// Port scanner backed by the real serial probes.
#[derive(Clone)]
pub struct LivePortScan {
    settle: Duration,
    grace: Duration,
    keystrokes: Arc<str>,
}

impl LivePortScan {
    /// `keystrokes` is the playback script content, already read from
    /// [`CorrelatorConfig::keystrokes_path`].
    pub fn new(config: &CorrelatorConfig, keystrokes: &str) -> Self {
        Self {
            settle: Duration::from_secs(config.port_settle_secs),
            grace: Duration::from_secs(config.probe_grace_secs),
            keystrokes: Arc::from(keystrokes),
        }
    }
}

impl PortScan for LivePortScan {
    async fn pem_ports(&self, candidates: Vec<PortId>, budget: Duration) -> Vec<PortId> {
        scan_pem_ports(&candidates, &self.keystrokes, self.settle, budget, self.grace).await
    }

    async fn serial_ports(&self, candidates: Vec<PortId>, budget: Duration) -> Vec<PortId> {
        scan_serial_ports(&candidates, self.settle, budget, self.grace).await
    }
}

/// Endpoint prober backed by SSH and ping.
pub struct LiveNetProbe {
    ping_count: u32,
    ssh_timeout_secs: u64,
}

impl LiveNetProbe {
    pub fn new(config: &CorrelatorConfig) -> Self {
        Self {
            ping_count: config.ping_count,
            ssh_timeout_secs: config.ssh_timeout_secs,
        }
    }
}

impl NetProbe for LiveNetProbe {
    async fn is_alive(&self, endpoint: &NetworkEndpoint) -> bool {
        is_reachable(endpoint, self.ping_count, self.ssh_timeout_secs).await
    }
}

/// Sweeps the endpoint pool in order and returns the index of the first
/// endpoint that no longer answers. Endpoints after the hit are not probed.
async fn first_dead_endpoint<N: NetProbe>(
    net: &N,
    endpoints: &[NetworkEndpoint],
) -> Option<usize> {
    for (index, endpoint) in endpoints.iter().enumerate() {
        if net.is_alive(endpoint).await {
            debug!(endpoint = %endpoint, "Endpoint still answers");
        } else {
            info!(endpoint = %endpoint, "Endpoint went dark");
            return Some(index);
        }
    }
    None
}

/// Drives the elimination rounds and owns the shrinking candidate pools.
pub struct TopologyCorrelator<R, S, N> {
    config: CorrelatorConfig,
    rack: R,
    scanner: S,
    net: N,
    pem_pool: Vec<PortId>,
    serial_pool: Vec<PortId>,
    endpoint_pool: Vec<NetworkEndpoint>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl<R: RackView, S: PortScan, N: NetProbe> TopologyCorrelator<R, S, N> {
    pub fn new(config: CorrelatorConfig, rack: R, scanner: S, net: N) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            rack,
            scanner,
            net,
            pem_pool: Vec::new(),
            serial_pool: Vec::new(),
            endpoint_pool: Vec::new(),
            event_tx,
        }
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Run a full discovery: baseline under full power, then one elimination
    /// round per channel. Records come back in channel order; a record whose
    /// channel powered nothing observable stays empty apart from the channel
    /// itself.
    pub async fn discover(
        &mut self,
        cutters: &[Box<dyn PowerCutter>],
    ) -> Result<Vec<DeviceRecord>, DiscoveryError> {
        info!(channels = cutters.len(), "Starting topology discovery");

        self.capture_baseline(cutters).await?;

        let mut records = Vec::with_capacity(cutters.len());
        for cutter in cutters {
            records.push(self.eliminate_round(cutter.as_ref()).await);
        }

        let _ = self.event_tx.send(DiscoveryEvent::RunCompleted {
            records: records.len(),
        });
        info!(records = records.len(), "Topology discovery complete");
        Ok(records)
    }

    /// Captures the baseline pools with every channel energized.
    async fn capture_baseline(
        &mut self,
        cutters: &[Box<dyn PowerCutter>],
    ) -> Result<(), DiscoveryError> {
        let relay_settle = Duration::from_secs(self.config.relay_settle_secs);

        // Step 1: power-cycle the rack so every board re-enumerates inside
        // the evidence window
        for cutter in cutters {
            if let Err(err) = cutter.disconnect() {
                warn!(channel = %cutter.link(), error = %err, "Could not switch channel off");
            }
        }
        sleep(relay_settle).await;
        let window = TimestampWindow::starting_at(self.rack.log_mark()?);
        for cutter in cutters {
            if let Err(err) = cutter.connect() {
                warn!(channel = %cutter.link(), error = %err, "Could not switch channel on");
            }
        }

        let device_files = self.rack.device_files()?;
        info!(
            device_files = device_files.len(),
            "Capturing baseline pools under full power"
        );

        // Step 2: scan for PEMs while the devices boot, then index the
        // endpoints once the boot allowance has passed
        let boot_wait = Duration::from_secs(self.config.boot_wait_secs);
        let pem_budget = Duration::from_secs(self.config.pem_baseline_budget_secs);
        let scanner = &self.scanner;
        let rack = &mut self.rack;
        let (pem_pool, endpoints) = tokio::join!(
            scanner.pem_ports(device_files.clone(), pem_budget),
            async move {
                sleep(boot_wait).await;
                rack.endpoints(&window)
            }
        );
        self.pem_pool = pem_pool;
        self.endpoint_pool = endpoints?;

        // Step 3: a device file hosts the PEM or a console, never both, so
        // the serial scan only gets what the PEM scan did not claim
        let serial_candidates: Vec<PortId> = device_files
            .into_iter()
            .filter(|port| !self.pem_pool.contains(port))
            .collect();
        let serial_budget = Duration::from_secs(self.config.serial_baseline_budget_secs);
        self.serial_pool = self
            .scanner
            .serial_ports(serial_candidates, serial_budget)
            .await;

        info!(
            pem_ports = self.pem_pool.len(),
            serial_ports = self.serial_pool.len(),
            endpoints = self.endpoint_pool.len(),
            "Baseline pools captured"
        );
        let _ = self.event_tx.send(DiscoveryEvent::BaselineCaptured {
            pem_ports: self.pem_pool.len(),
            serial_ports: self.serial_pool.len(),
            endpoints: self.endpoint_pool.len(),
        });
        Ok(())
    }

    /// One elimination round: switch the channel off, observe what vanished
    /// from the pools, and fold the findings into a fresh record. The channel
    /// stays off afterwards.
    async fn eliminate_round(&mut self, cutter: &dyn PowerCutter) -> DeviceRecord {
        let link = cutter.link();
        info!(channel = %link, "Starting elimination round");
        let _ = self.event_tx.send(DiscoveryEvent::RoundStarted {
            channel: link.clone(),
        });

        if let Err(err) = cutter.disconnect() {
            warn!(channel = %link, error = %err, "Could not switch channel off");
        }

        let round_budget = Duration::from_secs(self.config.round_budget_secs);
        let relay_settle = Duration::from_secs(self.config.relay_settle_secs);
        let pem_candidates = self.pem_pool.clone();
        let serial_candidates = self.serial_pool.clone();

        // Both scans and the endpoint sweep observe the rack concurrently;
        // nothing is applied to the pools until all three are back
        let scanner = &self.scanner;
        let net = &self.net;
        let endpoints = &self.endpoint_pool;
        let (pem_active, serial_active, dead) = tokio::join!(
            scanner.pem_ports(pem_candidates, round_budget),
            scanner.serial_ports(serial_candidates, round_budget),
            async move {
                sleep(relay_settle).await;
                first_dead_endpoint(net, endpoints).await
            }
        );

        let mut record = DeviceRecord::new();
        record.set_cutter(link.clone());

        // Network identity first: the model decides how the record is
        // grouped, and it comes from the endpoint
        if let Some(index) = dead {
            self.attribute_endpoint(index, &link, &mut record);
        }
        self.apply_port_diff(ProbeKind::Pem, &pem_active, &link, &mut record);
        self.apply_port_diff(ProbeKind::Serial, &serial_active, &link, &mut record);

        record
    }

    /// Removes the endpoint at `index` from the pool and merges its identity
    /// into the record.
    fn attribute_endpoint(&mut self, index: usize, link: &CutterLink, record: &mut DeviceRecord) {
        let endpoint = self.endpoint_pool.remove(index);
        match &endpoint {
            NetworkEndpoint::Pc { mac, .. } => {
                let model = model_for_mac(&self.config.pc_models, mac);
                if model.is_none() {
                    debug!(mac = %mac, "No model rule matches this MAC");
                }
                record.attribute_pc(mac, model);
            }
            NetworkEndpoint::EdisonUsb {
                usb_path, subnet, ..
            } => {
                record.attribute_usb_board(subnet, usb_path, &self.config.board_model);
            }
        }
        info!(channel = %link, endpoint = %endpoint, "Attributed network endpoint");
        let _ = self.event_tx.send(DiscoveryEvent::EndpointAttributed {
            channel: link.clone(),
            endpoint,
        });
    }

    /// Diffs one pool against the ports still answering. Exactly one missing
    /// port is an attribution; none means the device lacks that peripheral;
    /// several at once is ambiguous and attributes nothing.
    fn apply_port_diff(
        &mut self,
        kind: ProbeKind,
        active: &[PortId],
        link: &CutterLink,
        record: &mut DeviceRecord,
    ) {
        let pool = match kind {
            ProbeKind::Pem => &mut self.pem_pool,
            ProbeKind::Serial => &mut self.serial_pool,
        };
        let mut disappeared: Vec<PortId> = pool
            .iter()
            .filter(|port| !active.contains(port))
            .cloned()
            .collect();

        match disappeared.len() {
            0 => {
                info!(channel = %link, "No {} port disappeared, device has none", kind);
            }
            1 => {
                let port = disappeared.remove(0);
                pool.retain(|p| p != &port);
                match kind {
                    ProbeKind::Pem => record.attribute_pem(&port),
                    ProbeKind::Serial => record.attribute_serial(&port),
                }
                info!(channel = %link, port = %port, "Attributed {} port", kind);
                let _ = self.event_tx.send(DiscoveryEvent::PortAttributed {
                    channel: link.clone(),
                    kind,
                    port,
                });
            }
            _ => {
                warn!(
                    channel = %link,
                    disappeared = disappeared.len(),
                    "Several {} candidates disappeared at once, attributing none",
                    kind
                );
                let _ = self.event_tx.send(DiscoveryEvent::AmbiguousDisappearance {
                    channel: link.clone(),
                    kind,
                    ports: disappeared,
                });
            }
        }
    }
}
