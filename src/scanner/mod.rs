//! Per-host port scanning and authentication supervision

pub mod coordinator;
pub mod engine;

use crate::discovery::ScanMethod;
use crate::network::PortResult;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

pub use coordinator::ScanCoordinator;
pub use engine::{scan_host, HostScanner, PortProgress};

/// Complete result of scanning one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Target that was scanned
    pub target_ip: IpAddr,

    /// Ports actually probed
    pub total_ports_scanned: usize,

    /// Open ports, ascending
    pub open_ports: Vec<PortResult>,

    /// Closed or unreachable ports, ascending
    pub closed_ports: Vec<PortResult>,

    pub scan_duration_seconds: f64,

    pub is_alive: bool,

    /// Credentials were configured and open ports went through the coordinator
    pub credentials_tested: bool,

    pub successful_auths: usize,

    /// The scan stopped early; only probed ports are listed
    pub cancelled: bool,
}

impl ScanResult {
    /// Partition probe results into open and closed, sorted by port
    pub fn from_ports(target_ip: IpAddr, results: Vec<PortResult>, duration: Duration, credentials_tested: bool) -> Self {
        let total_ports_scanned = results.len();
        let (mut open_ports, mut closed_ports): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_open);
        open_ports.sort_by_key(|r| r.port);
        closed_ports.sort_by_key(|r| r.port);

        let successful_auths = open_ports.iter().filter(|r| r.auth_success).count();

        Self {
            target_ip,
            total_ports_scanned,
            is_alive: !open_ports.is_empty(),
            open_ports,
            closed_ports,
            scan_duration_seconds: duration.as_secs_f64(),
            credentials_tested,
            successful_auths,
            cancelled: false,
        }
    }

    pub fn open_port_numbers(&self) -> Vec<u16> {
        self.open_ports.iter().map(|r| r.port).collect()
    }

    pub fn closed_port_numbers(&self) -> Vec<u16> {
        self.closed_ports.iter().map(|r| r.port).collect()
    }

    /// Open ports whose credentials were confirmed
    pub fn authenticated_ports(&self) -> impl Iterator<Item = &PortResult> {
        self.open_ports.iter().filter(|r| r.auth_success)
    }

    /// Get scan rate in ports per second
    pub fn scan_rate(&self) -> f64 {
        if self.scan_duration_seconds > 0.0 {
            self.total_ports_scanned as f64 / self.scan_duration_seconds
        } else {
            0.0
        }
    }
}

/// Live progress of an orchestrated run.
///
/// Written only by the orchestrator's control loop; subscribers get copies.
/// `scanned_*` counters restart at every phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub total_ips: u64,
    pub scanned_ips: u64,
    pub total_ports: u64,
    pub scanned_ports: u64,
    pub cameras_found: usize,
    pub current_ip: Option<IpAddr>,
    pub elapsed_seconds: f64,
    pub phase: Option<ScanMethod>,
}

impl ScanProgress {
    pub fn new(total_ips: u64) -> Self {
        Self {
            total_ips,
            ..Self::default()
        }
    }

    /// Reset the per-phase counters
    pub fn start_phase(&mut self, phase: ScanMethod, hosts: u64, units: u64) {
        self.phase = Some(phase);
        self.total_ips = hosts;
        self.scanned_ips = 0;
        self.total_ports = units;
        self.scanned_ports = 0;
        self.current_ip = None;
    }

    /// Completion of the current phase, 0-100
    pub fn percentage(&self) -> f64 {
        if self.total_ports > 0 {
            (self.scanned_ports as f64 / self.total_ports as f64) * 100.0
        } else if self.total_ips > 0 {
            (self.scanned_ips as f64 / self.total_ips as f64) * 100.0
        } else {
            0.0
        }
    }
}
