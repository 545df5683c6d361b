//! Multi-phase camera discovery over an IPv4 range
//!
//! A run moves through liveness sweep, port scan and protocol detection, each
//! phase feeding the next one's candidate set, then ranks the hosts that look
//! like cameras.

pub mod detection;
pub mod engine;
pub mod methods;
pub mod range;

use crate::error::ScanError;
use crate::network::{ConfidenceTier, DetectionProtocol, PortResult};
use crate::scanner::{ScanProgress, ScanResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

pub use detection::ProtocolDetector;
pub use engine::{ScanHandle, ScanOrchestrator};
pub use methods::{LivenessResult, TcpLiveness};
pub use range::ScanRange;

/// Phases a run can include
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanMethod {
    LivenessSweep,
    PortScan,
    ProtocolDetection,
}

impl ScanMethod {
    pub fn all() -> Vec<ScanMethod> {
        vec![ScanMethod::LivenessSweep, ScanMethod::PortScan, ScanMethod::ProtocolDetection]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanMethod::LivenessSweep => "liveness",
            ScanMethod::PortScan => "portscan",
            ScanMethod::ProtocolDetection => "detection",
        }
    }
}

impl fmt::Display for ScanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScanMethod {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "liveness" | "ping" | "sweep" => Ok(ScanMethod::LivenessSweep),
            "portscan" | "ports" | "port" => Ok(ScanMethod::PortScan),
            "detection" | "detect" | "protocol" => Ok(ScanMethod::ProtocolDetection),
            other => Err(ScanError::ParseError(format!("unknown scan method: {}", other))),
        }
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    Idle,
    Preparing,
    Scanning,
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Error)
    }

    /// Linear forward steps; any live state may also end in Cancelled or Error
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (ScanStatus::Idle, ScanStatus::Preparing)
                | (ScanStatus::Preparing, ScanStatus::Scanning)
                | (ScanStatus::Scanning, ScanStatus::Processing)
                | (ScanStatus::Processing, ScanStatus::Completed)
                | (_, ScanStatus::Cancelled)
                | (_, ScanStatus::Error)
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStatus::Idle => "Idle",
            ScanStatus::Preparing => "Preparing",
            ScanStatus::Scanning => "Scanning",
            ScanStatus::Processing => "Processing",
            ScanStatus::Completed => "Completed",
            ScanStatus::Cancelled => "Cancelled",
            ScanStatus::Error => "Error",
        };
        f.write_str(name)
    }
}

/// One protocol probe against one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub ip: IpAddr,
    pub port: u16,
    pub protocol: DetectionProtocol,
    pub detected: bool,
    pub response_time_ms: f64,
    pub details: BTreeMap<String, String>,
    pub error_message: Option<String>,
}

impl DetectionResult {
    pub fn new(ip: IpAddr, port: u16, protocol: DetectionProtocol) -> Self {
        Self {
            ip,
            port,
            protocol,
            detected: false,
            response_time_ms: 0.0,
            details: BTreeMap::new(),
            error_message: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.detected && self.error_message.is_none()
    }

    /// Detection built from a confirmed authentication on a scanned port
    pub fn from_authenticated_port(ip: IpAddr, port: &PortResult) -> Option<Self> {
        if !port.auth_success {
            return None;
        }
        let method = port.auth_method.clone().unwrap_or_default();
        let protocol = protocol_for_method(&method);

        let mut result = Self::new(ip, port.port, protocol);
        result.detected = true;
        result.response_time_ms = port.response_time_ms;
        result.details.insert("auth_method".to_string(), method);
        if let Some(url) = port.valid_urls.first() {
            result.details.insert("url".to_string(), url.clone());
        }
        Some(result)
    }
}

fn protocol_for_method(method: &str) -> DetectionProtocol {
    if method.starts_with("RTSP") {
        DetectionProtocol::Rtsp
    } else if method.starts_with("ONVIF") {
        DetectionProtocol::Onvif
    } else if method.starts_with("HTTP") {
        DetectionProtocol::Http
    } else if method.starts_with("VendorSDK") {
        DetectionProtocol::VendorSdk
    } else {
        DetectionProtocol::Generic
    }
}

/// Everything learned about one host during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub ip: IpAddr,
    pub is_alive: bool,
    pub liveness: Option<LivenessResult>,
    pub scan: Option<ScanResult>,
    pub detections: Vec<DetectionResult>,
    /// Every phase requested for this host finished
    pub fully_processed: bool,
}

impl HostReport {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            is_alive: false,
            liveness: None,
            scan: None,
            detections: Vec::new(),
            fully_processed: false,
        }
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.scan.as_ref().map(ScanResult::open_port_numbers).unwrap_or_default()
    }

    /// Any signal of life from any phase
    pub fn shows_life(&self) -> bool {
        self.is_alive
            || self.scan.as_ref().map_or(false, |scan| scan.is_alive)
            || self.detections.iter().any(DetectionResult::is_successful)
    }

    pub fn is_camera(&self) -> bool {
        self.detections.iter().any(DetectionResult::is_successful)
    }

    /// Successful detections first, then fastest first
    pub fn sort_detections(&mut self) {
        self.detections.sort_by(|a, b| {
            b.is_successful()
                .cmp(&a.is_successful())
                .then(a.response_time_ms.total_cmp(&b.response_time_ms))
                .then(a.port.cmp(&b.port))
        });
    }

    /// Highest tier among successful detections; confirmed credentials on a
    /// real protocol make it High
    pub fn confidence(&self) -> Option<ConfidenceTier> {
        let detected = self
            .detections
            .iter()
            .filter(|d| d.is_successful())
            .map(|d| d.protocol.confidence())
            .max();

        let authenticated = self
            .scan
            .iter()
            .flat_map(|scan| scan.authenticated_ports())
            .any(|port| {
                let method = port.auth_method.as_deref().unwrap_or_default();
                protocol_for_method(method).confidence() > ConfidenceTier::Low
            });

        if authenticated {
            Some(ConfidenceTier::High)
        } else {
            detected
        }
    }
}

/// Filtered view of a host that looks like a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSummary {
    pub ip: IpAddr,
    pub confidence: ConfidenceTier,
    pub protocols: Vec<DetectionProtocol>,
    pub open_ports: Vec<u16>,
    pub authenticated: bool,
    pub auth_methods: Vec<String>,
    pub valid_urls: Vec<String>,
    /// Manufacturer, model and similar facts gathered along the way
    pub details: BTreeMap<String, String>,
}

impl CameraSummary {
    pub fn from_host(host: &HostReport) -> Option<Self> {
        if !host.is_camera() {
            return None;
        }
        let confidence = host.confidence()?;

        let mut protocols: Vec<DetectionProtocol> = host
            .detections
            .iter()
            .filter(|d| d.is_successful())
            .map(|d| d.protocol)
            .collect();
        protocols.sort();
        protocols.dedup();

        let mut auth_methods = Vec::new();
        let mut valid_urls = Vec::new();
        if let Some(scan) = &host.scan {
            for port in scan.authenticated_ports() {
                if let Some(method) = &port.auth_method {
                    if !auth_methods.contains(method) {
                        auth_methods.push(method.clone());
                    }
                }
                valid_urls.extend(port.valid_urls.iter().cloned());
            }
        }

        let mut details = BTreeMap::new();
        for detection in host.detections.iter().filter(|d| d.is_successful()) {
            for (key, value) in &detection.details {
                details.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        Some(Self {
            ip: host.ip,
            confidence,
            protocols,
            open_ports: host.open_ports(),
            authenticated: !auth_methods.is_empty(),
            auth_methods,
            valid_urls,
            details,
        })
    }
}

/// Aggregate numbers for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub scan_id: Uuid,
    pub status: ScanStatus,
    /// Hosts that went through the port scan
    pub total_scans: usize,
    pub total_hosts: u64,
    pub alive_hosts: usize,
    pub cameras_found: usize,
    pub open_ports: usize,
    pub successful_auths: usize,
    pub avg_duration_seconds: f64,
    pub elapsed_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Final output of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub range: ScanRange,
    pub methods: Vec<ScanMethod>,
    pub hosts: Vec<HostReport>,
    pub cameras: Vec<CameraSummary>,
    pub statistics: ScanStatistics,
}

/// Notifications published to subscribers
#[derive(Debug, Clone)]
pub enum ScanEvent {
    StatusChanged(ScanStatus),
    Progress(ScanProgress),
    PortResult { ip: IpAddr, result: PortResult },
    HostComplete(ScanResult),
    Detection(DetectionResult),
    Finished(ScanStatistics),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ip() -> IpAddr {
        "10.0.0.5".parse().unwrap()
    }

    fn detection(protocol: DetectionProtocol, detected: bool, ms: f64) -> DetectionResult {
        let mut result = DetectionResult::new(ip(), 554, protocol);
        result.detected = detected;
        result.response_time_ms = ms;
        result
    }

    #[test]
    fn test_status_transitions() {
        assert!(ScanStatus::Idle.can_transition_to(ScanStatus::Preparing));
        assert!(ScanStatus::Scanning.can_transition_to(ScanStatus::Processing));
        assert!(ScanStatus::Preparing.can_transition_to(ScanStatus::Cancelled));
        assert!(!ScanStatus::Idle.can_transition_to(ScanStatus::Scanning));
        assert!(!ScanStatus::Completed.can_transition_to(ScanStatus::Cancelled));
        assert!(!ScanStatus::Cancelled.can_transition_to(ScanStatus::Error));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("PortScan".parse::<ScanMethod>().unwrap(), ScanMethod::PortScan);
        assert_eq!("ping".parse::<ScanMethod>().unwrap(), ScanMethod::LivenessSweep);
        assert!("bogus".parse::<ScanMethod>().is_err());
    }

    #[test]
    fn test_successful_needs_no_error() {
        let mut result = detection(DetectionProtocol::Rtsp, true, 3.0);
        assert!(result.is_successful());
        result.error_message = Some("reset".to_string());
        assert!(!result.is_successful());
    }

    #[test]
    fn test_detection_ordering() {
        let mut host = HostReport::new(ip());
        host.detections = vec![
            detection(DetectionProtocol::Http, false, 1.0),
            detection(DetectionProtocol::Onvif, true, 9.0),
            detection(DetectionProtocol::Rtsp, true, 2.0),
        ];
        host.sort_detections();
        let order: Vec<_> = host.detections.iter().map(|d| d.protocol).collect();
        assert_eq!(
            order,
            vec![DetectionProtocol::Rtsp, DetectionProtocol::Onvif, DetectionProtocol::Http]
        );
    }

    #[test]
    fn test_vendor_sdk_alone_stays_low() {
        let mut host = HostReport::new(ip());
        host.detections = vec![detection(DetectionProtocol::VendorSdk, true, 1.0)];

        let mut port = PortResult::new(37777, true);
        port.auth_tested = true;
        port.auth_success = true;
        port.auth_method = Some("VendorSDK (heuristic)".to_string());
        host.scan = Some(ScanResult::from_ports(ip(), vec![port], Duration::from_secs(1), true));

        assert_eq!(host.confidence(), Some(ConfidenceTier::Low));
        let summary = CameraSummary::from_host(&host).unwrap();
        assert_eq!(summary.confidence, ConfidenceTier::Low);
        assert!(summary.authenticated);
    }

    #[test]
    fn test_authenticated_rtsp_is_high() {
        let mut host = HostReport::new(ip());
        let mut port = PortResult::new(80, true);
        port.auth_tested = true;
        port.auth_success = true;
        port.auth_method = Some("HTTP Digest".to_string());
        port.valid_urls = vec!["http://10.0.0.5:80/ISAPI/System/deviceInfo".to_string()];
        host.scan = Some(ScanResult::from_ports(ip(), vec![port.clone()], Duration::from_secs(1), true));
        host.detections = vec![DetectionResult::from_authenticated_port(ip(), &port).unwrap()];

        let summary = CameraSummary::from_host(&host).unwrap();
        assert_eq!(summary.confidence, ConfidenceTier::High);
        assert_eq!(summary.protocols, vec![DetectionProtocol::Http]);
        assert_eq!(summary.valid_urls.len(), 1);
    }

    #[test]
    fn test_no_detection_no_summary() {
        let mut host = HostReport::new(ip());
        host.is_alive = true;
        assert!(host.shows_life());
        assert!(CameraSummary::from_host(&host).is_none());
    }
}
