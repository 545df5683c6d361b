//! Network-level result types and the TCP port probe

pub mod socket;

use crate::auth::AuthOutcome;
use crate::camera_ports;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use socket::PortProbe;

/// Protocol families the engine can detect on a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionProtocol {
    Onvif,
    Rtsp,
    Http,
    VendorSdk,
    Generic,
}

impl DetectionProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            DetectionProtocol::Onvif => "ONVIF",
            DetectionProtocol::Rtsp => "RTSP",
            DetectionProtocol::Http => "HTTP",
            DetectionProtocol::VendorSdk => "VendorSDK",
            DetectionProtocol::Generic => "Generic",
        }
    }

    /// How much a positive detection of this protocol says about the host being a camera
    pub fn confidence(&self) -> ConfidenceTier {
        match self {
            DetectionProtocol::Onvif | DetectionProtocol::Rtsp => ConfidenceTier::High,
            DetectionProtocol::Http => ConfidenceTier::Medium,
            // the vendor handshake is undocumented, any echoing service passes it
            DetectionProtocol::VendorSdk | DetectionProtocol::Generic => ConfidenceTier::Low,
        }
    }
}

impl fmt::Display for DetectionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Confidence that a host is a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::Low => write!(f, "low"),
            ConfidenceTier::Medium => write!(f, "medium"),
            ConfidenceTier::High => write!(f, "high"),
        }
    }
}

/// Outcome of probing one port, optionally enriched by an authentication attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub is_open: bool,
    pub service_name: String,
    pub response_time_ms: f64,
    pub banner: Option<String>,
    pub auth_tested: bool,
    pub auth_success: bool,
    pub auth_method: Option<String>,
    pub auth_error: Option<String>,
    pub valid_urls: Vec<String>,
    pub tested_urls: Vec<String>,
}

impl PortResult {
    pub fn new(port: u16, is_open: bool) -> Self {
        Self {
            port,
            is_open,
            service_name: camera_ports::service_name(port).to_string(),
            response_time_ms: 0.0,
            banner: None,
            auth_tested: false,
            auth_success: false,
            auth_method: None,
            auth_error: None,
            valid_urls: Vec::new(),
            tested_urls: Vec::new(),
        }
    }

    pub fn closed(port: u16) -> Self {
        Self::new(port, false)
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time_ms = response_time.as_secs_f64() * 1000.0;
        self
    }

    pub fn with_banner(mut self, banner: Option<String>) -> Self {
        self.banner = banner;
        self
    }

    /// Record the result of an authentication attempt in one step.
    ///
    /// Only the coordinator calls this, and only once per port.
    pub fn apply_auth(&mut self, outcome: AuthOutcome) {
        self.auth_tested = true;
        self.auth_success = outcome.success;
        self.auth_method = if outcome.success { outcome.method } else { None };
        self.auth_error = outcome.error;
        self.valid_urls = outcome.valid_urls;
        self.tested_urls = outcome.tested_urls;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_port_result_is_untested() {
        let result = PortResult::new(554, true);
        assert_eq!(result.service_name, "RTSP");
        assert!(!result.auth_tested);
        assert!(!result.auth_success);
        assert!(result.auth_method.is_none());
    }

    #[test]
    fn test_failed_auth_drops_method() {
        let mut result = PortResult::new(80, true);
        let mut outcome = AuthOutcome::failure("credentials rejected (HTTP 401)");
        outcome.method = Some("HTTP Digest".to_string());
        result.apply_auth(outcome);
        assert!(result.auth_tested);
        assert!(!result.auth_success);
        assert!(result.auth_method.is_none());
        assert_eq!(result.auth_error.as_deref(), Some("credentials rejected (HTTP 401)"));
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(DetectionProtocol::Rtsp.confidence() > DetectionProtocol::Http.confidence());
        assert!(DetectionProtocol::Http.confidence() > DetectionProtocol::VendorSdk.confidence());
    }
}
