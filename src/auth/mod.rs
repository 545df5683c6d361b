//! Per-protocol authentication testers
//!
//! Every tester is built once from a [`ScanConfig`](crate::config::ScanConfig)
//! and shared read-only across concurrent probes. Testers bound their own
//! work, but the coordinator still wraps each call in an absolute deadline.

pub mod digest;
pub mod http;
pub mod onvif;
pub mod rtsp;
pub mod transport;
pub mod vendor;

use crate::network::DetectionProtocol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

pub use http::HttpAuthTester;
pub use onvif::OnvifAuthTester;
pub use rtsp::{FrameInfo, RtspAuthTester, RtspHandshake, StreamOpener};
pub use vendor::VendorSdkTester;

/// Result of one authentication attempt against one port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub method: Option<String>,
    pub error: Option<String>,
    pub valid_urls: Vec<String>,
    pub tested_urls: Vec<String>,
    /// Extra facts learned along the way (device model, firmware, ...)
    pub details: BTreeMap<String, String>,
}

impl AuthOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn success(method: impl Into<String>, valid_urls: Vec<String>) -> Self {
        Self {
            success: true,
            method: Some(method.into()),
            valid_urls,
            ..Self::default()
        }
    }

    pub fn with_tested_urls(mut self, tested_urls: Vec<String>) -> Self {
        self.tested_urls = tested_urls;
        self
    }
}

/// Strategy for validating credentials against one protocol
#[async_trait]
pub trait AuthTester: Send + Sync {
    fn protocol(&self) -> DetectionProtocol;

    fn name(&self) -> &str;

    /// Ports this tester is registered for in the routing table
    fn supported_ports(&self) -> Vec<u16>;

    /// Attempt authentication. Must not fail outward; failures go in `AuthOutcome::error`.
    ///
    /// Implementations check `cancel` between candidate URLs and stop early once it fires.
    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome;
}

/// Host part of a URL, bracketing IPv6 literals
pub(crate) fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}
