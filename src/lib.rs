//! camscan - concurrent IP camera discovery
//!
//! Liveness sweep, TCP port scan and per-protocol credential checks (HTTP,
//! RTSP, ONVIF, vendor SDK) over IPv4 ranges, with hard time budgets on every
//! authentication attempt.

pub mod auth;
pub mod camera_ports;
pub mod config;
pub mod discovery;
pub mod error;
pub mod network;
pub mod output;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use auth::{AuthOutcome, AuthTester};
pub use config::{Credentials, Intensity, ScanConfig};
pub use discovery::{
    CameraSummary, DetectionResult, ScanHandle, ScanMethod, ScanOrchestrator, ScanRange, ScanReport, ScanStatistics,
    ScanStatus,
};
pub use error::{ProbeError, ScanError};
pub use network::{ConfidenceTier, DetectionProtocol, PortProbe, PortResult};
pub use scanner::{scan_host, HostScanner, ScanCoordinator, ScanProgress, ScanResult};

pub type Result<T> = std::result::Result<T, ScanError>;
