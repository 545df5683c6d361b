//! Configuration module for the camscan engine
//!
//! A [`ScanConfig`] is built once before a run starts and is never mutated
//! while the run is in flight; testers and scanners receive their own copy.

use crate::camera_ports;
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Username / password pair used by every authentication tester.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How many HTTP candidate paths the HTTP tester is allowed to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Basic,
    #[default]
    Medium,
    High,
    Maximum,
}

impl Intensity {
    /// Upper bound on candidate paths, `None` meaning every known path.
    pub fn max_paths(&self) -> Option<usize> {
        match self {
            Intensity::Basic => Some(10),
            Intensity::Medium => Some(20),
            Intensity::High => Some(30),
            Intensity::Maximum => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intensity::Basic => "basic",
            Intensity::Medium => "medium",
            Intensity::High => "high",
            Intensity::Maximum => "maximum",
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Intensity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Intensity::Basic),
            "medium" => Ok(Intensity::Medium),
            "high" => Ok(Intensity::High),
            "maximum" | "max" => Ok(Intensity::Maximum),
            other => Err(ScanError::InvalidIntensity(other.to_string())),
        }
    }
}

/// Main configuration structure for a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// TCP connect timeout in milliseconds
    pub timeout_ms: u64,

    /// Simultaneous port probes per host
    pub port_concurrency: usize,

    /// Simultaneous hosts per orchestrator phase
    pub host_concurrency: usize,

    /// Credentials to test; auth testing is skipped when absent
    pub credentials: Option<Credentials>,

    /// HTTP candidate path budget
    pub intensity: Intensity,

    /// Brand preset whose HTTP paths are tried first
    pub brand: Option<String>,

    /// Read a short banner from open ports
    pub grab_banner: bool,

    /// Absolute deadline for one port's authentication attempt
    pub auth_deadline_ms: u64,

    /// Upper bound on any single HTTP or ONVIF request
    pub http_request_cap_ms: u64,

    /// Timeout for a single RTSP URL attempt
    pub rtsp_attempt_timeout_ms: u64,

    /// Total RTSP budget across all candidate URLs of one port
    pub rtsp_total_budget_ms: u64,

    /// Ports used by the liveness sweep
    pub liveness_ports: Vec<u16>,

    /// Keep hosts that showed no sign of life in the final results
    pub include_dead_hosts: bool,

    /// Port-scan every host even when the liveness sweep marked it dead
    pub scan_all_hosts: bool,

    /// Largest accepted range
    pub max_hosts: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            port_concurrency: 20,
            host_concurrency: 50,
            credentials: None,
            intensity: Intensity::Medium,
            brand: None,
            grab_banner: true,
            auth_deadline_ms: 12_000,
            http_request_cap_ms: 2_000,
            rtsp_attempt_timeout_ms: 2_000,
            rtsp_total_budget_ms: 6_000,
            liveness_ports: camera_ports::liveness_ports(),
            include_dead_hosts: false,
            scan_all_hosts: false,
            max_hosts: 65_536,
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    /// Set the connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_port_concurrency(mut self, concurrency: usize) -> Self {
        self.port_concurrency = concurrency;
        self
    }

    pub fn with_host_concurrency(mut self, concurrency: usize) -> Self {
        self.host_concurrency = concurrency;
        self
    }

    pub fn with_auth_deadline(mut self, deadline: Duration) -> Self {
        self.auth_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_rtsp_budget(mut self, attempt: Duration, total: Duration) -> Self {
        self.rtsp_attempt_timeout_ms = attempt.as_millis() as u64;
        self.rtsp_total_budget_ms = total.as_millis() as u64;
        self
    }

    pub fn with_banner_grab(mut self, enabled: bool) -> Self {
        self.grab_banner = enabled;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn auth_deadline(&self) -> Duration {
        Duration::from_millis(self.auth_deadline_ms)
    }

    /// Per-request HTTP timeout: the connect timeout, but never above the cap.
    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.min(self.http_request_cap_ms).max(1))
    }

    pub fn rtsp_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.rtsp_attempt_timeout_ms)
    }

    pub fn rtsp_total_budget(&self) -> Duration {
        Duration::from_millis(self.rtsp_total_budget_ms)
    }

    pub fn credentials_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ScanError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: ScanConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `~/.camscan.toml`, falling back to defaults
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let config_path = home_dir.join(".camscan.toml");

        if config_path.exists() {
            match Self::from_toml_file(&config_path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", config_path.display(), e),
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_ms == 0 {
            return Err(ScanError::ConfigError("Timeout must be greater than 0".to_string()));
        }

        if self.port_concurrency == 0 || self.host_concurrency == 0 {
            return Err(ScanError::ConfigError(
                "Concurrency limits must be greater than 0".to_string(),
            ));
        }

        if self.auth_deadline_ms == 0 || self.http_request_cap_ms == 0 {
            return Err(ScanError::ConfigError(
                "Authentication deadlines must be greater than 0".to_string(),
            ));
        }

        if self.rtsp_attempt_timeout_ms == 0 || self.rtsp_attempt_timeout_ms > self.rtsp_total_budget_ms {
            return Err(ScanError::ConfigError(format!(
                "RTSP attempt timeout ({}ms) must be non-zero and within the total budget ({}ms)",
                self.rtsp_attempt_timeout_ms, self.rtsp_total_budget_ms
            )));
        }

        if let Some(creds) = &self.credentials {
            if creds.username.is_empty() {
                return Err(ScanError::ConfigError("Username cannot be empty".to_string()));
            }
        }

        if let Some(brand) = &self.brand {
            if camera_ports::brand_preset(brand).is_none() {
                return Err(ScanError::ConfigError(format!("Unknown brand preset: {}", brand)));
            }
        }

        if self.liveness_ports.is_empty() {
            return Err(ScanError::ConfigError("No liveness ports specified".to_string()));
        }

        if self.max_hosts == 0 {
            return Err(ScanError::ConfigError("max_hosts must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_bounds() {
        assert_eq!(Intensity::Basic.max_paths(), Some(10));
        assert_eq!(Intensity::Medium.max_paths(), Some(20));
        assert_eq!(Intensity::High.max_paths(), Some(30));
        assert_eq!(Intensity::Maximum.max_paths(), None);
    }

    #[test]
    fn test_intensity_parsing() {
        assert_eq!("BASIC".parse::<Intensity>().unwrap(), Intensity::Basic);
        assert_eq!("max".parse::<Intensity>().unwrap(), Intensity::Maximum);
        assert!(matches!(
            "extreme".parse::<Intensity>(),
            Err(ScanError::InvalidIntensity(_))
        ));
    }

    #[test]
    fn test_http_timeout_is_capped() {
        let config = ScanConfig::default().with_timeout(Duration::from_secs(10));
        assert_eq!(config.http_request_timeout(), Duration::from_secs(2));

        let config = ScanConfig::default().with_timeout(Duration::from_millis(500));
        assert_eq!(config.http_request_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validation() {
        assert!(ScanConfig::default().validate().is_ok());
        assert!(ScanConfig::default().with_port_concurrency(0).validate().is_err());
        assert!(ScanConfig::default().with_credentials("", "x").validate().is_err());
        assert!(ScanConfig::default().with_brand("nonexistent").validate().is_err());
        assert!(ScanConfig::default()
            .with_rtsp_budget(Duration::from_secs(7), Duration::from_secs(6))
            .validate()
            .is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
