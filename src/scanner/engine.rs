//! Host port scanner: bounded probe pool plus in-task authentication

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::network::{PortProbe, PortResult};
use crate::scanner::{ScanCoordinator, ScanResult};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Emitted after each port finishes, in completion order
#[derive(Debug)]
pub struct PortProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub status: String,
    pub result: &'a PortResult,
}

/// Scans one host's port list with at most `port_concurrency` probes in flight.
///
/// Open ports go through the [`ScanCoordinator`] inside the same pool slot
/// when credentials are configured, so auth work never stacks on top of the
/// probe limit.
#[derive(Clone)]
pub struct HostScanner {
    config: ScanConfig,
    probe: PortProbe,
    coordinator: Option<Arc<ScanCoordinator>>,
    cancel: CancellationToken,
}

impl HostScanner {
    /// Create a scanner with its own cancellation token
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    pub fn with_cancellation(config: ScanConfig, cancel: CancellationToken) -> crate::Result<Self> {
        config.validate()?;
        let coordinator = if config.credentials_configured() {
            Some(Arc::new(ScanCoordinator::from_config(&config, cancel.clone())?))
        } else {
            None
        };
        Ok(Self::with_coordinator(config, coordinator, cancel))
    }

    /// Use a prepared coordinator (custom testers, shortened deadlines)
    pub fn with_coordinator(
        config: ScanConfig,
        coordinator: Option<Arc<ScanCoordinator>>,
        cancel: CancellationToken,
    ) -> Self {
        let probe = PortProbe::new(config.timeout_duration()).with_banner_grab(config.grab_banner);
        Self {
            config,
            probe,
            coordinator,
            cancel,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop dispatching new probes; in-flight ones finish or time out
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn scan_host(&self, ip: IpAddr, ports: &[u16]) -> crate::Result<ScanResult> {
        self.scan_host_with_progress(ip, ports, |_| {}).await
    }

    /// Scan `ports` on `ip`, calling `on_port` after every completed port
    pub async fn scan_host_with_progress<F>(&self, ip: IpAddr, ports: &[u16], mut on_port: F) -> crate::Result<ScanResult>
    where
        F: FnMut(PortProgress<'_>),
    {
        let ports: Vec<u16> = ports.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if ports.is_empty() {
            return Err(ScanError::PortRangeError("no ports to scan".to_string()));
        }

        let start_time = Instant::now();
        let total = ports.len();
        let limit = self.config.port_concurrency.max(1);
        let mut tasks: JoinSet<PortResult> = JoinSet::new();
        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;

        for port in ports {
            while tasks.len() >= limit {
                match tasks.join_next().await {
                    Some(joined) => self.record(joined, ip, total, &mut results, &mut on_port),
                    None => break,
                }
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let probe = self.probe.clone();
            let coordinator = self.coordinator.clone();
            tasks.spawn(async move {
                let work = async {
                    let mut result = probe.probe(ip, port).await;
                    if let Some(coordinator) = &coordinator {
                        if result.is_open {
                            coordinator.test_port_authentication(ip, &mut result).await;
                        }
                    }
                    result
                };
                match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        log::warn!("Probe task for {}:{} panicked", ip, port);
                        PortResult::closed(port)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(joined, ip, total, &mut results, &mut on_port);
        }

        let mut scan = ScanResult::from_ports(ip, results, start_time.elapsed(), self.coordinator.is_some());
        scan.cancelled = cancelled;

        log::info!(
            "{}: {} open / {} scanned in {:.2}s{}",
            ip,
            scan.open_ports.len(),
            scan.total_ports_scanned,
            scan.scan_duration_seconds,
            if scan.cancelled { " (cancelled)" } else { "" }
        );
        Ok(scan)
    }

    fn record<F>(
        &self,
        joined: Result<PortResult, tokio::task::JoinError>,
        ip: IpAddr,
        total: usize,
        results: &mut Vec<PortResult>,
        on_port: &mut F,
    ) where
        F: FnMut(PortProgress<'_>),
    {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                // tasks catch their own panics; only a runtime shutdown lands here
                log::warn!("Probe task for {} lost: {}", ip, e);
                return;
            }
        };

        results.push(result);
        let completed = results.len();
        if let Some(result) = results.last() {
            on_port(PortProgress {
                completed,
                total,
                status: describe(ip, result),
                result,
            });
        }
    }
}

fn describe(ip: IpAddr, result: &PortResult) -> String {
    if !result.is_open {
        return format!("{}:{} closed", ip, result.port);
    }
    let auth = match (result.auth_tested, result.auth_success) {
        (false, _) => String::new(),
        (true, true) => format!(", auth ok via {}", result.auth_method.as_deref().unwrap_or("?")),
        (true, false) => format!(", auth failed: {}", result.auth_error.as_deref().unwrap_or("unknown")),
    };
    format!("{}:{} open ({}{})", ip, result.port, result.service_name, auth)
}

/// Scan one host with a fresh [`HostScanner`]
pub async fn scan_host(ip: IpAddr, ports: &[u16], config: ScanConfig) -> crate::Result<ScanResult> {
    HostScanner::new(config)?.scan_host(ip, ports).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(describe(ip, &PortResult::closed(9999)), "10.0.0.5:9999 closed");

        let mut open = PortResult::new(554, true);
        assert_eq!(describe(ip, &open), "10.0.0.5:554 open (RTSP)");

        open.auth_tested = true;
        open.auth_success = true;
        open.auth_method = Some("RTSP Digest".to_string());
        assert_eq!(describe(ip, &open), "10.0.0.5:554 open (RTSP, auth ok via RTSP Digest)");
    }

    #[tokio::test]
    async fn test_empty_port_list_is_structural() {
        let scanner = HostScanner::new(ScanConfig::default()).unwrap();
        let err = scanner.scan_host("127.0.0.1".parse().unwrap(), &[]).await.unwrap_err();
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let scanner = HostScanner::new(ScanConfig::default()).unwrap();
        scanner.cancel();
        let scan = scanner.scan_host("127.0.0.1".parse().unwrap(), &[1, 2, 3]).await.unwrap();
        assert!(scan.cancelled);
        assert_eq!(scan.total_ports_scanned, 0);
    }
}
