//! Routes open ports to authentication testers and supervises each attempt

use crate::auth::{AuthOutcome, AuthTester, HttpAuthTester, OnvifAuthTester, RtspAuthTester, VendorSdkTester};
use crate::config::ScanConfig;
use crate::error::auth_timeout_message;
use crate::network::PortResult;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Owns the `port -> tester` table and runs one supervised attempt per open port.
///
/// The table is built once; when two testers claim a port the one registered
/// first keeps it.
pub struct ScanCoordinator {
    routes: HashMap<u16, Arc<dyn AuthTester>>,
    deadline: Duration,
    cancel: CancellationToken,
}

impl ScanCoordinator {
    /// Standard tester set in HTTP, RTSP, ONVIF, VendorSDK registration order
    pub fn from_config(config: &ScanConfig, cancel: CancellationToken) -> crate::Result<Self> {
        let testers: Vec<Arc<dyn AuthTester>> = vec![
            Arc::new(HttpAuthTester::new(config)?),
            Arc::new(RtspAuthTester::new(config)),
            Arc::new(OnvifAuthTester::new(config)?),
            Arc::new(VendorSdkTester::new(config)),
        ];
        Ok(Self::with_testers(testers, config.auth_deadline()).with_cancellation(cancel))
    }

    pub fn with_testers(testers: Vec<Arc<dyn AuthTester>>, deadline: Duration) -> Self {
        let mut routes: HashMap<u16, Arc<dyn AuthTester>> = HashMap::new();
        for tester in testers {
            for port in tester.supported_ports() {
                routes.entry(port).or_insert_with(|| Arc::clone(&tester));
            }
        }
        log::debug!("Authentication routing covers {} ports", routes.len());

        Self {
            routes,
            deadline,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn tester_for(&self, port: u16) -> Option<&Arc<dyn AuthTester>> {
        self.routes.get(&port)
    }

    /// Ports with a registered tester, ascending
    pub fn routed_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.routes.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Run the routed tester for `result.port` and record its outcome.
    ///
    /// Returns within the deadline. On overrun the tester's token is
    /// cancelled, its task aborted, and the fixed timeout message recorded.
    pub async fn test_port_authentication(&self, ip: IpAddr, result: &mut PortResult) {
        if !result.is_open {
            log::debug!("Not testing closed port {}:{}", ip, result.port);
            return;
        }

        let port = result.port;
        let tester = match self.routes.get(&port) {
            Some(tester) => Arc::clone(tester),
            None => {
                result.apply_auth(AuthOutcome::failure(format!("no authentication tester for port {}", port)));
                return;
            }
        };

        let token = self.cancel.child_token();
        let task_token = token.clone();
        let name = tester.name().to_string();
        let started = Instant::now();
        let mut handle =
            tokio::spawn(async move { tester.test_authentication(ip, port, &task_token).await });

        let outcome = match timeout(self.deadline, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                log::warn!("{} tester for {}:{} failed: {}", name, ip, port, e);
                AuthOutcome::failure(format!("{} tester failed: {}", name, e))
            }
            Err(_) => {
                token.cancel();
                handle.abort();
                log::warn!(
                    "{} tester for {}:{} exceeded its {:?} deadline",
                    name,
                    ip,
                    port,
                    self.deadline
                );
                AuthOutcome::failure(auth_timeout_message(self.deadline))
            }
        };

        log::debug!(
            "{} auth on {}:{} finished in {:?}: success={}",
            name,
            ip,
            port,
            started.elapsed(),
            outcome.success
        );
        result.apply_auth(outcome);
    }
}
