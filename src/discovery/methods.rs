//! Liveness sweep over TCP
//!
//! Unprivileged, so no ICMP: a host is alive when any liveness port either
//! accepts a connection or actively refuses it.

use crate::network::socket::{ConnectOutcome, PortProbe};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Outcome of checking one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub ip: IpAddr,
    pub is_alive: bool,
    pub response_time_ms: Option<f64>,
    /// `tcp-connect`, `tcp-refused` or `none`
    pub method_used: String,
    pub port: Option<u16>,
}

impl LivenessResult {
    fn dead(ip: IpAddr) -> Self {
        Self {
            ip,
            is_alive: false,
            response_time_ms: None,
            method_used: "none".to_string(),
            port: None,
        }
    }
}

/// TCP connect liveness check over a small port set, all ports in parallel
#[derive(Debug, Clone)]
pub struct TcpLiveness {
    ports: Vec<u16>,
    probe: PortProbe,
}

impl TcpLiveness {
    pub fn new(ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            ports,
            probe: PortProbe::new(timeout).with_banner_grab(false),
        }
    }

    /// First accepting or refusing port wins; the rest are dropped
    pub async fn check(&self, ip: IpAddr) -> LivenessResult {
        let start = Instant::now();
        let mut attempts: FuturesUnordered<_> = self
            .ports
            .iter()
            .map(|&port| {
                let probe = &self.probe;
                async move { (port, probe.connect(ip, port).await) }
            })
            .collect();

        while let Some((port, outcome)) = attempts.next().await {
            let method = match outcome {
                ConnectOutcome::Open(_) => "tcp-connect",
                ConnectOutcome::Refused => "tcp-refused",
                ConnectOutcome::Unreachable => continue,
            };
            log::debug!("{} alive via {} on port {}", ip, method, port);
            return LivenessResult {
                ip,
                is_alive: true,
                response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                method_used: method.to_string(),
                port: Some(port),
            };
        }

        LivenessResult::dead(ip)
    }
}
