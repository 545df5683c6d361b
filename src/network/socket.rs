//! TCP connect probing

use crate::camera_ports;
use crate::network::PortResult;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const BANNER_READ_TIMEOUT: Duration = Duration::from_secs(1);
const BANNER_MAX_BYTES: usize = 512;
const BANNER_MAX_CHARS: usize = 256;

/// Outcome of a bare connect attempt, used by the liveness sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Open(Duration),
    Refused,
    Unreachable,
}

/// TCP connect probe for a single host:port.
///
/// Never fails outward: every error becomes `is_open = false`. Not retried.
#[derive(Debug, Clone)]
pub struct PortProbe {
    timeout: Duration,
    grab_banner: bool,
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            grab_banner: true,
        }
    }

    pub fn with_banner_grab(mut self, enabled: bool) -> Self {
        self.grab_banner = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to `ip:port`, measure the latency and optionally read a banner
    pub async fn probe(&self, ip: IpAddr, port: u16) -> PortResult {
        let addr = SocketAddr::new(ip, port);
        let start = Instant::now();

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut stream)) => {
                let latency = start.elapsed();
                let banner = if self.grab_banner {
                    read_banner(&mut stream, ip, port).await
                } else {
                    None
                };
                // best effort, the socket is dropped either way
                let _ = stream.shutdown().await;
                log::debug!("{}:{} open ({:.1}ms)", ip, port, latency.as_secs_f64() * 1000.0);
                PortResult::new(port, true)
                    .with_response_time(latency)
                    .with_banner(banner)
            }
            Ok(Err(e)) => {
                log::trace!("{}:{} closed: {}", ip, port, e);
                PortResult::closed(port).with_response_time(start.elapsed())
            }
            Err(_) => {
                log::trace!("{}:{} timed out after {:?}", ip, port, self.timeout);
                PortResult::closed(port).with_response_time(start.elapsed())
            }
        }
    }

    /// Bare connect without banner grabbing; distinguishes refusal from silence
    pub async fn connect(&self, ip: IpAddr, port: u16) -> ConnectOutcome {
        let start = Instant::now();
        match timeout(self.timeout, TcpStream::connect(SocketAddr::new(ip, port))).await {
            Ok(Ok(_stream)) => ConnectOutcome::Open(start.elapsed()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
            _ => ConnectOutcome::Unreachable,
        }
    }
}

/// Read a short banner; HTTP-family ports get a minimal GET first.
async fn read_banner(stream: &mut TcpStream, ip: IpAddr, port: u16) -> Option<String> {
    if camera_ports::is_http_port(port) && !camera_ports::is_tls_port(port) {
        let request = format!("GET / HTTP/1.0\r\nHost: {}\r\n\r\n", ip);
        if stream.write_all(request.as_bytes()).await.is_err() {
            return None;
        }
    }

    let mut buf = vec![0u8; BANNER_MAX_BYTES];
    match timeout(BANNER_READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            Some(sanitize_banner(&buf))
        }
        _ => None,
    }
}

/// Lossy UTF-8 with control characters escaped, truncated to a displayable length
pub fn sanitize_banner(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    for ch in text.chars().take(BANNER_MAX_CHARS) {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push('.'),
            c => out.push(c),
        }
    }
    out
}
