//! Vendor SDK port probe
//!
//! The proprietary protocol behind these ports is undocumented. The probe
//! sends `username:password` and treats any reply as presence, so an echo
//! service passes it too. Results from here are low confidence.

use crate::auth::{AuthOutcome, AuthTester};
use crate::camera_ports;
use crate::config::{Credentials, ScanConfig};
use crate::error::ProbeError;
use crate::network::DetectionProtocol;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const VENDOR_SDK_METHOD: &str = "VendorSDK (heuristic)";

/// Sent when there are no credentials to offer
const EMPTY_HANDSHAKE: &[u8] = b"\r\n";

/// Connects, writes `payload` and returns how many bytes came back
pub(crate) async fn sdk_exchange(addr: SocketAddr, payload: &[u8], limit: Duration) -> Result<usize, ProbeError> {
    let mut stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| ProbeError::Timeout(limit))?
        .map_err(ProbeError::from_connect)?;

    stream.write_all(payload).await?;

    let mut buf = [0u8; 256];
    let read = timeout(limit, stream.read(&mut buf))
        .await
        .map_err(|_| ProbeError::Timeout(limit))??;
    Ok(read)
}

/// `username:password`, or a bare line break without credentials
pub(crate) fn handshake(credentials: Option<&Credentials>) -> Vec<u8> {
    match credentials {
        Some(creds) => format!("{}:{}", creds.username, creds.password).into_bytes(),
        None => EMPTY_HANDSHAKE.to_vec(),
    }
}

pub struct VendorSdkTester {
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl VendorSdkTester {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            credentials: config.credentials.clone(),
            timeout: config.http_request_timeout(),
        }
    }
}

#[async_trait]
impl AuthTester for VendorSdkTester {
    fn protocol(&self) -> DetectionProtocol {
        DetectionProtocol::VendorSdk
    }

    fn name(&self) -> &str {
        "VendorSDK"
    }

    fn supported_ports(&self) -> Vec<u16> {
        (1..=u16::MAX).filter(|port| camera_ports::is_vendor_sdk_port(*port)).collect()
    }

    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome {
        let target = format!("tcp://{}", SocketAddr::new(ip, port));
        if cancel.is_cancelled() {
            return AuthOutcome::failure(ProbeError::Cancelled.to_string());
        }

        let payload = handshake(self.credentials.as_ref());

        match sdk_exchange(SocketAddr::new(ip, port), &payload, self.timeout).await {
            Ok(read) if read > 0 => {
                log::debug!("{} replied with {} bytes to the SDK handshake", target, read);
                AuthOutcome::success(VENDOR_SDK_METHOD, vec![target.clone()]).with_tested_urls(vec![target])
            }
            Ok(_) => AuthOutcome::failure("empty reply to SDK handshake").with_tested_urls(vec![target]),
            Err(e) => AuthOutcome::failure(e.to_string()).with_tested_urls(vec![target]),
        }
    }
}
