//! Unauthenticated protocol detection on open ports

use crate::auth::onvif::{self, GET_SYSTEM_DATE_AND_TIME};
use crate::auth::transport::{scheme_for_port, HttpAuth, HttpProbeClient};
use crate::auth::vendor;
use crate::camera_ports;
use crate::config::ScanConfig;
use crate::discovery::DetectionResult;
use crate::error::{ProbeError, ScanError};
use crate::network::socket::sanitize_banner;
use crate::network::DetectionProtocol;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Runs the protocol probes a port's number suggests
#[derive(Debug, Clone)]
pub struct ProtocolDetector {
    client: HttpProbeClient,
    timeout: Duration,
}

impl ProtocolDetector {
    pub fn new(config: &ScanConfig) -> crate::Result<Self> {
        let timeout = config.http_request_timeout();
        let client = HttpProbeClient::new(timeout).map_err(|e| ScanError::HttpClientError(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub async fn detect(&self, ip: IpAddr, port: u16, protocol: DetectionProtocol) -> DetectionResult {
        let start = Instant::now();
        let outcome = match protocol {
            DetectionProtocol::Rtsp => self.detect_rtsp(ip, port).await,
            DetectionProtocol::Onvif => self.detect_onvif(ip, port).await,
            DetectionProtocol::Http => self.detect_http(ip, port).await,
            DetectionProtocol::VendorSdk => self.detect_vendor_sdk(ip, port).await,
            DetectionProtocol::Generic => self.detect_generic(ip, port).await,
        };

        let mut result = DetectionResult::new(ip, port, protocol);
        result.response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok((detected, details)) => {
                result.detected = detected;
                result.details = details;
            }
            Err(e) => result.error_message = Some(e.to_string()),
        }
        result
    }

    async fn connect(&self, ip: IpAddr, port: u16) -> Result<TcpStream, ProbeError> {
        timeout(self.timeout, TcpStream::connect(SocketAddr::new(ip, port)))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(ProbeError::from_connect)
    }

    async fn read_some(&self, stream: &mut TcpStream, limit: usize) -> Result<Vec<u8>, ProbeError> {
        let mut buf = vec![0u8; limit];
        let read = timeout(self.timeout, stream.read(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        buf.truncate(read);
        Ok(buf)
    }

    /// RTSP OPTIONS; any RTSP status line counts, 401 included
    async fn detect_rtsp(&self, ip: IpAddr, port: u16) -> Result<(bool, BTreeMap<String, String>), ProbeError> {
        let mut stream = self.connect(ip, port).await?;
        let request = format!(
            "OPTIONS rtsp://{}:{}/ RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: camscan\r\n\r\n",
            crate::auth::url_host(ip),
            port
        );
        stream.write_all(request.as_bytes()).await?;
        let reply = self.read_some(&mut stream, 2048).await?;
        let text = String::from_utf8_lossy(&reply);

        let mut details = BTreeMap::new();
        let status_line = text.lines().next().unwrap_or_default();
        if !status_line.starts_with("RTSP/") {
            return Ok((false, details));
        }
        details.insert("status".to_string(), status_line.trim().to_string());
        for line in text.lines().skip(1) {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "server" => details.insert("server".to_string(), value.trim().to_string()),
                    "public" => details.insert("methods".to_string(), value.trim().to_string()),
                    _ => None,
                };
            }
        }
        if status_line.contains(" 401") {
            details.insert("auth_required".to_string(), "true".to_string());
        }
        Ok((true, details))
    }

    /// GetSystemDateAndTime needs no credentials on conforming devices
    async fn detect_onvif(&self, ip: IpAddr, port: u16) -> Result<(bool, BTreeMap<String, String>), ProbeError> {
        let envelope = onvif::soap_envelope(GET_SYSTEM_DATE_AND_TIME);
        let base = format!("{}://{}:{}", scheme_for_port(port), crate::auth::url_host(ip), port);
        let mut last_error = None;

        for path in onvif::DEVICE_SERVICE_PATHS {
            let url = format!("{}{}", base, path);
            match self.client.post_soap(&url, &envelope, HttpAuth::None).await {
                Ok(reply) if onvif::is_onvif_response(&reply.body) => {
                    let mut details = BTreeMap::new();
                    details.insert("endpoint".to_string(), url);
                    details.insert("status".to_string(), reply.status.to_string());
                    return Ok((true, details));
                }
                Ok(_) => {}
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok((false, BTreeMap::new())),
        }
    }

    /// Camera keywords in the landing page, `Server` header or auth realm
    async fn detect_http(&self, ip: IpAddr, port: u16) -> Result<(bool, BTreeMap<String, String>), ProbeError> {
        let url = format!("{}://{}:{}/", scheme_for_port(port), crate::auth::url_host(ip), port);
        let reply = self.client.get(&url, HttpAuth::None).await?;

        let mut details = BTreeMap::new();
        details.insert("status".to_string(), reply.status.to_string());
        if let Some(server) = &reply.server {
            details.insert("server".to_string(), server.clone());
        }

        let mut haystack = reply.searchable_text();
        for challenge in &reply.www_authenticate {
            haystack.push('\n');
            haystack.push_str(challenge);
        }
        let keyword = camera_ports::find_vendor_keyword(&haystack);
        if let Some(keyword) = keyword {
            details.insert("vendor_hint".to_string(), keyword.to_string());
        }
        Ok((keyword.is_some(), details))
    }

    /// Any reply to the SDK handshake; see the vendor tester for why this stays heuristic
    async fn detect_vendor_sdk(&self, ip: IpAddr, port: u16) -> Result<(bool, BTreeMap<String, String>), ProbeError> {
        let read = vendor::sdk_exchange(SocketAddr::new(ip, port), &vendor::handshake(None), self.timeout).await?;
        let mut details = BTreeMap::new();
        details.insert("service".to_string(), camera_ports::service_name(port).to_string());
        if read == 0 {
            return Ok((false, details));
        }
        details.insert("heuristic".to_string(), "true".to_string());
        details.insert("reply_bytes".to_string(), read.to_string());
        Ok((true, details))
    }

    /// Passive banner read, matched against vendor keywords
    async fn detect_generic(&self, ip: IpAddr, port: u16) -> Result<(bool, BTreeMap<String, String>), ProbeError> {
        let mut stream = self.connect(ip, port).await?;
        let mut details = BTreeMap::new();
        let banner = match self.read_some(&mut stream, 512).await {
            Ok(bytes) if !bytes.is_empty() => sanitize_banner(&bytes),
            _ => return Ok((false, details)),
        };
        let keyword = camera_ports::find_vendor_keyword(&banner);
        details.insert("banner".to_string(), banner);
        if let Some(keyword) = keyword {
            details.insert("vendor_hint".to_string(), keyword.to_string());
        }
        Ok((keyword.is_some(), details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn detector() -> ProtocolDetector {
        ProtocolDetector::new(&ScanConfig::default().with_timeout(Duration::from_millis(300))).unwrap()
    }

    #[tokio::test]
    async fn test_silent_sdk_port_is_not_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let result = detector().detect("127.0.0.1".parse().unwrap(), port, DetectionProtocol::VendorSdk).await;
        assert!(!result.detected);
        assert!(!result.is_successful());
        assert!(result.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_closed_without_reply_is_not_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let result = detector().detect("127.0.0.1".parse().unwrap(), port, DetectionProtocol::VendorSdk).await;
        assert!(!result.detected);
        assert!(!result.details.contains_key("heuristic"));
    }

    #[tokio::test]
    async fn test_replying_sdk_port_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                if stream.read(&mut buf).await.is_ok() {
                    let _ = stream.write_all(b"\x00\x01ok").await;
                }
            }
        });

        let result = detector().detect("127.0.0.1".parse().unwrap(), port, DetectionProtocol::VendorSdk).await;
        assert!(result.detected, "{:?}", result.error_message);
        assert_eq!(result.details.get("heuristic").map(String::as_str), Some("true"));
        assert_eq!(result.details.get("reply_bytes").map(String::as_str), Some("4"));
    }
}
