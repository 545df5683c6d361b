//! RTSP credential tester
//!
//! A URL counts as valid only once a stream has been opened and one
//! interleaved media packet has been read from it. The handshake sits behind
//! [`StreamOpener`] so the tester's time budget can be exercised without a
//! real camera.

use crate::auth::digest::{basic_authorization, DigestChallenge};
use crate::auth::{url_host, AuthOutcome, AuthTester};
use crate::camera_ports;
use crate::config::{Credentials, ScanConfig};
use crate::error::ProbeError;
use crate::network::DetectionProtocol;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Common stream paths across vendors, most common first
const RTSP_PATHS: &[&str] = &[
    "/",
    "/Streaming/Channels/101",
    "/cam/realmonitor?channel=1&subtype=0",
    "/stream1",
    "/h264Preview_01_main",
    "/live/ch00_0",
    "/live",
    "/videoMain",
    "/h264",
    "/11",
];

/// Bytes skipped while waiting for the first interleaved packet
const MAX_SKIP_BYTES: usize = 64 * 1024;

const USER_AGENT: &str = concat!("camscan/", env!("CARGO_PKG_VERSION"));

/// Proof that a stream delivered media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub method: String,
    pub channel: u8,
    pub bytes: usize,
}

/// Opens a stream and reads one packet from it
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open_and_read(
        &self,
        addr: SocketAddr,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<FrameInfo, ProbeError>;
}

/// DESCRIBE / SETUP / PLAY over TCP-interleaved transport
#[derive(Debug, Clone, Default)]
pub struct RtspHandshake;

#[async_trait]
impl StreamOpener for RtspHandshake {
    async fn open_and_read(
        &self,
        addr: SocketAddr,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<FrameInfo, ProbeError> {
        let stream = TcpStream::connect(addr).await.map_err(ProbeError::from_connect)?;
        let mut session = RtspSession::new(stream, credentials);

        let describe = session.describe(url).await?;
        let base = describe
            .header("content-base")
            .map(str::to_string)
            .unwrap_or_else(|| url.to_string());
        let control = video_control(&describe.body).unwrap_or_else(|| "*".to_string());
        let track = resolve_control(&base, &control);

        let setup = session
            .request("SETUP", &track, &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1".to_string())])
            .await?;
        expect_ok("SETUP", &setup)?;
        let session_id = setup
            .header("session")
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .ok_or_else(|| ProbeError::Protocol("SETUP response without Session".to_string()))?;
        session.session_id = Some(session_id);

        let play = session
            .request("PLAY", &base, &[("Range", "npt=0.000-".to_string())])
            .await?;
        expect_ok("PLAY", &play)?;

        let (channel, bytes) = session.read_interleaved().await?;
        Ok(FrameInfo {
            method: session.auth_method().to_string(),
            channel,
            bytes,
        })
    }
}

#[derive(Debug, Clone)]
struct RtspResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl RtspResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

enum RtspAuth {
    None,
    Basic,
    Digest(DigestChallenge),
}

struct RtspSession<'a> {
    stream: BufReader<TcpStream>,
    credentials: Option<&'a Credentials>,
    auth: RtspAuth,
    cseq: u32,
    session_id: Option<String>,
}

impl<'a> RtspSession<'a> {
    fn new(stream: TcpStream, credentials: Option<&'a Credentials>) -> Self {
        Self {
            stream: BufReader::new(stream),
            credentials,
            auth: RtspAuth::None,
            cseq: 0,
            session_id: None,
        }
    }

    fn auth_method(&self) -> &'static str {
        match self.auth {
            RtspAuth::None => "RTSP (no auth)",
            RtspAuth::Basic => "RTSP Basic",
            RtspAuth::Digest(_) => "RTSP Digest",
        }
    }

    /// DESCRIBE, answering one 401 challenge with the configured credentials
    async fn describe(&mut self, url: &str) -> Result<RtspResponse, ProbeError> {
        let accept = [("Accept", "application/sdp".to_string())];
        let mut response = self.request("DESCRIBE", url, &accept).await?;

        if response.status == 401 {
            if self.credentials.is_none() {
                return Err(ProbeError::AuthRejected("RTSP 401, no credentials".to_string()));
            }
            self.auth = match crate::auth::digest::find_digest_challenge(response.headers_named("www-authenticate")) {
                Some(challenge) => RtspAuth::Digest(challenge),
                None => RtspAuth::Basic,
            };
            response = self.request("DESCRIBE", url, &accept).await?;
            if response.status == 401 {
                return Err(ProbeError::AuthRejected("RTSP 401".to_string()));
            }
        }

        expect_ok("DESCRIBE", &response)?;
        Ok(response)
    }

    async fn request(
        &mut self,
        method: &str,
        url: &str,
        extra: &[(&str, String)],
    ) -> Result<RtspResponse, ProbeError> {
        self.cseq += 1;
        let mut request = format!(
            "{} {} RTSP/1.0\r\nCSeq: {}\r\nUser-Agent: {}\r\n",
            method, url, self.cseq, USER_AGENT
        );
        for (name, value) in extra {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(session) = &self.session_id {
            request.push_str(&format!("Session: {}\r\n", session));
        }
        if let Some(authorization) = self.authorization(method, url) {
            request.push_str(&format!("Authorization: {}\r\n", authorization));
        }
        request.push_str("\r\n");

        self.stream.get_mut().write_all(request.as_bytes()).await?;
        self.read_response().await
    }

    fn authorization(&self, method: &str, url: &str) -> Option<String> {
        let creds = self.credentials?;
        match &self.auth {
            RtspAuth::None => None,
            RtspAuth::Basic => Some(basic_authorization(&creds.username, &creds.password)),
            RtspAuth::Digest(challenge) => {
                Some(challenge.authorization(&creds.username, &creds.password, method, url))
            }
        }
    }

    async fn read_response(&mut self) -> Result<RtspResponse, ProbeError> {
        let mut status_line = String::new();
        if self.stream.read_line(&mut status_line).await? == 0 {
            return Err(ProbeError::Protocol("connection closed before response".to_string()));
        }
        let status = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0)
            .min(MAX_SKIP_BYTES);
        let mut body = vec![0u8; length];
        self.stream.read_exact(&mut body).await?;

        Ok(RtspResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Skip to the next `$` frame and read it whole
    async fn read_interleaved(&mut self) -> Result<(u8, usize), ProbeError> {
        let mut skipped = 0usize;
        loop {
            let byte = self.stream.read_u8().await?;
            if byte == b'$' {
                break;
            }
            skipped += 1;
            if skipped > MAX_SKIP_BYTES {
                return Err(ProbeError::Protocol("no interleaved media after PLAY".to_string()));
            }
        }

        let channel = self.stream.read_u8().await?;
        let length = self.stream.read_u16().await? as usize;
        let mut payload = vec![0u8; length];
        self.stream.read_exact(&mut payload).await?;
        Ok((channel, length))
    }
}

fn parse_status_line(line: &str) -> Result<u16, ProbeError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("RTSP/") => code
            .parse()
            .map_err(|_| ProbeError::Protocol(format!("bad status line: {}", line.trim()))),
        _ => Err(ProbeError::Protocol(format!("not an RTSP response: {}", line.trim()))),
    }
}

fn expect_ok(method: &str, response: &RtspResponse) -> Result<(), ProbeError> {
    match response.status {
        200..=299 => Ok(()),
        401 | 403 => Err(ProbeError::AuthRejected(format!("RTSP {} on {}", response.status, method))),
        status => Err(ProbeError::Protocol(format!("{} returned {}", method, status))),
    }
}

/// `a=control` of the first video media section, or the session-level one
fn video_control(sdp: &str) -> Option<String> {
    let mut session_control = None;
    let mut in_video = false;
    let mut seen_media = false;

    for line in sdp.lines().map(str::trim) {
        if let Some(media) = line.strip_prefix("m=") {
            seen_media = true;
            in_video = media.starts_with("video");
        } else if let Some(control) = line.strip_prefix("a=control:") {
            if in_video {
                return Some(control.trim().to_string());
            }
            if !seen_media {
                session_control = Some(control.trim().to_string());
            }
        }
    }
    session_control
}

fn resolve_control(base: &str, control: &str) -> String {
    if control.starts_with("rtsp://") || control.starts_with("rtsps://") {
        control.to_string()
    } else if control == "*" || control.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), control.trim_start_matches('/'))
    }
}

/// Walks the stream path list within a per-attempt timeout and a total budget
pub struct RtspAuthTester {
    opener: Arc<dyn StreamOpener>,
    credentials: Option<Credentials>,
    attempt_timeout: Duration,
    total_budget: Duration,
}

impl RtspAuthTester {
    pub fn new(config: &ScanConfig) -> Self {
        Self::with_opener(config, Arc::new(RtspHandshake))
    }

    pub fn with_opener(config: &ScanConfig, opener: Arc<dyn StreamOpener>) -> Self {
        Self {
            opener,
            credentials: config.credentials.clone(),
            attempt_timeout: config.rtsp_attempt_timeout(),
            total_budget: config.rtsp_total_budget(),
        }
    }

    pub fn paths(&self) -> &'static [&'static str] {
        RTSP_PATHS
    }
}

#[async_trait]
impl AuthTester for RtspAuthTester {
    fn protocol(&self) -> DetectionProtocol {
        DetectionProtocol::Rtsp
    }

    fn name(&self) -> &str {
        "RTSP"
    }

    fn supported_ports(&self) -> Vec<u16> {
        (1..=u16::MAX).filter(|port| camera_ports::is_rtsp_port(*port)).collect()
    }

    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome {
        let addr = SocketAddr::new(ip, port);
        let started = Instant::now();
        let mut tested_urls = Vec::new();
        let mut last_error: Option<ProbeError> = None;
        let mut budget_spent = false;

        for path in RTSP_PATHS {
            if cancel.is_cancelled() {
                last_error = Some(ProbeError::Cancelled);
                break;
            }

            let remaining = self.total_budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                budget_spent = true;
                break;
            }
            let attempt = self.attempt_timeout.min(remaining);

            // credentials travel separately so no password ever lands in a URL
            let url = format!("rtsp://{}:{}{}", url_host(ip), port, path);
            tested_urls.push(url.clone());

            let opened = tokio::select! {
                _ = cancel.cancelled() => {
                    last_error = Some(ProbeError::Cancelled);
                    break;
                }
                opened = tokio::time::timeout(
                    attempt,
                    self.opener.open_and_read(addr, &url, self.credentials.as_ref()),
                ) => opened,
            };

            match opened {
                Ok(Ok(frame)) => {
                    log::debug!("{} delivered {} bytes on channel {}", url, frame.bytes, frame.channel);
                    return AuthOutcome::success(frame.method, vec![url]).with_tested_urls(tested_urls);
                }
                Ok(Err(e @ (ProbeError::Refused | ProbeError::Connect(_)))) => {
                    last_error = Some(e);
                    break;
                }
                Ok(Err(e)) => {
                    log::debug!("{} failed: {}", url, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    log::debug!("{} gave no frame within {:?}", url, attempt);
                    last_error = Some(ProbeError::Timeout(attempt));
                }
            }
        }

        if started.elapsed() >= self.total_budget {
            budget_spent = true;
        }

        let error = match last_error {
            Some(ProbeError::Cancelled) => ProbeError::Cancelled.to_string(),
            _ if budget_spent => format!(
                "rtsp timeout: {:?} budget exhausted after {} urls",
                self.total_budget,
                tested_urls.len()
            ),
            Some(e) => e.to_string(),
            None => "no stream path answered".to_string(),
        };
        AuthOutcome::failure(error).with_tested_urls(tested_urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDP: &str = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=Media\r\na=control:*\r\n\
m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=1\r\n\
m=audio 0 RTP/AVP 8\r\na=control:trackID=2\r\n";

    #[test]
    fn test_video_control_prefers_video_track() {
        assert_eq!(video_control(SDP).as_deref(), Some("trackID=1"));
        assert_eq!(video_control("v=0\r\na=control:*\r\n").as_deref(), Some("*"));
        assert_eq!(video_control("v=0\r\n"), None);
    }

    #[test]
    fn test_resolve_control() {
        let base = "rtsp://10.0.0.5:554/stream1/";
        assert_eq!(resolve_control(base, "trackID=1"), "rtsp://10.0.0.5:554/stream1/trackID=1");
        assert_eq!(resolve_control(base, "*"), base);
        assert_eq!(
            resolve_control(base, "rtsp://10.0.0.5:554/other"),
            "rtsp://10.0.0.5:554/other"
        );
    }

    #[test]
    fn test_status_line() {
        assert_eq!(parse_status_line("RTSP/1.0 401 Unauthorized\r\n").unwrap(), 401);
        assert!(parse_status_line("HTTP/1.1 200 OK\r\n").is_err());
        assert!(parse_status_line("").is_err());
    }

    #[test]
    fn test_supported_ports() {
        let tester = RtspAuthTester::new(&ScanConfig::default());
        assert_eq!(tester.supported_ports(), vec![554, 7447, 8554, 10554]);
        assert_eq!(tester.paths().len(), 10);
    }
}
