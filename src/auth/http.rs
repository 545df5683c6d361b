//! HTTP / CGI credential tester

use crate::auth::transport::{scheme_for_port, HttpAuth, HttpProbeClient, HttpReply};
use crate::auth::{url_host, AuthOutcome, AuthTester};
use crate::camera_ports;
use crate::config::{Credentials, Intensity, ScanConfig};
use crate::error::{ProbeError, ScanError};
use crate::network::DetectionProtocol;
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Stop once this many URLs are confirmed
const MAX_VALID_URLS: usize = 3;

/// Vendor endpoints ranked by how often they answer on real devices
const CANDIDATE_PATHS: &[&str] = &[
    "/",
    "/ISAPI/System/deviceInfo",
    "/cgi-bin/magicBox.cgi?action=getDeviceType",
    "/onvif/device_service",
    "/axis-cgi/basicdeviceinfo.cgi",
    "/cgi-bin/snapshot.cgi",
    "/ISAPI/Streaming/channels/101/picture",
    "/cgi-bin/api.cgi?cmd=GetDevInfo",
    "/snapshot.jpg",
    "/cgi-bin/CGIProxy.fcgi?cmd=getDevInfo",
    "/Streaming/channels/1/picture",
    "/axis-cgi/jpg/image.cgi",
    "/cgi-bin/magicBox.cgi?action=getSystemInfo",
    "/PSIA/System/deviceInfo",
    "/image.jpg",
    "/video.cgi",
    "/videostream.cgi",
    "/snapshot.cgi",
    "/LAPI/V1.0/System/DeviceInfo",
    "/stw-cgi/system.cgi?msubmenu=deviceinfo&action=view",
    "/cgi-bin/viewer/getparam.cgi",
    "/doc/page/login.asp",
    "/web/index.html",
    "/cgi-bin/hi3510/param.cgi?cmd=getserverinfo",
    "/tmpfs/auto.jpg",
    "/img/snapshot.cgi",
    "/jpg/image.jpg",
    "/mjpg/video.mjpg",
    "/videofeed",
    "/live.sdp",
    "/cgi-bin/nphMotionJpeg",
    "/SnapshotJPEG?Resolution=640x480",
    "/cgi-bin/guest/Video.cgi?media=JPEG",
    "/goform/getDeviceInfo",
    "/api/1.1/login",
    "/images/snapshot.jpg",
    "/cgi-bin/viewer/video.jpg",
    "/admin/index.html",
];

/// Ordered, de-duplicated candidate paths bounded by `intensity`.
///
/// A known brand's paths go first.
pub fn candidate_paths(intensity: Intensity, brand: Option<&str>) -> Vec<&'static str> {
    let brand_paths = brand
        .and_then(camera_ports::brand_preset)
        .map(|preset| preset.http_paths)
        .unwrap_or(&[]);

    let mut seen = HashSet::new();
    let mut paths: Vec<&'static str> = brand_paths
        .iter()
        .chain(CANDIDATE_PATHS.iter())
        .copied()
        .filter(|path| seen.insert(*path))
        .collect();

    if let Some(limit) = intensity.max_paths() {
        paths.truncate(limit);
    }
    paths
}

/// How one candidate path answered
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathVerdict {
    Valid(&'static str),
    /// Something answered but the credentials were not what opened it
    Present(u16),
    Absent,
}

/// Tries camera CGI/ISAPI paths unauthenticated, answering a 401 with Digest, then Basic
pub struct HttpAuthTester {
    client: HttpProbeClient,
    credentials: Option<Credentials>,
    intensity: Intensity,
    brand: Option<String>,
}

impl HttpAuthTester {
    pub fn new(config: &ScanConfig) -> crate::Result<Self> {
        let client = HttpProbeClient::new(config.http_request_timeout())
            .map_err(|e| ScanError::HttpClientError(e.to_string()))?;
        Ok(Self {
            client,
            credentials: config.credentials.clone(),
            intensity: config.intensity,
            brand: config.brand.clone(),
        })
    }

    pub fn paths(&self) -> Vec<&'static str> {
        candidate_paths(self.intensity, self.brand.as_deref())
    }

    async fn check_path(&self, url: &str, outcome: &mut AuthOutcome) -> Result<PathVerdict, ProbeError> {
        let anonymous = self.client.get(url, HttpAuth::None).await?;
        note_server(&anonymous, outcome);

        if anonymous.status == 401 {
            if let Some(creds) = &self.credentials {
                if let Some(challenge) = anonymous.digest_challenge() {
                    let reply = self.client.get(url, HttpAuth::Digest(creds, &challenge)).await?;
                    if reply.is_success() {
                        return Ok(PathVerdict::Valid("HTTP Digest"));
                    }
                }

                let reply = self.client.get(url, HttpAuth::Basic(creds)).await?;
                if reply.is_success() {
                    return Ok(PathVerdict::Valid("HTTP Basic"));
                }
            }
            return Ok(PathVerdict::Present(401));
        }

        Ok(classify_anonymous(&anonymous))
    }
}

/// Verdict for a response to an unauthenticated request.
///
/// An open page proves nothing about the credentials, so it only counts as present.
fn classify_anonymous(reply: &HttpReply) -> PathVerdict {
    match reply.status {
        200..=299 | 401 | 403 => PathVerdict::Present(reply.status),
        404 if camera_ports::find_vendor_keyword(&reply.searchable_text()).is_some() => PathVerdict::Present(404),
        _ => PathVerdict::Absent,
    }
}

fn note_server(reply: &HttpReply, outcome: &mut AuthOutcome) {
    if let Some(server) = &reply.server {
        outcome.details.entry("server".to_string()).or_insert_with(|| server.clone());
    }
    if let Some(keyword) = camera_ports::find_vendor_keyword(&reply.searchable_text()) {
        outcome.details.entry("vendor_hint".to_string()).or_insert_with(|| keyword.to_string());
    }
}

fn is_open(status: u16) -> bool {
    (200..300).contains(&status)
}

fn method_rank(method: &str) -> u8 {
    match method {
        "HTTP Digest" => 2,
        "HTTP Basic" => 1,
        _ => 0,
    }
}

#[async_trait]
impl AuthTester for HttpAuthTester {
    fn protocol(&self) -> DetectionProtocol {
        DetectionProtocol::Http
    }

    fn name(&self) -> &str {
        "HTTP"
    }

    fn supported_ports(&self) -> Vec<u16> {
        (1..=u16::MAX).filter(|port| camera_ports::is_http_port(*port)).collect()
    }

    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome {
        let base = format!("{}://{}:{}", scheme_for_port(port), url_host(ip), port);
        let mut outcome = AuthOutcome::default();
        let mut method: Option<&'static str> = None;
        let mut present_status: Option<u16> = None;
        let mut last_error: Option<ProbeError> = None;

        for path in self.paths() {
            if cancel.is_cancelled() {
                last_error = Some(ProbeError::Cancelled);
                break;
            }

            let url = format!("{}{}", base, path);
            outcome.tested_urls.push(url.clone());

            match self.check_path(&url, &mut outcome).await {
                Ok(PathVerdict::Valid(found)) => {
                    log::debug!("{} valid via {}", url, found);
                    if method.map_or(true, |current| method_rank(found) > method_rank(current)) {
                        method = Some(found);
                    }
                    outcome.valid_urls.push(url);
                    if outcome.valid_urls.len() >= MAX_VALID_URLS {
                        break;
                    }
                }
                Ok(PathVerdict::Present(status)) => {
                    // a rejection says more than an open page
                    if present_status.map_or(true, |seen| is_open(seen) && !is_open(status)) {
                        present_status = Some(status);
                    }
                }
                Ok(PathVerdict::Absent) => {}
                Err(ProbeError::Http(e)) if e.is_connect() => {
                    // the port stopped accepting; remaining paths would fail the same way
                    last_error = Some(ProbeError::Connect(e.to_string()));
                    break;
                }
                Err(e) => {
                    log::debug!("{} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(method) = method {
            outcome.success = true;
            outcome.method = Some(method.to_string());
            return outcome;
        }

        outcome.error = Some(match (present_status, last_error) {
            (_, Some(ProbeError::Cancelled)) => ProbeError::Cancelled.to_string(),
            (Some(status), _) if is_open(status) => {
                format!("service present, no credential challenge (HTTP {})", status)
            }
            (Some(status), _) => format!("service present, credentials rejected (HTTP {})", status),
            (None, Some(e)) => e.to_string(),
            (None, None) => format!("no camera endpoint among {} paths", outcome.tested_urls.len()),
        });
        outcome
    }
}
