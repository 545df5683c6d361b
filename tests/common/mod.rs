//! Loopback fake servers shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use camscan::auth::{AuthOutcome, AuthTester};
use camscan::DetectionProtocol;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "12345";
pub const REALM: &str = "IP Camera";
pub const NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";

pub fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

/// A port nobody listens on
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accepts and then never says anything
pub async fn silent_server() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Silent listener reachable on every 127.x address, for multi-host ranges
pub async fn silent_server_all_loopback() -> u16 {
    let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

/// Writes `banner` on every connection and keeps it open briefly
pub async fn banner_server(banner: &'static str) -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = stream.write_all(banner.as_bytes()).await;
                tokio::time::sleep(Duration::from_millis(500)).await;
            });
        }
    });
    addr
}

/// Answers anything it reads with a short reply
pub async fn echo_server() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                if let Ok(read) = stream.read(&mut buf).await {
                    if read > 0 {
                        let _ = stream.write_all(b"\x01OK").await;
                    }
                }
            });
        }
    });
    addr
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    fn render(&self, protocol: &str) -> String {
        let mut out = format!("{} {} {}\r\n", protocol, self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
        out.push_str(&self.body);
        out
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Request> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.ok()? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(Request {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// One request per connection, answered by `handler`
pub async fn http_server<F>(handler: F) -> SocketAddr
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                if let Some(request) = read_request(&mut reader).await {
                    let response = handler(&request).header("Connection", "close");
                    let _ = reader.get_mut().write_all(response.render("HTTP/1.1").as_bytes()).await;
                    let _ = reader.get_mut().shutdown().await;
                }
            });
        }
    });
    addr
}

pub fn digest_challenge() -> String {
    format!(
        "Digest realm=\"{}\", qop=\"auth\", nonce=\"{}\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        REALM, NONCE
    )
}

static FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|([^\s,]*))"#).unwrap());

fn md5_hex(input: String) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Server-side check of an RFC 2617 `Authorization: Digest ...` header
pub fn digest_is_valid(header: &str, method: &str, target: &str, password: &str) -> bool {
    let Some(rest) = header.strip_prefix("Digest ") else {
        return false;
    };
    let fields: HashMap<String, String> = FIELD
        .captures_iter(rest)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            (caps[1].to_ascii_lowercase(), value.to_string())
        })
        .collect();
    let get = |name: &str| fields.get(name).cloned().unwrap_or_default();

    if get("username") != USERNAME || get("uri") != target || get("nonce") != NONCE {
        return false;
    }
    let ha1 = md5_hex(format!("{}:{}:{}", USERNAME, REALM, password));
    let ha2 = md5_hex(format!("{}:{}", method, target));
    let expected = if get("qop").is_empty() {
        md5_hex(format!("{}:{}:{}", ha1, NONCE, ha2))
    } else {
        md5_hex(format!("{}:{}:{}:{}:{}:{}", ha1, NONCE, get("nc"), get("cnonce"), get("qop"), ha2))
    };
    get("response") == expected
}

/// Every path wants Digest; the right password gets a camera page
pub async fn digest_http_server(password: &'static str) -> SocketAddr {
    http_server(move |request| {
        let authorised = request
            .header("authorization")
            .map_or(false, |header| digest_is_valid(header, &request.method, &request.target, password));
        if authorised {
            Response::new(200, "OK")
                .header("Server", "Hikvision-Webs")
                .body("<html><title>Network Camera</title></html>")
        } else {
            Response::new(401, "Unauthorized")
                .header("WWW-Authenticate", digest_challenge())
                .header("Server", "Hikvision-Webs")
        }
    })
    .await
}

pub const DEVICE_INFORMATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
<s:Body><tds:GetDeviceInformationResponse>
<tds:Manufacturer>Acme</tds:Manufacturer>
<tds:Model>CAM-2000</tds:Model>
<tds:FirmwareVersion>V5.4.1</tds:FirmwareVersion>
<tds:SerialNumber>SN0001</tds:SerialNumber>
<tds:HardwareId>HW1</tds:HardwareId>
</tds:GetDeviceInformationResponse></s:Body></s:Envelope>"#;

const NOT_AUTHORIZED_FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault>
<s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>ter:NotAuthorized</s:Value></s:Subcode></s:Code>
</s:Fault></s:Body></s:Envelope>"#;

/// ONVIF device service at /onvif/device_service behind Digest
pub async fn onvif_server() -> SocketAddr {
    http_server(|request| {
        if request.method != "POST" || request.target != "/onvif/device_service" {
            return Response::new(404, "Not Found");
        }
        let authorised = request
            .header("authorization")
            .map_or(false, |header| digest_is_valid(header, "POST", &request.target, PASSWORD));
        if authorised && request.body.contains("GetDeviceInformation") {
            Response::new(200, "OK")
                .header("Content-Type", "application/soap+xml")
                .body(DEVICE_INFORMATION)
        } else {
            Response::new(401, "Unauthorized")
                .header("WWW-Authenticate", digest_challenge())
                .header("Content-Type", "application/soap+xml")
                .body(NOT_AUTHORIZED_FAULT)
        }
    })
    .await
}

const SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Camera\r\na=control:*\r\n\
m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:trackID=1\r\n";

/// Scripted RTSP camera: 401 Digest, SDP, SETUP, PLAY, then one interleaved packet
pub async fn rtsp_server() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_rtsp(stream));
        }
    });
    addr
}

async fn serve_rtsp(stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    while let Some(request) = read_request(&mut reader).await {
        let cseq = request.header("cseq").unwrap_or("0").to_string();
        let response = match request.method.as_str() {
            "OPTIONS" => Response::new(200, "OK").header("Public", "DESCRIBE, SETUP, PLAY, TEARDOWN"),
            "DESCRIBE" => {
                let authorised = request
                    .header("authorization")
                    .map_or(false, |header| digest_is_valid(header, "DESCRIBE", &request.target, PASSWORD));
                if authorised {
                    let base = format!("{}/", request.target.trim_end_matches('/'));
                    Response::new(200, "OK")
                        .header("Content-Base", base)
                        .header("Content-Type", "application/sdp")
                        .body(SDP)
                } else {
                    Response::new(401, "Unauthorized").header("WWW-Authenticate", digest_challenge())
                }
            }
            "SETUP" => Response::new(200, "OK")
                .header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")
                .header("Session", "12345678;timeout=60"),
            "PLAY" => Response::new(200, "OK").header("Session", "12345678"),
            _ => Response::new(405, "Method Not Allowed"),
        }
        .header("CSeq", cseq);

        let rendered = response.render("RTSP/1.0");
        if reader.get_mut().write_all(rendered.as_bytes()).await.is_err() {
            return;
        }
        if request.method == "PLAY" {
            let _ = reader.get_mut().write_all(b"$\x00\x00\x04abcd").await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            return;
        }
    }
}

/// Routes an existing tester onto an ephemeral test port
pub struct OnPort {
    pub inner: Arc<dyn AuthTester>,
    pub port: u16,
}

#[async_trait]
impl AuthTester for OnPort {
    fn protocol(&self) -> DetectionProtocol {
        self.inner.protocol()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supported_ports(&self) -> Vec<u16> {
        vec![self.port]
    }

    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome {
        self.inner.test_authentication(ip, port, cancel).await
    }
}

/// Never answers and ignores cancellation
pub struct HangingTester {
    pub port: u16,
}

#[async_trait]
impl AuthTester for HangingTester {
    fn protocol(&self) -> DetectionProtocol {
        DetectionProtocol::Rtsp
    }

    fn name(&self) -> &str {
        "Hanging"
    }

    fn supported_ports(&self) -> Vec<u16> {
        vec![self.port]
    }

    async fn test_authentication(&self, _ip: IpAddr, _port: u16, _cancel: &CancellationToken) -> AuthOutcome {
        std::future::pending::<()>().await;
        AuthOutcome::failure("unreachable")
    }
}
