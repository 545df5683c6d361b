//! Shared HTTP client for the HTTP and ONVIF testers

use crate::auth::digest::{basic_authorization, DigestChallenge};
use crate::config::Credentials;
use crate::error::ProbeError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, SERVER, WWW_AUTHENTICATE};
use reqwest::{redirect, Client, Method, Url};
use std::time::Duration;

/// Bodies beyond this are cut; camera pages that matter are small.
const MAX_BODY_BYTES: usize = 64 * 1024;

const USER_AGENT: &str = concat!("camscan/", env!("CARGO_PKG_VERSION"));

/// Authorization scheme for one request
#[derive(Debug, Clone, Copy)]
pub enum HttpAuth<'a> {
    None,
    Basic(&'a Credentials),
    Digest(&'a Credentials, &'a DigestChallenge),
}

/// The parts of an HTTP response the testers look at
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
    pub www_authenticate: Vec<String>,
    pub server: Option<String>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn digest_challenge(&self) -> Option<DigestChallenge> {
        crate::auth::digest::find_digest_challenge(self.www_authenticate.iter().map(String::as_str))
    }

    /// Body and `Server` header, for keyword matching
    pub fn searchable_text(&self) -> String {
        match &self.server {
            Some(server) => format!("{}\n{}", server, self.body),
            None => self.body.clone(),
        }
    }
}

/// reqwest client with per-request timeout, no redirects and lenient TLS
#[derive(Debug, Clone)]
pub struct HttpProbeClient {
    client: Client,
    timeout: Duration,
}

impl HttpProbeClient {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, url: &str, auth: HttpAuth<'_>) -> Result<HttpReply, ProbeError> {
        self.send(Method::GET, url, None, auth).await
    }

    /// POST a SOAP 1.2 envelope
    pub async fn post_soap(&self, url: &str, envelope: &str, auth: HttpAuth<'_>) -> Result<HttpReply, ProbeError> {
        self.send(Method::POST, url, Some(envelope.to_string()), auth).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        auth: HttpAuth<'_>,
    ) -> Result<HttpReply, ProbeError> {
        let parsed = Url::parse(url).map_err(|e| ProbeError::Protocol(format!("bad url {}: {}", url, e)))?;
        let mut request = self.client.request(method.clone(), parsed.clone());

        match auth {
            HttpAuth::None => {}
            HttpAuth::Basic(creds) => {
                request = request.header(AUTHORIZATION, basic_authorization(&creds.username, &creds.password));
            }
            HttpAuth::Digest(creds, challenge) => {
                let uri = request_uri(&parsed);
                let header = challenge.authorization(&creds.username, &creds.password, method.as_str(), &uri);
                request = request.header(AUTHORIZATION, header);
            }
        }

        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/soap+xml; charset=utf-8")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let www_authenticate = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let server = response
            .headers()
            .get(SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_BYTES)]).into_owned();

        Ok(HttpReply {
            status,
            body,
            www_authenticate,
            server,
        })
    }
}

/// Path plus query, as used in the digest `uri` field
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// `http` or `https` for a camera port
pub fn scheme_for_port(port: u16) -> &'static str {
    if crate::camera_ports::is_tls_port(port) {
        "https"
    } else {
        "http"
    }
}
