//! HTTP Basic and Digest (RFC 2617) authorization headers
//!
//! Shared by the HTTP, ONVIF and RTSP testers. Only MD5 and MD5-sess are
//! supported; cameras offering SHA-256 digest also offer MD5 in practice.

use base64::Engine;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;

static PARAM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\w+)\s*=\s*(?:"([^"]*)"|([^\s,]*))"#).expect("digest parameter regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
}

/// Parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// True when the server offered `qop=auth`
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parse a challenge header value; `None` when it is not a usable Digest challenge.
    pub fn parse(header: &str) -> Option<Self> {
        let trimmed = header.trim();
        let scheme_end = trimmed.find(char::is_whitespace)?;
        if !trimmed[..scheme_end].eq_ignore_ascii_case("digest") {
            return None;
        }

        let params: HashMap<String, String> = PARAM_RE
            .captures_iter(&trimmed[scheme_end..])
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str().to_ascii_lowercase();
                let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
                Some((key, value))
            })
            .collect();

        let algorithm = match params.get("algorithm").map(|a| a.to_ascii_lowercase()) {
            None => DigestAlgorithm::Md5,
            Some(a) if a == "md5" => DigestAlgorithm::Md5,
            Some(a) if a == "md5-sess" => DigestAlgorithm::Md5Sess,
            Some(_) => return None,
        };

        let qop_auth = params
            .get("qop")
            .map(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")))
            .unwrap_or(false);

        Some(Self {
            realm: params.get("realm").cloned().unwrap_or_default(),
            nonce: params.get("nonce")?.clone(),
            opaque: params.get("opaque").cloned(),
            algorithm,
            qop_auth,
        })
    }

    /// Compute the `response` field for the given request
    pub fn compute_response(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
        nc: &str,
    ) -> String {
        let mut ha1 = md5_hex(&format!("{}:{}:{}", username, self.realm, password));
        if self.algorithm == DigestAlgorithm::Md5Sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        if self.qop_auth {
            md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, nc, cnonce, ha2))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        }
    }

    /// Full `Authorization` header value with a fresh client nonce
    pub fn authorization(&self, username: &str, password: &str, method: &str, uri: &str) -> String {
        let cnonce = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.authorization_with_cnonce(username, password, method, uri, &cnonce)
    }

    pub(crate) fn authorization_with_cnonce(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        let nc = "00000001";
        let response = self.compute_response(username, password, method, uri, cnonce, nc);

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
            username, self.realm, self.nonce, uri, response
        );
        if self.algorithm == DigestAlgorithm::Md5Sess {
            header.push_str(", algorithm=MD5-sess");
        }
        if self.qop_auth {
            header.push_str(&format!(r#", qop=auth, nc={}, cnonce="{}""#, nc, cnonce));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        header
    }
}

/// `Authorization: Basic ...` header value
pub fn basic_authorization(username: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", token)
}

/// Find the Digest challenge among possibly several `WWW-Authenticate` values
pub fn find_digest_challenge<'a, I>(headers: I) -> Option<DigestChallenge>
where
    I: IntoIterator<Item = &'a str>,
{
    headers.into_iter().find_map(DigestChallenge::parse)
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}
