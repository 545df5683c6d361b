//! ONVIF device-service tester and SOAP helpers

use crate::auth::transport::{scheme_for_port, HttpAuth, HttpProbeClient, HttpReply};
use crate::auth::{url_host, AuthOutcome, AuthTester};
use crate::camera_ports;
use crate::config::{Credentials, ScanConfig};
use crate::error::{ProbeError, ScanError};
use crate::network::DetectionProtocol;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Standard device-service endpoints
pub const DEVICE_SERVICE_PATHS: &[&str] = &["/onvif/device_service", "/onvif/device", "/onvif/services"];

pub const GET_DEVICE_INFORMATION: &str = r#"<GetDeviceInformation xmlns="http://www.onvif.org/ver10/device/wsdl"/>"#;

/// Answered without authentication by conforming devices
pub const GET_SYSTEM_DATE_AND_TIME: &str = r#"<GetSystemDateAndTime xmlns="http://www.onvif.org/ver10/device/wsdl"/>"#;

/// Device-information elements copied into the outcome details
const DEVICE_FIELDS: &[(&str, &str)] = &[
    ("Manufacturer", "manufacturer"),
    ("Model", "model"),
    ("FirmwareVersion", "firmware_version"),
    ("SerialNumber", "serial_number"),
    ("HardwareId", "hardware_id"),
];

/// Wrap a request body in a SOAP 1.2 envelope
pub fn soap_envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">"#,
            "<s:Body>{}</s:Body></s:Envelope>"
        ),
        body
    )
}

/// True when the body looks like a SOAP/ONVIF answer, faults included
pub fn is_onvif_response(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["soap-envelope", "<soap:envelope", ":envelope", "onvif.org", "<env:envelope"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// SOAP fault carrying an ONVIF authorization error
pub fn is_not_authorized_fault(body: &str) -> bool {
    body.contains("NotAuthorized") || body.contains("Sender not Authorized")
}

/// Extract the GetDeviceInformation fields, keyed in snake_case
pub fn parse_device_information(xml: &str) -> BTreeMap<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut details = BTreeMap::new();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let local = element.local_name();
                current = DEVICE_FIELDS
                    .iter()
                    .find(|(tag, _)| tag.as_bytes() == local.as_ref())
                    .map(|(_, key)| *key);
            }
            Ok(Event::Text(text)) => {
                if let Some(key) = current.take() {
                    if let Ok(value) = text.unescape() {
                        if !value.is_empty() {
                            details.insert(key.to_string(), value.into_owned());
                        }
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("stopped parsing device information: {}", e);
                break;
            }
            _ => {}
        }
    }

    details
}

/// Posts GetDeviceInformation with Digest, then Basic
pub struct OnvifAuthTester {
    client: HttpProbeClient,
    credentials: Option<Credentials>,
}

impl OnvifAuthTester {
    pub fn new(config: &ScanConfig) -> crate::Result<Self> {
        let client = HttpProbeClient::new(config.http_request_timeout())
            .map_err(|e| ScanError::HttpClientError(e.to_string()))?;
        Ok(Self {
            client,
            credentials: config.credentials.clone(),
        })
    }

    /// Try one endpoint; `Ok(Some(..))` carries the method and reply that got through
    async fn try_endpoint(
        &self,
        url: &str,
        envelope: &str,
        seen_service: &mut Option<u16>,
    ) -> Result<Option<(&'static str, HttpReply)>, ProbeError> {
        let anonymous = self.client.post_soap(url, envelope, HttpAuth::None).await?;
        if is_onvif_response(&anonymous.body) {
            seen_service.get_or_insert(anonymous.status);
        }
        if authorised(&anonymous) {
            return Ok(Some(("ONVIF (no auth)", anonymous)));
        }

        let creds = match &self.credentials {
            Some(creds) => creds,
            None => return Ok(None),
        };

        if let Some(challenge) = anonymous.digest_challenge() {
            let reply = self.client.post_soap(url, envelope, HttpAuth::Digest(creds, &challenge)).await?;
            if is_onvif_response(&reply.body) {
                seen_service.get_or_insert(reply.status);
            }
            if authorised(&reply) {
                return Ok(Some(("ONVIF Digest", reply)));
            }
        }

        let reply = self.client.post_soap(url, envelope, HttpAuth::Basic(creds)).await?;
        if is_onvif_response(&reply.body) {
            seen_service.get_or_insert(reply.status);
        }
        if authorised(&reply) {
            return Ok(Some(("ONVIF Basic", reply)));
        }

        if anonymous.status == 401 {
            seen_service.get_or_insert(401);
        }
        Ok(None)
    }
}

fn authorised(reply: &HttpReply) -> bool {
    reply.is_success() && is_onvif_response(&reply.body) && !is_not_authorized_fault(&reply.body)
}

#[async_trait]
impl AuthTester for OnvifAuthTester {
    fn protocol(&self) -> DetectionProtocol {
        DetectionProtocol::Onvif
    }

    fn name(&self) -> &str {
        "ONVIF"
    }

    fn supported_ports(&self) -> Vec<u16> {
        (1..=u16::MAX).filter(|port| camera_ports::is_onvif_port(*port)).collect()
    }

    async fn test_authentication(&self, ip: IpAddr, port: u16, cancel: &CancellationToken) -> AuthOutcome {
        let envelope = soap_envelope(GET_DEVICE_INFORMATION);
        let base = format!("{}://{}:{}", scheme_for_port(port), url_host(ip), port);
        let mut tested_urls = Vec::new();
        let mut seen_service: Option<u16> = None;
        let mut last_error: Option<ProbeError> = None;

        for path in DEVICE_SERVICE_PATHS {
            if cancel.is_cancelled() {
                last_error = Some(ProbeError::Cancelled);
                break;
            }

            let url = format!("{}{}", base, path);
            tested_urls.push(url.clone());

            match self.try_endpoint(&url, &envelope, &mut seen_service).await {
                Ok(Some((method, reply))) => {
                    let mut outcome = AuthOutcome::success(method, vec![url]).with_tested_urls(tested_urls);
                    outcome.details = parse_device_information(&reply.body);
                    log::debug!("ONVIF {}:{} answered via {}", ip, port, method);
                    return outcome;
                }
                Ok(None) => {}
                Err(ProbeError::Http(e)) if e.is_connect() => {
                    last_error = Some(ProbeError::Connect(e.to_string()));
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }

        let error = match (seen_service, last_error) {
            (_, Some(ProbeError::Cancelled)) => ProbeError::Cancelled.to_string(),
            (Some(status), _) => format!("ONVIF service present, credentials rejected (HTTP {})", status),
            (None, Some(e)) => e.to_string(),
            (None, None) => "no ONVIF device service found".to_string(),
        };
        AuthOutcome::failure(error).with_tested_urls(tested_urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_ports_leave_web_ports_to_http() {
        let tester = OnvifAuthTester::new(&ScanConfig::default()).unwrap();
        assert_eq!(tester.supported_ports(), vec![2020, 8899]);
    }

    const DEVICE_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
  <SOAP-ENV:Body>
    <tds:GetDeviceInformationResponse>
      <tds:Manufacturer>HIKVISION</tds:Manufacturer>
      <tds:Model>DS-2CD2042WD-I</tds:Model>
      <tds:FirmwareVersion>V5.4.5 build 170124</tds:FirmwareVersion>
      <tds:SerialNumber>DS-2CD2042WD-I20170101AAWR123456789</tds:SerialNumber>
      <tds:HardwareId>88</tds:HardwareId>
    </tds:GetDeviceInformationResponse>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn test_parse_device_information() {
        let details = parse_device_information(DEVICE_INFO);
        assert_eq!(details.get("manufacturer").map(String::as_str), Some("HIKVISION"));
        assert_eq!(details.get("model").map(String::as_str), Some("DS-2CD2042WD-I"));
        assert_eq!(details.get("firmware_version").map(String::as_str), Some("V5.4.5 build 170124"));
        assert_eq!(details.len(), 5);
    }

    #[test]
    fn test_markers() {
        assert!(is_onvif_response(DEVICE_INFO));
        assert!(is_onvif_response(
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault/></env:Body></env:Envelope>"#
        ));
        assert!(!is_onvif_response("<html><body>login</body></html>"));
        assert!(is_not_authorized_fault("<env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode>"));
    }

    #[test]
    fn test_envelope_wraps_body() {
        let envelope = soap_envelope(GET_SYSTEM_DATE_AND_TIME);
        assert!(envelope.starts_with("<?xml"));
        assert!(envelope.contains("<s:Body><GetSystemDateAndTime"));
        assert!(is_onvif_response(&envelope));
    }

    #[test]
    fn test_garbage_yields_no_details() {
        assert!(parse_device_information("not xml at all <<<").is_empty());
    }
}
