//! Camera port lists and brand presets

use crate::network::DetectionProtocol;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Known vendor with its default ports and HTTP path hints
#[derive(Debug, Clone)]
pub struct BrandPreset {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub ports: &'static [u16],
    pub http_paths: &'static [&'static str],
}

static BRAND_PRESETS: Lazy<Vec<BrandPreset>> = Lazy::new(|| {
    vec![
        BrandPreset {
            name: "hikvision",
            aliases: &["hik", "hikvision", "ezviz"],
            ports: &[80, 443, 554, 8000],
            http_paths: &[
                "/ISAPI/System/deviceInfo",
                "/ISAPI/Streaming/channels/101/picture",
                "/Streaming/channels/1/picture",
                "/PSIA/System/deviceInfo",
            ],
        },
        BrandPreset {
            name: "dahua",
            aliases: &["dahua", "lorex", "imou"],
            ports: &[80, 443, 554, 37777],
            http_paths: &[
                "/cgi-bin/magicBox.cgi?action=getDeviceType",
                "/cgi-bin/snapshot.cgi",
                "/cgi-bin/configManager.cgi?action=getConfig&name=General",
            ],
        },
        BrandPreset {
            name: "axis",
            aliases: &["axis"],
            ports: &[80, 443, 554],
            http_paths: &[
                "/axis-cgi/basicdeviceinfo.cgi",
                "/axis-cgi/param.cgi?action=list&group=Brand",
                "/axis-cgi/jpg/image.cgi",
            ],
        },
        BrandPreset {
            name: "reolink",
            aliases: &["reolink"],
            ports: &[80, 443, 554, 9000],
            http_paths: &[
                "/cgi-bin/api.cgi?cmd=GetDevInfo",
                "/cgi-bin/api.cgi?cmd=Snap&channel=0",
            ],
        },
        BrandPreset {
            name: "amcrest",
            aliases: &["amcrest"],
            ports: &[80, 443, 554, 37777],
            http_paths: &[
                "/cgi-bin/magicBox.cgi?action=getSystemInfo",
                "/cgi-bin/snapshot.cgi?channel=1",
            ],
        },
        BrandPreset {
            name: "foscam",
            aliases: &["foscam"],
            ports: &[88, 554, 443],
            http_paths: &[
                "/cgi-bin/CGIProxy.fcgi?cmd=getDevInfo",
                "/snapshot.cgi",
                "/videostream.cgi",
            ],
        },
        BrandPreset {
            name: "uniview",
            aliases: &["uniview", "unv"],
            ports: &[80, 443, 554],
            http_paths: &["/LAPI/V1.0/System/DeviceInfo", "/images/snapshot.jpg"],
        },
        BrandPreset {
            name: "hanwha",
            aliases: &["hanwha", "samsung", "wisenet"],
            ports: &[80, 443, 554, 4520],
            http_paths: &["/stw-cgi/system.cgi?msubmenu=deviceinfo&action=view"],
        },
        BrandPreset {
            name: "vivotek",
            aliases: &["vivotek"],
            ports: &[80, 443, 554],
            http_paths: &["/cgi-bin/viewer/getparam.cgi", "/cgi-bin/viewer/video.jpg"],
        },
        BrandPreset {
            name: "tapo",
            aliases: &["tapo", "tp-link", "tplink"],
            ports: &[443, 554, 2020],
            http_paths: &["/"],
        },
        BrandPreset {
            name: "ubiquiti",
            aliases: &["ubiquiti", "unifi", "ubnt"],
            ports: &[80, 443, 554, 7447],
            http_paths: &["/snap.jpeg", "/api/1.1/login"],
        },
    ]
});

/// Keywords that identify camera firmware in HTTP bodies, headers and banners
pub const VENDOR_KEYWORDS: &[&str] = &[
    "hikvision", "dahua", "axis", "reolink", "amcrest", "foscam", "uniview", "hanwha", "wisenet",
    "vivotek", "tapo", "ubiquiti", "unifi", "isapi", "dvrdvs", "webs", "netwave", "ipcam",
    "ip camera", "network camera", "nvr", "dvr", "onvif", "rtsp", "webcam", "boa/", "goahead",
];

/// One case-insensitive whole-word pattern per keyword, in keyword order
static VENDOR_KEYWORD_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    VENDOR_KEYWORDS
        .iter()
        .map(|keyword| {
            // a trailing `\b` after "boa/" would demand a word character next
            let tail = if keyword.ends_with(|c: char| c.is_alphanumeric()) { r"\b" } else { "" };
            let pattern = format!(r"(?i)\b{}{}", regex::escape(keyword), tail);
            (*keyword, Regex::new(&pattern).expect("escaped keyword is a valid pattern"))
        })
        .collect()
});

/// All brand presets
pub fn brand_presets() -> &'static [BrandPreset] {
    &BRAND_PRESETS
}

/// Look up a preset by name or alias (case-insensitive)
pub fn brand_preset(name: &str) -> Option<&'static BrandPreset> {
    let needle = name.trim().to_lowercase();
    BRAND_PRESETS
        .iter()
        .find(|preset| preset.name == needle || preset.aliases.contains(&needle.as_str()))
}

/// Union of every preset's ports plus the generic camera ports, ascending
pub fn default_camera_ports() -> Vec<u16> {
    let mut ports: BTreeSet<u16> = [80, 81, 88, 443, 554, 1935, 2020, 8000, 8080, 8443, 8554, 8899, 34567, 37777]
        .into_iter()
        .collect();
    for preset in BRAND_PRESETS.iter() {
        ports.extend(preset.ports.iter().copied());
    }
    ports.into_iter().collect()
}

/// Small port set tried by the liveness sweep
pub fn liveness_ports() -> Vec<u16> {
    vec![80, 443, 554, 8000, 8080, 37777]
}

/// First vendor keyword appearing as a whole word in `text`, if any
pub fn find_vendor_keyword(text: &str) -> Option<&'static str> {
    VENDOR_KEYWORD_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(keyword, _)| *keyword)
}

pub fn is_http_port(port: u16) -> bool {
    matches!(port, 80 | 81 | 82 | 88 | 443 | 7080 | 8080 | 8081 | 8443 | 8888 | 9000)
}

pub fn is_tls_port(port: u16) -> bool {
    matches!(port, 443 | 8443)
}

pub fn is_rtsp_port(port: u16) -> bool {
    matches!(port, 554 | 7447 | 8554 | 10554)
}

pub fn is_onvif_port(port: u16) -> bool {
    matches!(port, 2020 | 8899)
}

pub fn is_vendor_sdk_port(port: u16) -> bool {
    matches!(port, 37777 | 34567)
}

/// Service label used in `PortResult::service_name`
pub fn service_name(port: u16) -> &'static str {
    match port {
        80 => "HTTP",
        443 | 8443 => "HTTPS",
        81 | 82 | 88 | 7080 | 8080 | 8081 | 8888 | 9000 => "HTTP-Alt",
        554 => "RTSP",
        7447 | 8554 | 10554 => "RTSP-Alt",
        2020 | 8899 => "ONVIF",
        37777 => "Dahua-SDK",
        34567 => "XMeye-SDK",
        8000 => "Hikvision-SDK",
        1935 => "RTMP",
        4520 => "Wisenet-SDK",
        _ => "Unknown",
    }
}

/// Protocols the detection phase tries on a port, most specific first
pub fn detection_protocols(port: u16) -> Vec<DetectionProtocol> {
    if is_rtsp_port(port) {
        vec![DetectionProtocol::Rtsp]
    } else if is_onvif_port(port) {
        vec![DetectionProtocol::Onvif]
    } else if is_http_port(port) {
        vec![DetectionProtocol::Onvif, DetectionProtocol::Http]
    } else if is_vendor_sdk_port(port) {
        vec![DetectionProtocol::VendorSdk]
    } else {
        vec![DetectionProtocol::Generic]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_lookup_by_alias() {
        assert_eq!(brand_preset("Samsung").map(|p| p.name), Some("hanwha"));
        assert_eq!(brand_preset("hikvision").map(|p| p.name), Some("hikvision"));
        assert!(brand_preset("acme").is_none());
    }

    #[test]
    fn test_default_ports_sorted_and_unique() {
        let ports = default_camera_ports();
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        assert!(ports.contains(&554) && ports.contains(&37777) && ports.contains(&2020));
    }

    #[test]
    fn test_service_names() {
        assert_eq!(service_name(554), "RTSP");
        assert_eq!(service_name(37777), "Dahua-SDK");
        assert_eq!(service_name(12345), "Unknown");
    }

    #[test]
    fn test_vendor_keywords() {
        assert_eq!(find_vendor_keyword("<title>HIKVISION Web</title>"), Some("hikvision"));
        assert_eq!(find_vendor_keyword("plain nginx page"), None);
        assert_eq!(find_vendor_keyword("Server: Hikvision-Webs"), Some("hikvision"));
        assert_eq!(find_vendor_keyword("Server: Boa/0.94.14rc21"), Some("boa/"));
        assert_eq!(find_vendor_keyword("DVRDVS-Webs"), Some("dvrdvs"));
    }

    #[test]
    fn test_vendor_keywords_need_whole_words() {
        assert_eq!(find_vendor_keyword("Browse our websites for adverse weather news"), None);
        assert_eq!(find_vendor_keyword("404 Not Found: no nvrs or dvrs here"), None);
        assert_eq!(find_vendor_keyword("rtspserver disabled"), None);
        assert_eq!(find_vendor_keyword("embedded NVR login"), Some("nvr"));
        assert_eq!(find_vendor_keyword("GoAhead-Webs"), Some("webs"));
    }

    #[test]
    fn test_detection_protocols() {
        assert_eq!(detection_protocols(554), vec![DetectionProtocol::Rtsp]);
        assert_eq!(
            detection_protocols(80),
            vec![DetectionProtocol::Onvif, DetectionProtocol::Http]
        );
        assert_eq!(detection_protocols(22), vec![DetectionProtocol::Generic]);
    }
}
