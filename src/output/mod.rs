//! Report formatting and output

use crate::discovery::{CameraSummary, HostReport, ScanReport};
use crate::utils::format_duration;
use colored::{Color, Colorize};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Cursor, Write};
use std::time::Duration;

/// Output format options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
    Xml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "xml" => Ok(OutputFormat::Xml),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub file: Option<String>,
    pub colored: bool,
    /// Also list live hosts that did not look like cameras
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            colored: true,
            verbose: false,
        }
    }
}

/// Main output manager
pub struct OutputManager {
    config: OutputConfig,
}

impl OutputManager {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Render and write to the configured file, or stdout
    pub fn write_report(&self, report: &ScanReport) -> io::Result<()> {
        let output = self.render(report)?;
        match &self.config.file {
            Some(filename) => {
                let mut file = File::create(filename)?;
                file.write_all(output.as_bytes())?;
                log::info!("Report written to {}", filename);
            }
            None => {
                let mut stdout = io::stdout().lock();
                stdout.write_all(output.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    pub fn render(&self, report: &ScanReport) -> io::Result<String> {
        match self.config.format {
            OutputFormat::Text => Ok(self.format_text(report)),
            OutputFormat::Json => format_json(report),
            OutputFormat::Csv => format_csv(report),
            OutputFormat::Xml => format_xml(report),
        }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.config.colored {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.config.colored {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn format_text(&self, report: &ScanReport) -> String {
        let stats = &report.statistics;
        let mut output = String::new();

        output.push_str(&format!(
            "\n{} {} - {} ({} hosts x {} ports) {}\n",
            self.bold("Scan"),
            report.range.start_ip,
            report.range.end_ip,
            report.range.ip_count(),
            report.range.ports.len(),
            self.paint(&stats.status.to_string(), Color::BrightBlue)
        ));
        output.push_str(&format!(
            "  {} alive, {} cameras, {} credentials confirmed in {}\n",
            stats.alive_hosts,
            stats.cameras_found,
            stats.successful_auths,
            format_duration(Duration::from_secs_f64(stats.elapsed_seconds.max(0.0)))
        ));
        if let Some(error) = &stats.error {
            output.push_str(&format!("  {} {}\n", self.paint("error:", Color::BrightRed), error));
        }
        output.push('\n');

        if report.cameras.is_empty() {
            output.push_str(&self.paint("No cameras found\n", Color::BrightYellow));
        } else {
            output.push_str(&self.paint("CAMERAS:\n", Color::BrightGreen));
            for camera in &report.cameras {
                self.write_camera(&mut output, camera);
            }
        }

        if self.config.verbose {
            let others: Vec<&HostReport> = report
                .hosts
                .iter()
                .filter(|host| !report.cameras.iter().any(|camera| camera.ip == host.ip))
                .collect();
            if !others.is_empty() {
                output.push('\n');
                output.push_str(&self.paint("OTHER HOSTS:\n", Color::BrightBlack));
                for host in others {
                    self.write_host(&mut output, host);
                }
            }
        }

        output
    }

    fn write_camera(&self, output: &mut String, camera: &CameraSummary) {
        let tier_color = match camera.confidence {
            crate::network::ConfidenceTier::High => Color::BrightGreen,
            crate::network::ConfidenceTier::Medium => Color::BrightYellow,
            crate::network::ConfidenceTier::Low => Color::White,
        };
        let protocols: Vec<&str> = camera.protocols.iter().map(|p| p.name()).collect();
        output.push_str(&format!(
            "  {:<16} [{}] {} ports {}\n",
            self.bold(&camera.ip.to_string()),
            self.paint(&camera.confidence.to_string(), tier_color),
            protocols.join(", "),
            join_ports(&camera.open_ports)
        ));
        for method in &camera.auth_methods {
            output.push_str(&format!("      auth  {}\n", self.paint(method, Color::BrightCyan)));
        }
        for url in &camera.valid_urls {
            output.push_str(&format!("      url   {}\n", url));
        }
        for key in ["manufacturer", "model", "firmware_version", "server", "vendor_hint"] {
            if let Some(value) = camera.details.get(key) {
                output.push_str(&format!("      {:<16} {}\n", key, value));
            }
        }
    }

    fn write_host(&self, output: &mut String, host: &HostReport) {
        output.push_str(&format!("  {:<16} ports {}\n", host.ip, join_ports(&host.open_ports())));
        let Some(scan) = &host.scan else { return };
        for port in scan.open_ports.iter().filter(|port| port.auth_tested) {
            let outcome = match (&port.auth_method, &port.auth_error) {
                (Some(method), _) if port.auth_success => method.clone(),
                (_, Some(error)) => error.clone(),
                _ => "not confirmed".to_string(),
            };
            output.push_str(&format!("      {}/{} {}\n", port.port, port.service_name, outcome));
        }
    }
}

fn join_ports(ports: &[u16]) -> String {
    if ports.is_empty() {
        return "-".to_string();
    }
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
}

fn format_json(report: &ScanReport) -> io::Result<String> {
    serde_json::to_string_pretty(report).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// One row per reported host
fn format_csv(report: &ScanReport) -> io::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "ip",
        "alive",
        "camera",
        "confidence",
        "protocols",
        "open_ports",
        "auth_methods",
        "valid_urls",
        "manufacturer",
        "model",
    ])?;

    for host in &report.hosts {
        let camera = report.cameras.iter().find(|camera| camera.ip == host.ip);
        let detail = |key: &str| {
            camera
                .and_then(|camera| camera.details.get(key).cloned())
                .unwrap_or_default()
        };
        writer.write_record([
            host.ip.to_string(),
            host.shows_life().to_string(),
            camera.is_some().to_string(),
            camera.map(|c| c.confidence.to_string()).unwrap_or_default(),
            camera
                .map(|c| c.protocols.iter().map(|p| p.name()).collect::<Vec<_>>().join(";"))
                .unwrap_or_default(),
            host.open_ports().iter().map(u16::to_string).collect::<Vec<_>>().join(";"),
            camera.map(|c| c.auth_methods.join(";")).unwrap_or_default(),
            camera.map(|c| c.valid_urls.join(";")).unwrap_or_default(),
            detail("manufacturer"),
            detail("model"),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn xml_error(e: quick_xml::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn format_xml(report: &ScanReport) -> io::Result<String> {
    let stats = &report.statistics;
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    let scan_id = stats.scan_id.to_string();
    let status = stats.status.to_string();
    let started = stats.started_at.to_rfc3339();
    let elapsed = format!("{:.3}", stats.elapsed_seconds);
    let mut root = BytesStart::new("camscan");
    root.push_attribute(("version", env!("CARGO_PKG_VERSION")));
    root.push_attribute(("scan_id", scan_id.as_str()));
    root.push_attribute(("status", status.as_str()));
    root.push_attribute(("started", started.as_str()));
    root.push_attribute(("elapsed", elapsed.as_str()));
    writer.write_event(Event::Start(root)).map_err(xml_error)?;

    let start = report.range.start_ip.to_string();
    let end = report.range.end_ip.to_string();
    let ports = join_ports(&report.range.ports);
    let mut range = BytesStart::new("range");
    range.push_attribute(("start", start.as_str()));
    range.push_attribute(("end", end.as_str()));
    range.push_attribute(("ports", ports.as_str()));
    writer.write_event(Event::Empty(range)).map_err(xml_error)?;

    writer
        .write_event(Event::Start(BytesStart::new("cameras")))
        .map_err(xml_error)?;
    for camera in &report.cameras {
        let ip = camera.ip.to_string();
        let confidence = camera.confidence.to_string();
        let authenticated = camera.authenticated.to_string();
        let mut element = BytesStart::new("camera");
        element.push_attribute(("ip", ip.as_str()));
        element.push_attribute(("confidence", confidence.as_str()));
        element.push_attribute(("authenticated", authenticated.as_str()));
        writer.write_event(Event::Start(element)).map_err(xml_error)?;

        for protocol in &camera.protocols {
            write_text_element(&mut writer, "protocol", protocol.name())?;
        }
        for port in &camera.open_ports {
            write_text_element(&mut writer, "port", &port.to_string())?;
        }
        for method in &camera.auth_methods {
            write_text_element(&mut writer, "auth", method)?;
        }
        for url in &camera.valid_urls {
            write_text_element(&mut writer, "url", url)?;
        }
        for (name, value) in &camera.details {
            let mut detail = BytesStart::new("detail");
            detail.push_attribute(("name", name.as_str()));
            detail.push_attribute(("value", value.as_str()));
            writer.write_event(Event::Empty(detail)).map_err(xml_error)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("camera")))
            .map_err(xml_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("cameras")))
        .map_err(xml_error)?;

    let total_hosts = stats.total_hosts.to_string();
    let alive = stats.alive_hosts.to_string();
    let cameras = stats.cameras_found.to_string();
    let open_ports = stats.open_ports.to_string();
    let auths = stats.successful_auths.to_string();
    let mut statistics = BytesStart::new("statistics");
    statistics.push_attribute(("hosts", total_hosts.as_str()));
    statistics.push_attribute(("alive", alive.as_str()));
    statistics.push_attribute(("cameras", cameras.as_str()));
    statistics.push_attribute(("open_ports", open_ports.as_str()));
    statistics.push_attribute(("successful_auths", auths.as_str()));
    writer.write_event(Event::Empty(statistics)).map_err(xml_error)?;

    writer
        .write_event(Event::End(BytesEnd::new("camscan")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> io::Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer.write_event(Event::Text(BytesText::new(text))).map_err(xml_error)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
    Ok(())
}
