use clap::{Arg, ArgAction, ArgMatches, Command};
use std::process;
use std::time::Duration;

use anyhow::Context;
use camscan::{
    camera_ports,
    config::{Credentials, Intensity, ScanConfig},
    discovery::{ScanMethod, ScanOrchestrator, ScanRange, ScanStatus},
    output::{OutputConfig, OutputFormat, OutputManager},
    utils::{address_parser, Logger},
};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

// Ulimit adjustment for Unix systems
#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            eprintln!(
                "{} {}",
                "[~] Automatically increasing ulimit value to".bright_blue(),
                limit.to_string().bright_cyan().bold()
            );
        } else {
            eprintln!("{}", "[!] ERROR: Failed to set ulimit value.".bright_red());
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(_) => {
            eprintln!("{}", "[!] WARNING: Could not get file descriptor limit".bright_yellow());
            65535
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_ulimit: Option<u64>) -> u64 {
    65535
}

fn print_banner() {
    eprintln!("{}", "  ___ __ _ _ __ ___  ___  ___ __ _ _ __  ".truecolor(52, 152, 219).bold());
    eprintln!("{}", " / __/ _` | '_ ` _ \\/ __|/ __/ _` | '_ \\ ".truecolor(52, 152, 219).bold());
    eprintln!("{}", "| (_| (_| | | | | | \\__ \\ (_| (_| | | | |".truecolor(52, 152, 219).bold());
    eprintln!("{}", " \\___\\__,_|_| |_| |_|___/\\___\\__,_|_| |_|".truecolor(52, 152, 219).bold());
    eprintln!();
    eprintln!(
        "{}",
        format!("camscan {} - IP camera discovery", env!("CARGO_PKG_VERSION"))
            .truecolor(255, 215, 0)
            .bold()
    );
    eprintln!();
}

fn build_cli() -> Command {
    Command::new("camscan")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent IP camera discovery: liveness sweep, port scan, RTSP/ONVIF/HTTP checks")
        .arg(
            Arg::new("target")
                .value_name("TARGET")
                .help("IPv4 address, range (10.0.0.1-10.0.0.50 or 10.0.0.1-50) or CIDR")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("ports")
                .short('p')
                .long("ports")
                .value_name("PORTS")
                .help("Ports to scan (e.g. 80,554,8000-8010). Default: known camera ports"),
        )
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .value_name("USER")
                .help("Username to test on open ports"),
        )
        .arg(
            Arg::new("password")
                .short('P')
                .long("password")
                .value_name("PASS")
                .help("Password to test on open ports")
                .requires("username"),
        )
        .arg(
            Arg::new("intensity")
                .short('i')
                .long("intensity")
                .value_name("LEVEL")
                .help("HTTP path budget")
                .value_parser(["basic", "medium", "high", "maximum"]),
        )
        .arg(
            Arg::new("brand")
                .short('b')
                .long("brand")
                .value_name("BRAND")
                .help("Vendor preset: its ports become the default and its paths are tried first"),
        )
        .arg(
            Arg::new("methods")
                .short('m')
                .long("methods")
                .value_name("METHODS")
                .help("Phases to run")
                .value_delimiter(',')
                .default_value("liveness,portscan,detection"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("COUNT")
                .help("Hosts scanned concurrently")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("port-concurrency")
                .long("port-concurrency")
                .value_name("COUNT")
                .help("Ports probed concurrently per host")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("MS")
                .help("Connect timeout in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("auth-timeout")
                .long("auth-timeout")
                .value_name("MS")
                .help("Per-port authentication deadline in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (default: ~/.camscan.toml)"),
        )
        .arg(
            Arg::new("output-format")
                .short('o')
                .long("output-format")
                .value_name("FORMAT")
                .help("Report format")
                .value_parser(["text", "json", "csv", "xml"])
                .default_value("text"),
        )
        .arg(
            Arg::new("output-file")
                .long("output-file")
                .value_name("FILE")
                .help("Write the report to a file instead of stdout"),
        )
        .arg(
            Arg::new("include-dead")
                .long("include-dead")
                .help("Keep hosts that showed no sign of life in the report")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("scan-all")
                .long("scan-all")
                .help("Port-scan every host, even those the liveness sweep found dead")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-banner-grab")
                .long("no-banner-grab")
                .help("Skip the banner read on open ports")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("ulimit")
                .long("ulimit")
                .value_name("LIMIT")
                .help("Automatically increase ulimit to this value")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More logging; also lists non-camera hosts")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .help("Hide the progress bar")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-banner")
                .long("no-banner")
                .help("Hide the banner")
                .action(ArgAction::SetTrue),
        )
}

/// Config file first, then command-line overrides
fn build_config(matches: &ArgMatches) -> anyhow::Result<ScanConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => ScanConfig::from_toml_file(path).with_context(|| format!("loading {}", path))?,
        None => ScanConfig::load_default_config(),
    };

    if let Some(username) = matches.get_one::<String>("username") {
        let password = matches.get_one::<String>("password").cloned().unwrap_or_default();
        config.credentials = Some(Credentials::new(username.clone(), password));
    }
    if let Some(level) = matches.get_one::<String>("intensity") {
        config.intensity = level.parse::<Intensity>()?;
    }
    if let Some(brand) = matches.get_one::<String>("brand") {
        if camera_ports::brand_preset(brand).is_none() {
            anyhow::bail!("unknown brand preset: {}", brand);
        }
        config.brand = Some(brand.clone());
    }
    if let Some(concurrency) = matches.get_one::<usize>("concurrency") {
        config.host_concurrency = *concurrency;
    }
    if let Some(concurrency) = matches.get_one::<usize>("port-concurrency") {
        config.port_concurrency = *concurrency;
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_ms = *timeout;
    }
    if let Some(deadline) = matches.get_one::<u64>("auth-timeout") {
        config.auth_deadline_ms = *deadline;
    }
    if matches.get_flag("include-dead") {
        config.include_dead_hosts = true;
    }
    if matches.get_flag("scan-all") {
        config.scan_all_hosts = true;
    }
    if matches.get_flag("no-banner-grab") {
        config.grab_banner = false;
    }

    config.validate()?;
    Ok(config)
}

fn scan_ports(matches: &ArgMatches, config: &ScanConfig) -> anyhow::Result<Vec<u16>> {
    if let Some(spec) = matches.get_one::<String>("ports") {
        return Ok(address_parser::parse_ports(spec)?);
    }
    let preset = config.brand.as_deref().and_then(camera_ports::brand_preset);
    Ok(match preset {
        Some(preset) => preset.ports.to_vec(),
        None => camera_ports::default_camera_ports(),
    })
}

fn progress_bar(hidden: bool) -> anyhow::Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("█▓░"),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    Logger::init(Logger::level_for(matches.get_count("verbose")));
    let verbose = matches.get_count("verbose") > 0;
    let colored_output = !matches.get_flag("no-color");
    if !colored_output {
        colored::control::set_override(false);
    }
    if !matches.get_flag("no-banner") {
        print_banner();
    }
    if let Some(ulimit) = matches.get_one::<u64>("ulimit") {
        adjust_ulimit_size(Some(*ulimit));
    }

    let config = build_config(&matches)?;
    let target = matches
        .get_one::<String>("target")
        .context("a target is required")?;
    let (start, end) = address_parser::parse_target(target)?;
    let ports = scan_ports(&matches, &config)?;
    let range = ScanRange::new(start, end, ports, config.timeout_duration())?;

    let methods = matches
        .get_many::<String>("methods")
        .into_iter()
        .flatten()
        .map(|name| name.parse::<ScanMethod>())
        .collect::<Result<Vec<_>, _>>()?;

    if config.credentials.is_some() {
        eprintln!(
            "{} {}",
            "[~] Testing credentials at intensity".bright_blue(),
            config.intensity.to_string().bright_cyan().bold()
        );
    }
    Logger::log_scan_start(&range, &methods);

    let bar = progress_bar(matches.get_flag("no-progress"))?;
    let orchestrator = ScanOrchestrator::new(config.clone());
    {
        let bar = bar.clone();
        orchestrator.on_progress(move |progress| {
            bar.set_position(progress.percentage().round() as u64);
            let phase = progress.phase.map(|phase| phase.name()).unwrap_or("preparing");
            bar.set_message(format!(
                "{} {}/{} hosts, {} cameras",
                phase, progress.scanned_ips, progress.total_ips, progress.cameras_found
            ));
        });
    }
    {
        let bar = bar.clone();
        orchestrator.on_host_complete(move |scan| {
            for port in scan.authenticated_ports() {
                bar.println(format!(
                    "{} {}:{} {}",
                    "[+]".bright_green(),
                    scan.target_ip,
                    port.port,
                    port.auth_method.as_deref().unwrap_or_default().bright_cyan()
                ));
            }
        });
    }

    let mut handle = orchestrator.start_scan(range, &methods, config.host_concurrency, config.timeout_duration())?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "\n[!] Interrupted, finishing in-flight probes...".bright_yellow());
            cancel.cancel();
        }
    });

    let report = handle.wait().await?;
    bar.finish_and_clear();
    Logger::log_scan_complete(&report.statistics);

    let format: OutputFormat = matches
        .get_one::<String>("output-format")
        .map(|value| value.parse())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(OutputFormat::Text);
    let output = OutputManager::new(OutputConfig {
        format,
        file: matches.get_one::<String>("output-file").cloned(),
        colored: colored_output && format == OutputFormat::Text,
        verbose,
    });
    output.write_report(&report)?;

    if report.statistics.status == ScanStatus::Error {
        eprintln!(
            "{} {}",
            "[!] Scan failed:".bright_red(),
            report.statistics.error.as_deref().unwrap_or("unknown error")
        );
        process::exit(2);
    }
    Ok(())
}
