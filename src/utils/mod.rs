//! Utility modules for the scanner

pub mod address_parser;

use crate::discovery::{ScanMethod, ScanRange, ScanStatistics};
use std::time::Duration;

/// Logging utilities
pub struct Logger;

impl Logger {
    /// Initialize logger with specified level; `RUST_LOG` still applies on top
    pub fn init(level: log::LevelFilter) {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp_secs()
            .init();
    }

    /// Map `-v` repetitions to a level
    pub fn level_for(verbosity: u8) -> log::LevelFilter {
        match verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Log scan start
    pub fn log_scan_start(range: &ScanRange, methods: &[ScanMethod]) {
        let methods: Vec<&str> = methods.iter().map(ScanMethod::name).collect();
        log::info!(
            "Starting scan of {}-{} ({} hosts, {} ports) using {}",
            range.start_ip,
            range.end_ip,
            range.ip_count(),
            range.ports.len(),
            methods.join(", ")
        );
    }

    /// Log scan completion
    pub fn log_scan_complete(stats: &ScanStatistics) {
        log::info!(
            "Scan {} in {} - {}/{} hosts alive, {} cameras, {} credentials confirmed",
            stats.status,
            format_duration(Duration::from_secs_f64(stats.elapsed_seconds)),
            stats.alive_hosts,
            stats.total_hosts,
            stats.cameras_found,
            stats.successful_auths
        );
    }
}

/// `1m 05s`, `12.34s` or `250ms`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
