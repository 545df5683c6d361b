mod common;

use camscan::{scan_host, HostScanner, PortProbe, ScanConfig, ScanError};
use common::{banner_server, localhost, refused_port, silent_server};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn quick_config() -> ScanConfig {
    ScanConfig::default()
        .with_timeout(Duration::from_millis(500))
        .with_port_concurrency(8)
}

#[tokio::test]
async fn test_mixed_ports_are_partitioned() {
    let refused = refused_port().await;
    let silent = silent_server().await.port();
    let banner = banner_server("Hikvision RTSP server\r\n").await.port();

    let result = scan_host(localhost(), &[banner, refused, silent], quick_config())
        .await
        .unwrap();

    assert!(result.is_alive);
    assert_eq!(result.total_ports_scanned, 3);
    let mut expected_open = vec![silent, banner];
    expected_open.sort_unstable();
    assert_eq!(result.open_port_numbers(), expected_open);
    assert_eq!(result.closed_port_numbers(), vec![refused]);
    assert!(!result.credentials_tested);
    assert!(!result.cancelled);

    let banner_port = result.open_ports.iter().find(|p| p.port == banner).unwrap();
    assert!(banner_port.banner.as_deref().unwrap_or_default().contains("Hikvision"));
    let silent_port = result.open_ports.iter().find(|p| p.port == silent).unwrap();
    assert!(silent_port.banner.is_none());
}

#[tokio::test]
async fn test_refused_scan_is_repeatable() {
    let refused = refused_port().await;
    let scanner = HostScanner::new(quick_config()).unwrap();

    let first = scanner.scan_host(localhost(), &[refused]).await.unwrap();
    let second = scanner.scan_host(localhost(), &[refused]).await.unwrap();

    assert!(!first.is_alive);
    assert_eq!(first.open_port_numbers(), second.open_port_numbers());
    assert_eq!(first.closed_port_numbers(), second.closed_port_numbers());
}

#[tokio::test]
async fn test_duplicate_ports_scanned_once() {
    let silent = silent_server().await.port();
    let scanner = HostScanner::new(quick_config().with_banner_grab(false)).unwrap();

    let mut seen = 0;
    let result = scanner
        .scan_host_with_progress(localhost(), &[silent, silent, silent], |progress| {
            seen += 1;
            assert_eq!(progress.total, 1);
        })
        .await
        .unwrap();

    assert_eq!(seen, 1);
    assert_eq!(result.total_ports_scanned, 1);
}

#[tokio::test]
async fn test_empty_port_list_is_rejected() {
    let err = scan_host(localhost(), &[], quick_config()).await.unwrap_err();
    assert!(matches!(err, ScanError::PortRangeError(_)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = ScanConfig {
        port_concurrency: 0,
        ..quick_config()
    };
    assert!(HostScanner::new(config).is_err());
}

#[tokio::test]
async fn test_cancelled_scanner_dispatches_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let scanner = HostScanner::with_cancellation(quick_config(), cancel).unwrap();

    let result = scanner.scan_host(localhost(), &[80, 554, 8000]).await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.total_ports_scanned, 0);
}

#[tokio::test]
async fn test_probe_without_banner_grab() {
    let banner = banner_server("RTSP/1.0 200 OK\r\n").await.port();
    let probe = PortProbe::new(Duration::from_millis(500)).with_banner_grab(false);

    let result = probe.probe(localhost(), banner).await;
    assert!(result.is_open);
    assert!(result.banner.is_none());
    assert!(result.response_time_ms >= 0.0);

    let refused = probe.probe(localhost(), refused_port().await).await;
    assert!(!refused.is_open);
}
