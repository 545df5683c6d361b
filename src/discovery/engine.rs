//! Scan orchestrator
//!
//! One control task per run owns all run state. Phase workers report through
//! an mpsc channel; the control task folds their events into the state and
//! forwards notifications to a dispatcher task, which calls the registered
//! callbacks and feeds the broadcast stream. Subscribers therefore never run
//! on a worker and never block one.

use crate::config::ScanConfig;
use crate::discovery::{
    CameraSummary, DetectionResult, HostReport, LivenessResult, ProtocolDetector, ScanEvent, ScanMethod, ScanRange,
    ScanReport, ScanStatistics, ScanStatus, TcpLiveness,
};
use crate::error::ScanError;
use crate::network::PortResult;
use crate::scanner::{HostScanner, ScanProgress, ScanResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

type ProgressCallback = Arc<dyn Fn(&ScanProgress) + Send + Sync>;
type PortCallback = Arc<dyn Fn(IpAddr, &PortResult) + Send + Sync>;
type HostCallback = Arc<dyn Fn(&ScanResult) + Send + Sync>;

#[derive(Default, Clone)]
struct Subscribers {
    progress: Vec<ProgressCallback>,
    port: Vec<PortCallback>,
    host: Vec<HostCallback>,
}

type SharedSubscribers = Arc<std::sync::RwLock<Subscribers>>;

/// Run state; the control task is its only writer
#[derive(Debug, Clone)]
struct RunState {
    id: Uuid,
    range: ScanRange,
    methods: Vec<ScanMethod>,
    status: ScanStatus,
    progress: ScanProgress,
    hosts: BTreeMap<IpAddr, HostReport>,
    report: Option<ScanReport>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl RunState {
    fn host(&mut self, ip: IpAddr) -> &mut HostReport {
        self.hosts.entry(ip).or_insert_with(|| HostReport::new(ip))
    }

    /// Flag a host as done and count it if it turned out to be a camera
    fn finish_host(&mut self, ip: IpAddr) {
        let host = self.host(ip);
        if host.fully_processed {
            return;
        }
        host.fully_processed = true;
        if host.is_camera() {
            log::info!("Camera found at {}", ip);
            self.progress.cameras_found += 1;
        }
    }

    fn cameras(&self) -> Vec<CameraSummary> {
        let mut cameras: Vec<CameraSummary> = self
            .hosts
            .values()
            .filter(|host| host.fully_processed)
            .filter_map(CameraSummary::from_host)
            .collect();
        cameras.sort_by(|a, b| b.confidence.cmp(&a.confidence).then(a.ip.cmp(&b.ip)));
        cameras
    }

    fn statistics(&self) -> ScanStatistics {
        let scans: Vec<&ScanResult> = self.hosts.values().filter_map(|host| host.scan.as_ref()).collect();
        let avg_duration_seconds = if scans.is_empty() {
            0.0
        } else {
            scans.iter().map(|scan| scan.scan_duration_seconds).sum::<f64>() / scans.len() as f64
        };
        let end = self.finished_at.unwrap_or_else(Utc::now);

        ScanStatistics {
            scan_id: self.id,
            status: self.status,
            total_scans: scans.len(),
            total_hosts: self.range.ip_count(),
            alive_hosts: self.hosts.values().filter(|host| host.shows_life()).count(),
            cameras_found: self.progress.cameras_found,
            open_ports: scans.iter().map(|scan| scan.open_ports.len()).sum(),
            successful_auths: scans.iter().map(|scan| scan.successful_auths).sum(),
            avg_duration_seconds,
            elapsed_seconds: (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error.clone(),
        }
    }
}

/// Handle to one started run
#[derive(Debug)]
pub struct ScanHandle {
    id: Uuid,
    cancel: CancellationToken,
    state: Arc<RwLock<RunState>>,
    control: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ScanHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop dispatching new work; in-flight probes finish or time out
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token shared with the run, for cancelling from another task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn status(&self) -> ScanStatus {
        self.state.read().await.status
    }

    pub async fn progress(&self) -> ScanProgress {
        self.state.read().await.progress.clone()
    }

    /// Final report, once the run has reached a terminal state
    pub async fn report(&self) -> Option<ScanReport> {
        self.state.read().await.report.clone()
    }

    /// Wait for the run and every subscriber notification to finish
    pub async fn wait(&mut self) -> crate::Result<ScanReport> {
        if let Some(control) = self.control.take() {
            if let Err(e) = control.await {
                log::error!("Scan {} control task failed: {}", self.id, e);
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                log::warn!("Scan {} dispatcher failed: {}", self.id, e);
            }
        }
        self.report()
            .await
            .ok_or_else(|| ScanError::NetworkError(format!("scan {} ended without a report", self.id)))
    }
}

/// Multi-host, multi-phase camera discovery
pub struct ScanOrchestrator {
    config: ScanConfig,
    subscribers: SharedSubscribers,
    events: broadcast::Sender<ScanEvent>,
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            subscribers: Arc::new(std::sync::RwLock::new(Subscribers::default())),
            events,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&ScanProgress) + Send + Sync + 'static,
    {
        self.update_subscribers(|subs| subs.progress.push(Arc::new(callback)));
    }

    pub fn on_port_result<F>(&self, callback: F)
    where
        F: Fn(IpAddr, &PortResult) + Send + Sync + 'static,
    {
        self.update_subscribers(|subs| subs.port.push(Arc::new(callback)));
    }

    pub fn on_host_complete<F>(&self, callback: F)
    where
        F: Fn(&ScanResult) + Send + Sync + 'static,
    {
        self.update_subscribers(|subs| subs.host.push(Arc::new(callback)));
    }

    /// Every event of every run started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    fn update_subscribers(&self, update: impl FnOnce(&mut Subscribers)) {
        let mut subs = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut subs);
    }

    /// Validate and start a run; must be called inside a tokio runtime.
    ///
    /// `timeout` overrides the connect timeout for this run; zero falls back
    /// to the range's own timeout, then to the configured one.
    pub fn start_scan(
        &self,
        range: ScanRange,
        methods: &[ScanMethod],
        max_concurrency: usize,
        timeout: Duration,
    ) -> crate::Result<ScanHandle> {
        range.validate(self.config.max_hosts)?;
        let methods: Vec<ScanMethod> = methods.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if methods.is_empty() {
            return Err(ScanError::ConfigError("no scan methods selected".to_string()));
        }
        if max_concurrency == 0 {
            return Err(ScanError::ConfigError("host concurrency must be greater than 0".to_string()));
        }

        let mut config = self.config.clone();
        config.host_concurrency = max_concurrency;
        let timeout = [timeout, range.timeout]
            .into_iter()
            .find(|t| !t.is_zero())
            .unwrap_or_else(|| self.config.timeout_duration());
        config = config.with_timeout(timeout);
        config.validate()?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let scanner = HostScanner::with_cancellation(config.clone(), cancel.clone())?;
        let detector = ProtocolDetector::new(&config)?;
        let liveness = TcpLiveness::new(config.liveness_ports.clone(), config.timeout_duration());

        let state = Arc::new(RwLock::new(RunState {
            id,
            range: range.clone(),
            methods: methods.clone(),
            status: ScanStatus::Idle,
            progress: ScanProgress::new(range.ip_count()),
            hosts: BTreeMap::new(),
            report: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }));

        let (notify, notifications) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(notifications, self.subscribers.clone(), self.events.clone()));

        log::info!(
            "Scan {}: {} - {} ({} hosts x {} ports), methods {:?}",
            id,
            range.start_ip,
            range.end_ip,
            range.ip_count(),
            range.ports.len(),
            methods
        );

        let control = RunControl {
            id,
            range,
            methods,
            config,
            max_concurrency,
            cancel: cancel.clone(),
            state: state.clone(),
            notify,
            scanner,
            detector,
            liveness,
            started: Instant::now(),
        };
        let control = tokio::spawn(control.run());

        Ok(ScanHandle {
            id,
            cancel,
            state,
            control: Some(control),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn cancel(&self, handle: &ScanHandle) {
        log::info!("Scan {}: cancellation requested", handle.id);
        handle.cancel();
    }

    /// Ranked cameras; before the run ends, only hosts already fully processed
    pub async fn get_camera_results(&self, handle: &ScanHandle) -> Vec<CameraSummary> {
        let state = handle.state.read().await;
        match &state.report {
            Some(report) => report.cameras.clone(),
            None => state.cameras(),
        }
    }

    pub async fn get_stats(&self, handle: &ScanHandle) -> ScanStatistics {
        let state = handle.state.read().await;
        match &state.report {
            Some(report) => report.statistics.clone(),
            None => state.statistics(),
        }
    }
}

/// Calls subscribers off the control path; a panicking callback is logged and skipped
async fn dispatch(
    mut notifications: mpsc::UnboundedReceiver<ScanEvent>,
    subscribers: SharedSubscribers,
    events: broadcast::Sender<ScanEvent>,
) {
    while let Some(event) = notifications.recv().await {
        let subs = match subscribers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        match &event {
            ScanEvent::Progress(progress) => {
                for callback in &subs.progress {
                    guarded("progress", || callback(progress));
                }
            }
            ScanEvent::PortResult { ip, result } => {
                for callback in &subs.port {
                    guarded("port result", || callback(*ip, result));
                }
            }
            ScanEvent::HostComplete(scan) => {
                for callback in &subs.host {
                    guarded("host complete", || callback(scan));
                }
            }
            _ => {}
        }

        // no receivers is fine
        let _ = events.send(event);
    }
}

fn guarded(kind: &str, callback: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        log::warn!("A {} subscriber panicked; ignoring it", kind);
    }
}

/// What phase workers send back to the control task
enum WorkerEvent {
    Port { ip: IpAddr, result: PortResult },
    Detection(DetectionResult),
}

enum Step<T> {
    Event(WorkerEvent),
    Joined(Result<T, tokio::task::JoinError>),
}

struct RunControl {
    id: Uuid,
    range: ScanRange,
    methods: Vec<ScanMethod>,
    config: ScanConfig,
    max_concurrency: usize,
    cancel: CancellationToken,
    state: Arc<RwLock<RunState>>,
    notify: mpsc::UnboundedSender<ScanEvent>,
    scanner: HostScanner,
    detector: ProtocolDetector,
    liveness: TcpLiveness,
    started: Instant,
}

impl RunControl {
    async fn run(self) {
        let outcome = AssertUnwindSafe(self.execute()).catch_unwind().await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("scan control loop panicked".to_string()),
        };
        self.finish(error).await;
    }

    fn wants(&self, method: ScanMethod) -> bool {
        self.methods.contains(&method)
    }

    fn notify(&self, event: ScanEvent) {
        // the dispatcher outlives the control task
        let _ = self.notify.send(event);
    }

    async fn transition(&self, next: ScanStatus) -> bool {
        let mut state = self.state.write().await;
        if !state.status.can_transition_to(next) {
            log::debug!("Scan {}: ignoring {} -> {}", self.id, state.status, next);
            return false;
        }
        log::info!("Scan {}: {} -> {}", self.id, state.status, next);
        state.status = next;
        drop(state);
        self.notify(ScanEvent::StatusChanged(next));
        true
    }

    /// Apply `update` to the state, then publish the resulting progress
    async fn update<R>(&self, update: impl FnOnce(&mut RunState) -> R) -> R {
        let mut state = self.state.write().await;
        let out = update(&mut state);
        state.progress.elapsed_seconds = self.started.elapsed().as_secs_f64();
        let progress = state.progress.clone();
        drop(state);
        self.notify(ScanEvent::Progress(progress));
        out
    }

    async fn execute(&self) -> crate::Result<()> {
        self.transition(ScanStatus::Preparing).await;
        let total_ips = self.range.ip_count();
        self.update(|state| {
            state.progress = ScanProgress::new(total_ips);
            state.hosts.clear();
        })
        .await;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.transition(ScanStatus::Scanning).await;

        let mut candidates: Vec<IpAddr> = self.range.hosts().collect();
        if self.wants(ScanMethod::LivenessSweep) && !self.cancel.is_cancelled() {
            let alive = self.liveness_phase(&candidates).await;
            if !self.config.scan_all_hosts {
                candidates = alive;
            }
        }

        let targets: Vec<(IpAddr, Vec<u16>)> = if self.wants(ScanMethod::PortScan) {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.port_scan_phase(&candidates).await
        } else {
            candidates.iter().map(|&ip| (ip, self.range.ports.clone())).collect()
        };

        if self.wants(ScanMethod::ProtocolDetection) && !self.cancel.is_cancelled() {
            self.detection_phase(targets).await;
        }
        Ok(())
    }

    async fn start_phase(&self, phase: ScanMethod, hosts: usize, units: usize) {
        log::info!("Scan {}: {} phase over {} hosts", self.id, phase, hosts);
        self.update(|state| state.progress.start_phase(phase, hosts as u64, units as u64))
            .await;
    }

    /// Returns the hosts that showed life
    async fn liveness_phase(&self, candidates: &[IpAddr]) -> Vec<IpAddr> {
        let later_phases = self.wants(ScanMethod::PortScan) || self.wants(ScanMethod::ProtocolDetection);
        self.start_phase(ScanMethod::LivenessSweep, candidates.len(), 0).await;

        let mut tasks: JoinSet<LivenessResult> = JoinSet::new();
        let mut pending = candidates.iter().copied();
        let mut alive = Vec::new();

        loop {
            while tasks.len() < self.max_concurrency && !self.cancel.is_cancelled() {
                let Some(ip) = pending.next() else { break };
                let liveness = self.liveness.clone();
                tasks.spawn(async move { liveness.check(ip).await });
            }

            let Some(joined) = tasks.join_next().await else { break };
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("Liveness task failed: {}", e);
                    continue;
                }
            };

            let ip = result.ip;
            let is_alive = result.is_alive;
            if is_alive {
                alive.push(ip);
            }
            let done = !later_phases || (!is_alive && !self.config.scan_all_hosts);
            self.update(|state| {
                let host = state.host(ip);
                host.is_alive = is_alive;
                host.liveness = Some(result);
                state.progress.scanned_ips += 1;
                state.progress.current_ip = Some(ip);
                if done {
                    state.finish_host(ip);
                }
            })
            .await;
        }

        alive.sort();
        log::info!("Scan {}: {} of {} hosts alive", self.id, alive.len(), candidates.len());
        alive
    }

    /// Returns hosts with their open ports
    async fn port_scan_phase(&self, candidates: &[IpAddr]) -> Vec<(IpAddr, Vec<u16>)> {
        let ports = self.range.ports.clone();
        let detection_follows = self.wants(ScanMethod::ProtocolDetection);
        self.start_phase(ScanMethod::PortScan, candidates.len(), candidates.len() * ports.len())
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut tasks: JoinSet<(IpAddr, crate::Result<ScanResult>)> = JoinSet::new();
        let mut pending = candidates.iter().copied();
        let mut targets = Vec::new();

        loop {
            while tasks.len() < self.max_concurrency && !self.cancel.is_cancelled() {
                let Some(ip) = pending.next() else { break };
                let scanner = self.scanner.clone();
                let ports = ports.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    let result = scanner
                        .scan_host_with_progress(ip, &ports, move |step| {
                            let _ = tx.send(WorkerEvent::Port {
                                ip,
                                result: step.result.clone(),
                            });
                        })
                        .await;
                    (ip, result)
                });
            }
            if tasks.is_empty() {
                break;
            }

            let step = tokio::select! {
                Some(event) = rx.recv() => Step::Event(event),
                Some(joined) = tasks.join_next() => Step::Joined(joined),
                else => break,
            };

            match step {
                Step::Event(event) => self.apply(event).await,
                Step::Joined(joined) => {
                    // port events of this host land before its summary
                    while let Ok(event) = rx.try_recv() {
                        self.apply(event).await;
                    }
                    match joined {
                        Ok((ip, Ok(scan))) => {
                            if !scan.open_ports.is_empty() {
                                targets.push((ip, scan.open_port_numbers()));
                            }
                            self.host_scanned(scan, detection_follows).await;
                        }
                        Ok((ip, Err(e))) => {
                            log::warn!("Port scan of {} failed: {}", ip, e);
                            self.update(|state| state.progress.scanned_ips += 1).await;
                        }
                        Err(e) => log::warn!("Port scan task failed: {}", e),
                    }
                }
            }
        }

        drop(tx);
        while let Some(event) = rx.recv().await {
            self.apply(event).await;
        }

        targets.sort();
        targets
    }

    async fn host_scanned(&self, scan: ScanResult, detection_follows: bool) {
        let ip = scan.target_ip;
        let auth_detections: Vec<DetectionResult> = scan
            .open_ports
            .iter()
            .filter_map(|port| DetectionResult::from_authenticated_port(ip, port))
            .collect();
        let done = !scan.cancelled && (!detection_follows || scan.open_ports.is_empty());

        self.update(|state| {
            let host = state.host(ip);
            host.is_alive |= scan.is_alive;
            host.detections.extend(auth_detections);
            host.scan = Some(scan.clone());
            state.progress.scanned_ips += 1;
            state.progress.current_ip = Some(ip);
            if done {
                state.finish_host(ip);
            }
        })
        .await;
        self.notify(ScanEvent::HostComplete(scan));
    }

    async fn detection_phase(&self, targets: Vec<(IpAddr, Vec<u16>)>) {
        let units: usize = targets
            .iter()
            .flat_map(|(_, ports)| ports.iter())
            .map(|&port| crate::camera_ports::detection_protocols(port).len())
            .sum();
        self.start_phase(ScanMethod::ProtocolDetection, targets.len(), units).await;

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut tasks: JoinSet<(IpAddr, bool)> = JoinSet::new();
        let mut pending = targets.into_iter();

        loop {
            while tasks.len() < self.max_concurrency && !self.cancel.is_cancelled() {
                let Some((ip, ports)) = pending.next() else { break };
                let detector = self.detector.clone();
                let cancel = self.cancel.clone();
                let tx = tx.clone();
                tasks.spawn(async move {
                    for port in ports {
                        if cancel.is_cancelled() {
                            return (ip, false);
                        }
                        for protocol in crate::camera_ports::detection_protocols(port) {
                            let result = detector.detect(ip, port, protocol).await;
                            let _ = tx.send(WorkerEvent::Detection(result));
                        }
                    }
                    (ip, true)
                });
            }
            if tasks.is_empty() {
                break;
            }

            let step = tokio::select! {
                Some(event) = rx.recv() => Step::Event(event),
                Some(joined) = tasks.join_next() => Step::Joined(joined),
                else => break,
            };

            match step {
                Step::Event(event) => self.apply(event).await,
                Step::Joined(joined) => {
                    while let Ok(event) = rx.try_recv() {
                        self.apply(event).await;
                    }
                    match joined {
                        Ok((ip, complete)) => {
                            self.update(|state| {
                                state.progress.scanned_ips += 1;
                                if complete {
                                    state.finish_host(ip);
                                }
                            })
                            .await
                        }
                        Err(e) => log::warn!("Detection task failed: {}", e),
                    }
                }
            }
        }

        drop(tx);
        while let Some(event) = rx.recv().await {
            self.apply(event).await;
        }
    }

    async fn apply(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Port { ip, result } => {
                self.update(|state| {
                    state.progress.scanned_ports += 1;
                    state.progress.current_ip = Some(ip);
                })
                .await;
                self.notify(ScanEvent::PortResult { ip, result });
            }
            WorkerEvent::Detection(result) => {
                if result.is_successful() {
                    log::debug!("{}:{} speaks {}", result.ip, result.port, result.protocol);
                }
                let ip = result.ip;
                let published = result.clone();
                self.update(|state| {
                    state.progress.scanned_ports += 1;
                    state.progress.current_ip = Some(ip);
                    state.host(ip).detections.push(result);
                })
                .await;
                self.notify(ScanEvent::Detection(published));
            }
        }
    }

    /// Processing, then the terminal state; always leaves a report behind
    async fn finish(&self, error: Option<String>) {
        let cancelled = self.cancel.is_cancelled();
        if self.state.read().await.status == ScanStatus::Scanning {
            self.transition(ScanStatus::Processing).await;
        }

        let terminal = match (&error, cancelled) {
            (Some(_), _) => ScanStatus::Error,
            (None, true) => ScanStatus::Cancelled,
            (None, false) => ScanStatus::Completed,
        };
        if let Some(e) = &error {
            log::error!("Scan {} failed: {}", self.id, e);
        }

        let include_dead = self.config.include_dead_hosts;
        let mut state = self.state.write().await;
        state.error = error;
        state.finished_at = Some(Utc::now());
        state.progress.elapsed_seconds = self.started.elapsed().as_secs_f64();
        if state.status.can_transition_to(terminal) {
            log::info!("Scan {}: {} -> {}", self.id, state.status, terminal);
            state.status = terminal;
        }

        let mut hosts: Vec<HostReport> = state
            .hosts
            .values()
            .filter(|host| include_dead || host.shows_life())
            .cloned()
            .collect();
        for host in &mut hosts {
            host.sort_detections();
        }
        let cameras = state.cameras();
        state.progress.cameras_found = cameras.len();
        let statistics = state.statistics();

        state.report = Some(ScanReport {
            range: state.range.clone(),
            methods: state.methods.clone(),
            hosts,
            cameras,
            statistics: statistics.clone(),
        });
        let status = state.status;
        let progress = state.progress.clone();
        drop(state);

        log::info!(
            "Scan {} {}: {} alive, {} cameras in {:.2}s",
            self.id,
            status,
            statistics.alive_hosts,
            statistics.cameras_found,
            statistics.elapsed_seconds
        );
        self.notify(ScanEvent::StatusChanged(status));
        self.notify(ScanEvent::Progress(progress));
        self.notify(ScanEvent::Finished(statistics));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::DetectionProtocol;
    use std::net::Ipv4Addr;

    fn range() -> ScanRange {
        ScanRange::single(Ipv4Addr::LOCALHOST, vec![80], Duration::from_millis(200)).unwrap()
    }

    fn state() -> RunState {
        RunState {
            id: Uuid::nil(),
            range: range(),
            methods: vec![ScanMethod::ProtocolDetection],
            status: ScanStatus::Scanning,
            progress: ScanProgress::new(1),
            hosts: BTreeMap::new(),
            report: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn test_finish_host_counts_cameras_once() {
        let mut state = state();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let mut detection = DetectionResult::new(ip, 554, DetectionProtocol::Rtsp);
        detection.detected = true;
        state.host(ip).detections.push(detection);

        state.finish_host(ip);
        state.finish_host(ip);
        assert_eq!(state.progress.cameras_found, 1);
        assert_eq!(state.cameras().len(), 1);
    }

    #[test]
    fn test_unfinished_hosts_are_not_cameras() {
        let mut state = state();
        let ip: IpAddr = "10.0.0.6".parse().unwrap();
        let mut detection = DetectionResult::new(ip, 80, DetectionProtocol::Http);
        detection.detected = true;
        state.host(ip).detections.push(detection);
        assert!(state.cameras().is_empty());
        assert_eq!(state.statistics().cameras_found, 0);
    }

    #[tokio::test]
    async fn test_structural_errors_fail_fast() {
        let orchestrator = ScanOrchestrator::new(ScanConfig::default());
        assert!(orchestrator.start_scan(range(), &[], 4, Duration::ZERO).is_err());
        assert!(orchestrator
            .start_scan(range(), &[ScanMethod::PortScan], 0, Duration::ZERO)
            .is_err());

        let huge = ScanRange::parse("10.0.0.0", "10.255.255.255", vec![80], Duration::ZERO).unwrap();
        let err = orchestrator
            .start_scan(huge, &[ScanMethod::PortScan], 4, Duration::ZERO)
            .unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        guarded("test", || panic!("boom"));
    }
}
