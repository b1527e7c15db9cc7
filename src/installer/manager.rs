use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::backend::{Backend, BackendStatus, LocalBackend, RemoteBackend};
use super::credentials::{CredentialStore, MemoryCredentialStore};
use super::guidance::{self, Guidance};
use crate::dump::{BatchSummary, CancelFlag, PayloadFiles, StorageLocation, TransferOutcome, TransferProgress};
use crate::error::Error;
use crate::ftp::{ConnectionConfig, ConnectionState, FtpError};
use crate::local::{available_volumes, VolumeInfo};
use crate::utils::config::Config;
use crate::utils::log_buffer::{LogBuffer, LogEntry};

type SharedBackend = Arc<Mutex<Option<Box<dyn Backend>>>>;

/// Drives one backend at a time and tells subscribers what happened.
#[derive(Clone)]
pub struct InstallerManager {
    config: Arc<Config>,
    backend: SharedBackend,
    cancel: Arc<Mutex<Option<CancelFlag>>>,
    busy: Arc<AtomicBool>,
    shared: Arc<RwLock<Snapshot>>,
    credentials: Arc<dyn CredentialStore>,
    event_tx: broadcast::Sender<Event>,
    log_buffer: LogBuffer,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    StateChanged(ConnectionState),
    ScanCompleted {
        operation_id: String,
        locations: Vec<StorageLocation>,
    },
    Progress(TransferProgress),
    LocationCompleted(TransferOutcome),
    BatchCompleted {
        operation_id: String,
        summary: BatchSummary,
    },
    Error {
        message: String,
        guidance: Option<Guidance>,
    },
}

/// Last known state, served when the backend is busy.
#[derive(Debug, Default)]
struct Snapshot {
    status: Option<BackendStatus>,
    locations: Vec<StorageLocation>,
    last_summary: Option<BatchSummary>,
    last_guidance: Option<Guidance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub backend: Option<BackendStatus>,
    pub busy: bool,
    pub locations: Vec<StorageLocation>,
    pub last_summary: Option<BatchSummary>,
    pub last_guidance: Option<Guidance>,
}

/// Missing fields fall back to the `[ftp]` config section; a missing
/// password is looked up in the credential store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectRequest {
    pub host: Option<String>,
    pub port: Option<u32>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub passive_mode: Option<bool>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub remember_password: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    pub paths: Vec<String>,
    pub elf_path: PathBuf,
    pub js_path: PathBuf,
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> std::result::Result<Self, Error> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| BusyGuard(flag.clone()))
            .map_err(|_| Error::Busy)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl InstallerManager {
    pub fn new(config: Config) -> Self {
        Self::with_credentials(config, Arc::new(MemoryCredentialStore::new()))
    }

    pub fn with_credentials(config: Config, credentials: Arc<dyn CredentialStore>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let log_buffer = LogBuffer::new(config.log_buffer_size);

        Self {
            config: Arc::new(config),
            backend: Arc::new(Mutex::new(None)),
            cancel: Arc::new(Mutex::new(None)),
            busy: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(RwLock::new(Snapshot::default())),
            credentials,
            event_tx,
            log_buffer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Connect to a console, replacing whatever backend was active.
    pub async fn connect(&self, request: ConnectRequest) -> Result<BackendStatus> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let defaults = &self.config.ftp;

        let host = request.host.unwrap_or_else(|| defaults.host.clone());
        let username = request.username.unwrap_or_else(|| defaults.username.clone());
        let config = ConnectionConfig::new(
            host,
            request.port.unwrap_or(defaults.port as u32),
            username,
            request.passive_mode.unwrap_or(defaults.passive_mode),
            request.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        )
        .map_err(Error::from)?;

        let password = match request.password.clone() {
            Some(password) => password,
            None => self
                .credentials
                .lookup(config.host(), config.username())
                .unwrap_or_default(),
        };

        let target = format!("{}:{}", config.host(), config.port());
        self.log_buffer.info(format!("Connecting to {}", target));
        self.emit(Event::StateChanged(ConnectionState::Connecting));

        let policy = self.config.scan.retry_policy();
        let block_size = self.config.transfer.block_size;
        let backend = self.backend.clone();
        let attempt = config.clone();
        let secret = password.clone();

        let (_guard, result) = tokio::task::spawn_blocking(move || {
            release(&backend);
            (guard, RemoteBackend::connect(attempt, &secret, policy, block_size))
        })
        .await
        .map_err(Error::from)?;

        match result {
            Ok(remote) => {
                if request.remember_password {
                    self.credentials.store(config.host(), config.username(), &password);
                }
                info!("Connected to {}", target);
                self.log_buffer.info(format!("Connected to {}", target));
                Ok(self.install_backend(Box::new(remote)))
            }
            Err(e) => {
                let advice = match &e {
                    Error::Ftp(ftp) => guidance::for_connect_error(ftp),
                    other => guidance::for_scan_error(&other.to_string()),
                };
                error!("Connection to {} failed: {}", target, e);
                self.clear_backend();
                self.report_error(e.to_string(), Some(advice));
                self.emit(Event::StateChanged(ConnectionState::Error));
                Err(e.into())
            }
        }
    }

    /// Use a mounted volume instead of a console.
    pub async fn open_local(&self, volume: PathBuf) -> Result<BackendStatus> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let block_size = self.config.transfer.block_size;
        let backend = self.backend.clone();

        let (_guard, result) = tokio::task::spawn_blocking(move || {
            release(&backend);
            (guard, LocalBackend::open(volume, block_size))
        })
        .await
        .map_err(Error::from)?;

        match result {
            Ok(local) => {
                self.log_buffer
                    .info(format!("Using local volume {}", local.volume().display()));
                Ok(self.install_backend(Box::new(local)))
            }
            Err(e) => {
                self.clear_backend();
                self.report_error(e.to_string(), None);
                Err(e.into())
            }
        }
    }

    /// No-op when nothing is attached; refused while an operation runs.
    pub async fn disconnect(&self) -> Result<()> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let backend = self.backend.clone();

        let (_guard, released) = tokio::task::spawn_blocking(move || {
            let released = release(&backend);
            (guard, released)
        })
        .await
        .map_err(Error::from)?;

        self.clear_backend();
        if released {
            self.log_buffer.info("Disconnected");
            self.emit(Event::StateChanged(ConnectionState::Disconnected));
        }
        Ok(())
    }

    pub async fn scan(&self) -> Result<Vec<StorageLocation>> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let operation_id = uuid::Uuid::new_v4().to_string();
        let backend = self.backend.clone();
        let started = Instant::now();

        self.log_buffer.info("Scanning for game dumps");
        let (_guard, result, status) = tokio::task::spawn_blocking(move || {
            let mut slot = backend.lock();
            match slot.as_mut() {
                Some(active) => {
                    let result = active.scan();
                    (guard, result, Some(active.status()))
                }
                None => (guard, Err(Error::NoBackend), None),
            }
        })
        .await
        .map_err(Error::from)?;

        // A scan can succeed with partial results after the session died.
        let lost = status
            .as_ref()
            .filter(|s| s.connection_state == ConnectionState::Error)
            .map(|s| {
                s.error_message
                    .clone()
                    .unwrap_or_else(|| "Connection lost during scan".to_string())
            });
        if let Some(status) = status {
            self.shared.write().status = Some(status);
        }

        match result {
            Ok(locations) => {
                let elapsed = humantime::format_duration(round_to_millis(started.elapsed()));
                info!("Scan {} found {} dumps in {}", operation_id, locations.len(), elapsed);
                self.log_buffer
                    .info(format!("Found {} game dumps in {}", locations.len(), elapsed));
                {
                    let mut shared = self.shared.write();
                    shared.locations = locations.clone();
                    shared.last_guidance = None;
                }
                self.emit(Event::ScanCompleted {
                    operation_id,
                    locations: locations.clone(),
                });
                if let Some(reason) = lost {
                    warn!("Session lost during scan: {}", reason);
                    self.emit(Event::StateChanged(ConnectionState::Error));
                    self.report_error(reason.clone(), Some(guidance::for_scan_error(&reason)));
                }
                Ok(locations)
            }
            Err(Error::NoBackend) => Err(Error::NoBackend.into()),
            Err(e) => {
                let message = e.to_string();
                let advice = guidance::for_scan_error(&message);
                error!("Scan {} failed: {}", operation_id, message);
                if advice.force_disconnect() || e.requires_reconnect() {
                    warn!("Dropping session after scan failure");
                    self.force_disconnect().await;
                }
                self.report_error(message, Some(advice));
                Err(e.into())
            }
        }
    }

    /// Re-check one location and fold the result into the last scan.
    pub async fn refresh(&self, path: String) -> Result<StorageLocation> {
        let guard = BusyGuard::acquire(&self.busy)?;
        let backend = self.backend.clone();

        let (_guard, result) = tokio::task::spawn_blocking(move || {
            let result = backend
                .lock()
                .as_mut()
                .ok_or(Error::NoBackend)
                .and_then(|active| active.refresh(&path));
            (guard, result)
        })
        .await
        .map_err(Error::from)?;

        let location = result?;
        self.merge_location(location.clone());
        Ok(location)
    }

    /// Start a batch install in the background. Progress arrives as events;
    /// the returned id tags the final `BatchCompleted`.
    pub async fn upload(&self, request: UploadRequest) -> Result<String> {
        let guard = BusyGuard::acquire(&self.busy)?;

        if request.paths.is_empty() {
            return Err(Error::InvalidRequest("No locations selected".to_string()).into());
        }
        for file in [&request.elf_path, &request.js_path] {
            if !file.is_file() {
                return Err(
                    Error::InvalidRequest(format!("Payload file not found: {}", file.display())).into(),
                );
            }
        }

        let targets = {
            let shared = self.shared.read();
            let mut targets = Vec::with_capacity(request.paths.len());
            for path in &request.paths {
                match shared.locations.iter().find(|l| &l.path == path) {
                    Some(location) => targets.push(location.clone()),
                    None => {
                        return Err(Error::InvalidRequest(format!("Unknown location: {}", path)).into())
                    }
                }
            }
            targets
        };

        if self.backend.lock().is_none() {
            return Err(Error::NoBackend.into());
        }

        let operation_id = uuid::Uuid::new_v4().to_string();
        let payload = PayloadFiles::new(request.elf_path, request.js_path);
        self.log_buffer
            .info(format!("Installing into {} locations", targets.len()));

        let manager = self.clone();
        let id = operation_id.clone();
        tokio::spawn(async move {
            let worker = manager.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                worker.run_batch(&targets, &payload)
            })
            .await;

            match joined {
                Ok(Some(summary)) => {
                    manager.log_buffer.info(format!(
                        "Installed {}/{} locations",
                        summary.successful, summary.total
                    ));
                    manager.shared.write().last_summary = Some(summary.clone());
                    manager.emit(Event::BatchCompleted {
                        operation_id: id,
                        summary,
                    });
                }
                Ok(None) => manager.report_error(Error::NoBackend.to_string(), None),
                Err(e) => {
                    error!("Upload worker failed: {}", e);
                    manager.report_error(format!("Upload failed: {}", e), None);
                }
            }
        });

        Ok(operation_id)
    }

    /// Runs on the worker. Holds the backend for the whole batch; cancel goes
    /// through the separately stored flag.
    fn run_batch(&self, targets: &[StorageLocation], payload: &PayloadFiles) -> Option<BatchSummary> {
        let mut slot = self.backend.lock();
        let active = slot.as_mut()?;

        let events = self.event_tx.clone();
        let logs = self.log_buffer.clone();
        let mut on_progress = |progress: TransferProgress| {
            let _ = events.send(Event::Progress(progress));
        };
        let mut on_complete = |outcome: &TransferOutcome| {
            match (outcome.success, &outcome.error_message) {
                (true, _) => logs.add_log("info", "Installed".to_string(), Some(outcome.location_path.clone())),
                (false, Some(message)) => {
                    logs.add_log("error", message.clone(), Some(outcome.location_path.clone()))
                }
                (false, None) => {}
            }
            let _ = self.event_tx.send(Event::LocationCompleted(outcome.clone()));
        };

        let outcomes = active.transfer_batch(targets, payload, &mut on_progress, &mut on_complete);

        for outcome in outcomes.iter().filter(|o| o.success) {
            match active.refresh(&outcome.location_path) {
                Ok(location) => self.merge_location(location),
                Err(e) => warn!("Could not re-check {}: {}", outcome.location_path, e),
            }
        }
        self.shared.write().status = Some(active.status());

        Some(BatchSummary::from_outcomes(&outcomes))
    }

    /// Stop the running batch after the file in flight.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(flag) => {
                flag.cancel();
                self.log_buffer.info("Cancelling upload");
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> ManagerStatus {
        let live = self
            .backend
            .try_lock()
            .map(|slot| slot.as_ref().map(|active| active.status()));

        let mut shared = self.shared.write();
        if let Some(status) = live {
            shared.status = status;
        }

        ManagerStatus {
            backend: shared.status.clone(),
            busy: self.is_busy(),
            locations: shared.locations.clone(),
            last_summary: shared.last_summary.clone(),
            last_guidance: shared.last_guidance.clone(),
        }
    }

    pub async fn volumes(&self) -> Result<Vec<VolumeInfo>> {
        Ok(tokio::task::spawn_blocking(available_volumes).await?)
    }

    pub fn logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        self.log_buffer.get_logs(limit)
    }

    /// Cancel anything running and release the backend.
    pub async fn shutdown(&self) {
        self.cancel();
        self.force_disconnect().await;
    }

    fn install_backend(&self, backend: Box<dyn Backend>) -> BackendStatus {
        let status = backend.status();
        let state = status.connection_state;
        *self.cancel.lock() = Some(backend.cancel_flag());
        *self.backend.lock() = Some(backend);
        {
            let mut shared = self.shared.write();
            shared.status = Some(status.clone());
            shared.locations.clear();
            shared.last_guidance = None;
        }
        self.emit(Event::StateChanged(state));
        status
    }

    fn clear_backend(&self) {
        *self.cancel.lock() = None;
        let mut shared = self.shared.write();
        shared.status = None;
        shared.locations.clear();
    }

    async fn force_disconnect(&self) {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || release(&backend)).await {
            Ok(true) => {
                self.clear_backend();
                self.log_buffer.info("Disconnected");
                self.emit(Event::StateChanged(ConnectionState::Disconnected));
            }
            Ok(false) => self.clear_backend(),
            Err(e) => error!("Failed to release backend: {}", e),
        }
    }

    fn merge_location(&self, location: StorageLocation) {
        let mut shared = self.shared.write();
        match shared.locations.iter_mut().find(|l| l.path == location.path) {
            Some(existing) => *existing = location,
            None => shared.locations.push(location),
        }
    }

    fn report_error(&self, message: String, advice: Option<Guidance>) {
        self.log_buffer.error(message.clone());
        self.shared.write().last_guidance = advice.clone();
        self.emit(Event::Error {
            message,
            guidance: advice,
        });
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Shut down and drop the active backend. Blocks on QUIT for remote ones.
fn release(backend: &SharedBackend) -> bool {
    let taken = backend.lock().take();
    match taken {
        Some(mut active) => {
            active.shutdown();
            true
        }
        None => false,
    }
}

fn round_to_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}
