use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use super::error::FtpError;
use super::prober::{DirectoryProber, ProbeError, RetryPolicy};
use super::transport::FtpTransport;
use crate::dump::paths::{display_name_of, is_junk_name, join_remote};
use crate::dump::{LocationTag, StorageLocation, CANDIDATE_ROOTS, ELF_FILE_NAME, JS_FILE_NAME};

/// Finds dumps under the candidate roots of a connected console.
pub struct DumpScanner {
    prober: DirectoryProber,
    roots: Vec<String>,
    locations: Vec<StorageLocation>,
    last_scan: Option<DateTime<Utc>>,
}

impl Default for DumpScanner {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl DumpScanner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_roots(policy, CANDIDATE_ROOTS.clone())
    }

    pub fn with_roots(policy: RetryPolicy, roots: Vec<String>) -> Self {
        Self {
            prober: DirectoryProber::new(policy),
            roots,
            locations: Vec::new(),
            last_scan: None,
        }
    }

    pub fn locations(&self) -> &[StorageLocation] {
        &self.locations
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    /// Walk every root in priority order and collect dump folders.
    ///
    /// Per-root and per-entry failures are logged and skipped. A dead session
    /// ends the walk early with whatever was found so far and leaves the
    /// connection marked lost; only a failed initial keepalive is an error.
    pub fn scan(&mut self, conn: &mut ConnectionManager) -> Result<Vec<StorageLocation>, FtpError> {
        if !conn.is_connected() {
            return Err(FtpError::not_connected("Scan"));
        }
        let mut ftp = conn.session()?;

        if let Err(e) = ftp.noop() {
            warn!("Keepalive failed before scan: {}", e);
            conn.mark_lost(&format!("Connection lost - FTP server not responding: {}", e));
            return Err(FtpError::ConnectionLost(e));
        }

        let (found, lost) = self.walk_roots(&mut ftp);
        if let Some(reason) = lost {
            warn!("{}; stopping scan with {} dumps", reason, found.len());
            conn.mark_lost(&reason);
        }

        self.locations = found;
        self.last_scan = Some(Utc::now());
        info!("Scan complete: found {} dumps", self.locations.len());
        Ok(self.locations.clone())
    }

    /// Dumps found, and why the session died if it did.
    fn walk_roots(&self, ftp: &mut dyn FtpTransport) -> (Vec<StorageLocation>, Option<String>) {
        let mut found = Vec::new();

        for root in &self.roots {
            match self.prober.exists(ftp, root) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => debug!("Existence check for {} failed ({}), listing anyway", root, e),
            }

            let entries = match self.prober.list_directory(ftp, root) {
                Ok(entries) => entries,
                Err(ProbeError::Permission { .. }) => {
                    debug!("Root not accessible: {}", root);
                    continue;
                }
                Err(e @ ProbeError::ConnectionLost { .. }) => return (found, Some(e.to_string())),
                Err(e) => {
                    if let Err(keepalive) = ftp.noop() {
                        let reason = format!(
                            "Connection lost after listing {} failed: {}",
                            root, keepalive
                        );
                        return (found, Some(reason));
                    }
                    warn!("Error scanning {}: {}", root, e);
                    continue;
                }
            };
            debug!("Found {} entries in {}", entries.len(), root);

            let root_path = root.trim_end_matches('/');
            for entry in entries {
                if entry.trim_end_matches('/') == root_path || is_junk_name(&display_name_of(&entry)) {
                    continue;
                }
                let full_path = join_remote(root, &entry);

                match self.prober.list_directory(ftp, &full_path) {
                    Ok(_) => {
                        let mut location = StorageLocation::from_remote_path(&full_path);
                        self.check_status(ftp, &mut location);
                        debug!("Added dump: {}", location.name);
                        found.push(location);
                    }
                    // Plain files land here too.
                    Err(ProbeError::Permission { .. }) => continue,
                    Err(e @ ProbeError::ConnectionLost { .. }) => return (found, Some(e.to_string())),
                    Err(e) => warn!("Error checking {}: {}", full_path, e),
                }
            }
        }

        (found, None)
    }

    /// Re-check the payload files of one location.
    pub fn refresh(
        &mut self,
        conn: &mut ConnectionManager,
        path: &str,
    ) -> Result<StorageLocation, FtpError> {
        if !conn.is_connected() {
            return Err(FtpError::not_connected("Refresh"));
        }
        let mut ftp = conn.session()?;

        let mut location = self
            .find_by_path(path)
            .cloned()
            .unwrap_or_else(|| StorageLocation::from_remote_path(path));
        self.check_status(&mut ftp, &mut location);

        if let Some(existing) = self.locations.iter_mut().find(|l| l.path == location.path) {
            *existing = location.clone();
        }
        Ok(location)
    }

    /// Look for the payload files inside `location`. Never fails: anything
    /// that goes wrong leaves the status `unknown`.
    pub fn check_installation_status(
        &self,
        conn: &mut ConnectionManager,
        location: &mut StorageLocation,
    ) {
        match conn.session() {
            Ok(mut ftp) => self.check_status(&mut ftp, location),
            Err(_) => location.mark_unresolved(),
        }
    }

    fn check_status(&self, ftp: &mut dyn FtpTransport, location: &mut StorageLocation) {
        match self.prober.list_entries(ftp, &location.path) {
            Ok(entries) => {
                let has = |file: &str| entries.iter().any(|e| display_name_of(e) == file);
                location.set_presence(has(ELF_FILE_NAME), has(JS_FILE_NAME));
            }
            Err(e) => {
                debug!("Status check failed for {}: {}", location.path, e);
                location.mark_unresolved();
            }
        }
    }

    pub fn find_by_path(&self, path: &str) -> Option<&StorageLocation> {
        self.locations.iter().find(|l| l.path == path)
    }

    pub fn by_location_tag(&self, tag: LocationTag) -> Vec<&StorageLocation> {
        self.locations.iter().filter(|l| l.location == tag).collect()
    }

    pub fn installed(&self) -> Vec<&StorageLocation> {
        self.locations.iter().filter(|l| l.is_installed()).collect()
    }

    pub fn uninstalled(&self) -> Vec<&StorageLocation> {
        self.locations.iter().filter(|l| !l.is_installed()).collect()
    }
}
