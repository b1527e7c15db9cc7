use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dump::paths::{is_junk_name, DUMP_MARKER_FILE, LOCAL_SCAN_SUBPATHS};
use crate::dump::{LocationTag, StorageLocation, ELF_FILE_NAME, JS_FILE_NAME};

/// Finds dumps on a mounted volume. A folder counts only if it holds
/// `eboot.bin`; its name is otherwise free-form.
pub struct LocalScanner {
    base: PathBuf,
    locations: Vec<StorageLocation>,
    last_scan: Option<DateTime<Utc>>,
}

impl LocalScanner {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locations: Vec::new(),
            last_scan: None,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn locations(&self) -> &[StorageLocation] {
        &self.locations
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    pub fn scan(&mut self) -> Vec<StorageLocation> {
        let mut found = Vec::new();

        for subpath in LOCAL_SCAN_SUBPATHS {
            let root = self.base.join(subpath);
            if !root.is_dir() {
                debug!("Skipping {}: not a directory", root.display());
                continue;
            }

            let walker = WalkDir::new(&root)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name();
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Error reading {}: {}", root.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if is_junk_name(&name) {
                    continue;
                }
                if !entry.path().join(DUMP_MARKER_FILE).is_file() {
                    debug!("No {} in {}, skipping", DUMP_MARKER_FILE, name);
                    continue;
                }

                let mut location =
                    StorageLocation::new(&entry.path().to_string_lossy(), LocationTag::Local);
                check_status(&mut location);
                found.push(location);
            }
        }

        self.locations = found;
        self.last_scan = Some(Utc::now());
        info!(
            "Local scan of {} complete: found {} dumps",
            self.base.display(),
            self.locations.len()
        );
        self.locations.clone()
    }

    pub fn refresh(&mut self, path: &str) -> StorageLocation {
        let mut location = self
            .find_by_path(path)
            .cloned()
            .unwrap_or_else(|| StorageLocation::new(path, LocationTag::Local));
        check_status(&mut location);

        if let Some(existing) = self.locations.iter_mut().find(|l| l.path == location.path) {
            *existing = location.clone();
        }
        location
    }

    pub fn find_by_path(&self, path: &str) -> Option<&StorageLocation> {
        self.locations.iter().find(|l| l.path == path)
    }
}

fn check_status(location: &mut StorageLocation) {
    let folder = Path::new(&location.path);
    if !folder.is_dir() {
        location.mark_unresolved();
        return;
    }
    location.set_presence(
        folder.join(ELF_FILE_NAME).exists(),
        folder.join(JS_FILE_NAME).exists(),
    );
}
