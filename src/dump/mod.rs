pub mod paths;
pub mod transfer;

pub use paths::{classify_location, CANDIDATE_ROOTS, ELF_FILE_NAME, JS_FILE_NAME};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Storage a dump lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LocationTag {
    Internal,
    /// USB slot 0-7.
    UsbSlot(u8),
    /// USB device with an unrecognised slot number.
    Usb,
    /// Extended storage slot 0-1.
    ExtSlot(u8),
    /// Extended storage with an unrecognised slot number.
    External,
    /// Folder on a locally mounted volume.
    Local,
    Unknown,
}

impl LocationTag {
    /// Short label shown in front of a dump name.
    pub fn short_label(&self) -> String {
        match self {
            LocationTag::Internal => "[INT]".to_string(),
            LocationTag::UsbSlot(n) => format!("[USB{}]", n),
            LocationTag::Usb => "[USB]".to_string(),
            LocationTag::ExtSlot(n) => format!("[EXT{}]", n),
            LocationTag::External => "[EXT]".to_string(),
            LocationTag::Local => "[LOCAL]".to_string(),
            LocationTag::Unknown => "[???]".to_string(),
        }
    }

    pub fn is_removable(&self) -> bool {
        !matches!(self, LocationTag::Internal | LocationTag::Unknown)
    }
}

impl fmt::Display for LocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationTag::Internal => write!(f, "internal"),
            LocationTag::UsbSlot(n) => write!(f, "usb{}", n),
            LocationTag::Usb => write!(f, "usb"),
            LocationTag::ExtSlot(n) => write!(f, "ext{}", n),
            LocationTag::External => write!(f, "external"),
            LocationTag::Local => write!(f, "local"),
            LocationTag::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for LocationTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(LocationTag::Internal),
            "usb" => Ok(LocationTag::Usb),
            "external" => Ok(LocationTag::External),
            "local" => Ok(LocationTag::Local),
            "unknown" => Ok(LocationTag::Unknown),
            _ => {
                let slot = |prefix: &str, max: u8| {
                    s.strip_prefix(prefix)
                        .and_then(|n| n.parse::<u8>().ok())
                        .filter(|n| *n <= max)
                };
                if let Some(n) = slot("usb", 7) {
                    Ok(LocationTag::UsbSlot(n))
                } else if let Some(n) = slot("ext", 1) {
                    Ok(LocationTag::ExtSlot(n))
                } else {
                    Err(format!("unknown location tag: {}", s))
                }
            }
        }
    }
}

impl From<LocationTag> for String {
    fn from(tag: LocationTag) -> Self {
        tag.to_string()
    }
}

impl TryFrom<String> for LocationTag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Whether the payload files are present in a dump.
///
/// `Official` and `Experimental` are part of the model but nothing can tell
/// them apart from file presence, so scans only ever produce `NotInstalled`
/// or `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    NotInstalled,
    Official,
    Experimental,
    Unknown,
}

impl InstallationStatus {
    /// Status implied by the two presence flags.
    pub fn from_presence(has_elf: bool, has_js: bool) -> Self {
        if has_elf || has_js {
            InstallationStatus::Unknown
        } else {
            InstallationStatus::NotInstalled
        }
    }
}

/// A directory believed to hold one game dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub path: String,
    pub name: String,
    pub location: LocationTag,
    pub installation_status: InstallationStatus,
    pub installed_version: Option<String>,
    pub installed_at: Option<DateTime<Utc>>,
    pub is_experimental: bool,
    pub has_elf: bool,
    pub has_js: bool,
}

impl StorageLocation {
    /// Build a location for a remote path, classified by its root.
    pub fn from_remote_path(full_path: &str) -> Self {
        Self::new(full_path, classify_location(full_path))
    }

    pub fn new(full_path: &str, location: LocationTag) -> Self {
        Self {
            path: full_path.to_string(),
            name: paths::display_name_of(full_path),
            location,
            installation_status: InstallationStatus::NotInstalled,
            installed_version: None,
            installed_at: None,
            is_experimental: false,
            has_elf: false,
            has_js: false,
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.location.short_label(), self.name)
    }

    pub fn is_installed(&self) -> bool {
        self.installation_status != InstallationStatus::NotInstalled
    }

    /// Record which payload files were seen and derive the status.
    pub fn set_presence(&mut self, has_elf: bool, has_js: bool) {
        self.has_elf = has_elf;
        self.has_js = has_js;
        self.installation_status = InstallationStatus::from_presence(has_elf, has_js);
    }

    /// Check results could not be trusted.
    pub fn mark_unresolved(&mut self) {
        self.installation_status = InstallationStatus::Unknown;
    }
}

/// The two local files installed into each dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadFiles {
    pub elf_path: PathBuf,
    pub js_path: PathBuf,
}

impl PayloadFiles {
    pub fn new(elf_path: impl Into<PathBuf>, js_path: impl Into<PathBuf>) -> Self {
        Self {
            elf_path: elf_path.into(),
            js_path: js_path.into(),
        }
    }
}

/// Progress of a single file copy into one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub location_path: String,
    pub file_name: String,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.bytes_total as f64) * 100.0
    }
}

pub const CANCELLED_MESSAGE: &str = "Upload cancelled";

/// Result of installing both payload files into one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferOutcome {
    pub location_path: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub elf_uploaded: bool,
    pub js_uploaded: bool,
    pub bytes_transferred: u64,
    pub duration_seconds: f64,
}

impl TransferOutcome {
    /// Nothing copied yet, no error.
    pub fn pending(location_path: &str) -> Self {
        Self {
            location_path: location_path.to_string(),
            success: false,
            error_message: None,
            elf_uploaded: false,
            js_uploaded: false,
            bytes_transferred: 0,
            duration_seconds: 0.0,
        }
    }

    pub fn failed(location_path: &str, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::pending(location_path)
        }
    }

    pub fn cancelled(location_path: &str) -> Self {
        Self::failed(location_path, CANCELLED_MESSAGE)
    }

    pub fn is_cancelled(&self) -> bool {
        !self.success && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }
}

/// Aggregate of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub duration_seconds: f64,
    pub failures: Vec<(String, Option<String>)>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[TransferOutcome]) -> Self {
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            bytes_transferred: outcomes.iter().map(|o| o.bytes_transferred).sum(),
            duration_seconds: outcomes.iter().map(|o| o.duration_seconds).sum(),
            failures: outcomes
                .iter()
                .filter(|o| !o.success)
                .map(|o| (o.location_path.clone(), o.error_message.clone()))
                .collect(),
        }
    }
}

/// Cooperative cancel flag shared between a transfer engine and whoever
/// wants to stop it. Only checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
