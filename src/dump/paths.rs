use once_cell::sync::Lazy;
use regex::Regex;

use super::LocationTag;

/// Payload files installed into every dump.
pub const ELF_FILE_NAME: &str = "dump_runner.elf";
pub const JS_FILE_NAME: &str = "homebrew.js";

pub const PAYLOAD_FILE_NAMES: [&str; 2] = [ELF_FILE_NAME, JS_FILE_NAME];

/// A local folder is only treated as a dump when it carries this file.
pub const DUMP_MARKER_FILE: &str = "eboot.bin";

/// Subfolders scanned under a mounted volume.
pub const LOCAL_SCAN_SUBPATHS: [&str; 2] = ["homebrew", "etaHEN/games"];

/// Folders that are never treated as dumps.
pub const JUNK_DIR_NAMES: [&str; 6] = [
    "$RECYCLE.BIN",
    "System Volume Information",
    "lost+found",
    ".Trashes",
    ".Spotlight-V100",
    ".fseventsd",
];

/// Remote roots that may hold dumps.
///
/// Order matters: the paths the console almost always exposes come first, so a
/// flaky server gets as few round-trips as possible on paths that don't exist.
/// Only ext0 and ext1 exist for extended storage.
pub static CANDIDATE_ROOTS: Lazy<Vec<String>> = Lazy::new(|| {
    let mut roots: Vec<String> = vec![
        "/mnt/usb0/homebrew/".to_string(),
        "/mnt/usb0/etaHEN/games/".to_string(),
        "/mnt/ext0/homebrew/".to_string(),
        "/mnt/ext0/etaHEN/games/".to_string(),
        "/mnt/ext1/homebrew/".to_string(),
        "/mnt/ext1/etaHEN/games/".to_string(),
        "/data/homebrew/".to_string(),
        "/data/etaHEN/games/".to_string(),
    ];
    roots.extend((1..8).map(|i| format!("/mnt/usb{}/homebrew/", i)));
    roots.extend((1..7).map(|i| format!("/mnt/usb{}/etaHEN/games/", i)));
    roots
});

static USB_SLOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/mnt/usb(\d+)").expect("valid usb regex"));
static EXT_SLOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/mnt/ext(\d+)").expect("valid ext regex"));

const MAX_USB_SLOT: u8 = 7;
const MAX_EXT_SLOT: u8 = 1;

/// Map a remote path to the storage it lives on.
///
/// Works for both `homebrew/` and `etaHEN/games/` layouts:
/// - `/data/...` is internal storage
/// - `/mnt/usbN/...` is USB slot N (0-7), plain `usb` otherwise
/// - `/mnt/extN/...` is extended storage N (0-1), plain `external` otherwise
pub fn classify_location(path: &str) -> LocationTag {
    if path.starts_with("/data/") {
        LocationTag::Internal
    } else if path.starts_with("/mnt/usb") {
        match slot_index(&USB_SLOT, path) {
            Some(n) if n <= MAX_USB_SLOT => LocationTag::UsbSlot(n),
            _ => LocationTag::Usb,
        }
    } else if path.starts_with("/mnt/ext") {
        match slot_index(&EXT_SLOT, path) {
            Some(n) if n <= MAX_EXT_SLOT => LocationTag::ExtSlot(n),
            _ => LocationTag::External,
        }
    } else {
        LocationTag::Unknown
    }
}

fn slot_index(pattern: &Regex, path: &str) -> Option<u8> {
    // Huge digit runs overflow u8 and fall through to the generic tag.
    pattern
        .captures(path)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

/// Final path segment, ignoring a trailing slash.
pub fn display_name_of(path: &str) -> String {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Join a listing entry onto its parent. Absolute entries are kept as-is
/// because some servers answer NLST with full paths.
pub fn join_remote(parent: &str, entry: &str) -> String {
    if entry.starts_with('/') {
        entry.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), entry)
    }
}

pub fn is_junk_name(name: &str) -> bool {
    name == "." || name == ".." || JUNK_DIR_NAMES.iter().any(|junk| *junk == name)
}
