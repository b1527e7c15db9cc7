use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::Disks;
use tracing::debug;

/// A mounted volume the user can pick as a local backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub path: PathBuf,
    pub is_removable: bool,
    pub label: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Mounted volumes worth offering, removable ones first.
pub fn available_volumes() -> Vec<VolumeInfo> {
    let disks = Disks::new_with_refreshed_list();
    let mut volumes: Vec<VolumeInfo> = disks
        .list()
        .iter()
        .filter(|disk| is_user_volume(disk.mount_point(), disk.is_removable()))
        .map(|disk| {
            let mount = disk.mount_point();
            let name = disk.name().to_string_lossy();
            let label = if name.is_empty() {
                mount
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| mount.display().to_string())
            } else {
                name.into_owned()
            };
            VolumeInfo {
                path: mount.to_path_buf(),
                is_removable: disk.is_removable(),
                label,
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
            }
        })
        .collect();

    volumes.sort_by(|a, b| b.is_removable.cmp(&a.is_removable).then_with(|| a.path.cmp(&b.path)));
    volumes.dedup_by(|a, b| a.path == b.path);
    debug!("Found {} volumes", volumes.len());
    volumes
}

/// Drop system mounts. Anything removable is kept; otherwise only the
/// places each OS mounts user drives.
fn is_user_volume(mount: &Path, removable: bool) -> bool {
    if removable {
        return true;
    }
    if cfg!(windows) {
        return true;
    }
    if cfg!(target_os = "macos") {
        return mount.starts_with("/Volumes");
    }
    ["/mnt", "/media", "/run/media"]
        .iter()
        .any(|prefix| mount.starts_with(prefix) && mount != Path::new(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removable_always_kept() {
        assert!(is_user_volume(Path::new("/"), true));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_mount_filter() {
        assert!(is_user_volume(Path::new("/media/alex/USB"), false));
        assert!(is_user_volume(Path::new("/mnt/games"), false));
        assert!(is_user_volume(Path::new("/run/media/alex/SSD"), false));
        assert!(!is_user_volume(Path::new("/"), false));
        assert!(!is_user_volume(Path::new("/boot/efi"), false));
        assert!(!is_user_volume(Path::new("/mnt"), false));
    }

    #[test]
    fn test_listing_does_not_panic() {
        let volumes = available_volumes();
        assert!(volumes.windows(2).all(|w| w[0].path != w[1].path));
    }
}
