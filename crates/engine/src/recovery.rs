/// Cold-start recovery.
///
/// Removes what interrupted transfers left behind and reconciles the
/// manifest with the segment files actually present on disk.
use anyhow::Result;
use std::path::Path;
use tracing::{debug, warn};

use sstable::TMP_SUFFIX;

use crate::directories::Directories;
use crate::manifest::Manifest;

/// Deletes leftover `.sst.tmp` files from interrupted transfers, returning
/// how many were removed.
pub fn cleanup_tmp_files(dir: &Path) -> usize {
    let mut removed = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(TMP_SUFFIX) {
                    match std::fs::remove_file(&p) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(path = %p.display(), error = %e, "failed to remove tmp segment"),
                    }
                }
            }
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "removed leftover tmp segments");
    }
    removed
}

/// Drops manifest entries whose file no longer exists in any data
/// directory. Saves the manifest if anything changed and returns the
/// total size of the segments that remain.
pub fn reconcile_manifest(manifest: &mut Manifest, dirs: &Directories) -> Result<u64> {
    let mut missing = Vec::new();
    let mut load = 0u64;
    for entry in &manifest.entries {
        match dirs.locate(&entry.filename) {
            Some(path) => load += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            None => {
                warn!(
                    table_id = %entry.table_id,
                    filename = %entry.filename,
                    "segment listed in manifest is missing, dropping it"
                );
                missing.push(entry.filename.clone());
            }
        }
    }
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(String::as_str).collect();
        manifest.remove_files(&names);
        manifest.save()?;
    }
    Ok(load)
}
