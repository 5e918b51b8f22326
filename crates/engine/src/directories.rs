/// Data directory space accounting.
///
/// A directory's usage is the total size of the segment files in it,
/// finished or still being written. Directories without a configured
/// capacity are treated as unbounded.
///
/// Space promised to transfers still in flight is tracked separately as a
/// [`Reservation`], so concurrent transfers cannot all pick the same nearly
/// full directory. A reservation is held until its segment is finished or
/// aborted.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use config::DataDirectory;
use sstable::TMP_SUFFIX;

#[derive(Debug, Clone)]
pub struct Directories {
    dirs: Vec<DataDirectory>,
    /// Bytes reserved by in-flight transfers, indexed like `dirs`.
    reserved: Arc<Mutex<Vec<u64>>>,
}

impl Directories {
    pub fn new(dirs: Vec<DataDirectory>) -> Self {
        let reserved = Arc::new(Mutex::new(vec![0; dirs.len()]));
        Self { dirs, reserved }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(|d| d.path.as_path())
    }

    /// Bytes held by segment files in `dir`.
    pub fn used_bytes(dir: &Path) -> u64 {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.ends_with(".sst") || n.ends_with(TMP_SUFFIX))
                    .unwrap_or(false)
            })
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Bytes that can still be written to `dir`, ignoring reservations.
    pub fn available_bytes(dir: &DataDirectory) -> u64 {
        match dir.capacity {
            Some(capacity) => capacity.saturating_sub(Self::used_bytes(&dir.path)),
            None => u64::MAX,
        }
    }

    /// Bytes currently reserved in the `index`-th directory.
    pub fn reserved_bytes(&self, index: usize) -> u64 {
        lock(&self.reserved).get(index).copied().unwrap_or(0)
    }

    /// Reserves `size` bytes in the directory with the most room left, if
    /// any can take them once existing reservations are accounted for.
    pub fn writeable_location(&self, size: u64) -> Option<Reservation> {
        let mut reserved = lock(&self.reserved);
        // Ties go to the first listed directory.
        let (_, index) = self
            .dirs
            .iter()
            .enumerate()
            .rev()
            .map(|(i, d)| (Self::available_bytes(d).saturating_sub(reserved[i]), i))
            .filter(|(available, _)| *available >= size)
            .max_by_key(|(available, _)| *available)?;
        let dir = &self.dirs[index];
        // Unbounded directories never run out, so nothing is held there.
        let held = if dir.capacity.is_some() { size } else { 0 };
        reserved[index] = reserved[index].saturating_add(held);
        Some(Reservation {
            path: dir.path.clone(),
            index,
            size: held,
            reserved: Arc::clone(&self.reserved),
        })
    }

    /// First directory holding `filename`.
    pub fn locate(&self, filename: &str) -> Option<PathBuf> {
        self.paths().map(|p| p.join(filename)).find(|p| p.exists())
    }
}

/// Space held in one directory for a segment being received. Released on
/// drop.
#[derive(Debug)]
pub struct Reservation {
    path: PathBuf,
    index: usize,
    size: u64,
    reserved: Arc<Mutex<Vec<u64>>>,
}

impl Reservation {
    /// Directory the space is reserved in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(held) = lock(&self.reserved).get_mut(self.index) {
            *held = held.saturating_sub(self.size);
        }
    }
}

fn lock(reserved: &Mutex<Vec<u64>>) -> MutexGuard<'_, Vec<u64>> {
    reserved.lock().unwrap_or_else(PoisonError::into_inner)
}
