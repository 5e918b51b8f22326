/// # Manifest - Received Segment Registry
///
/// Records every segment the node has accepted, with the table it belongs
/// to and its compaction level, so the engine can find its data again after
/// a restart.
///
/// ## File Format
///
/// A text file with one segment per line:
///
/// ```text
/// L0:6f1c1a8e-52e4-4c57-9b65-2f0d6f3c2b1a:events-big-3c2e....sst
/// L2:0b3e4f2a-8d7c-4a1e-9f6b-1c2d3e4f5a6b:users-big-9a8b....sst
/// ```
///
/// Lines starting with `#` are comments. Empty lines are ignored.
///
/// ## Crash Safety
///
/// The manifest is rewritten atomically: write to a `.tmp` file, fsync, then
/// rename over the existing manifest. A segment file is only listed once it
/// has been finished under its final name.
use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use rows::TableId;

/// Name of the manifest file within the first data directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// One accepted segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    pub level: u32,
    pub table_id: TableId,
    /// Basename of the segment file.
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    /// Entries in the order they were accepted.
    pub entries: Vec<SegmentEntry>,
}

impl Manifest {
    /// Loads `dir/MANIFEST`, or starts an empty manifest if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest file exists but cannot be parsed.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read manifest line {}", line_num + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(
                parse_entry(trimmed).with_context(|| format!("manifest line {}", line_num + 1))?,
            );
        }
        Ok(Self { path, entries })
    }

    /// Persists the current state to disk.
    ///
    /// Falls back to truncate-and-write when the rename over the existing
    /// file is refused (Windows keeps recently read files locked).
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create manifest tmp at {}", tmp_path.display()))?;
            Self::write_contents(&mut f, &self.entries)?;
            f.flush()?;
            f.sync_all()?;
        }

        if fs::rename(&tmp_path, &self.path).is_err() {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("failed to open manifest at {}", self.path.display()))?;
            Self::write_contents(&mut f, &self.entries)?;
            f.flush()?;
            f.sync_all()?;
            let _ = fs::remove_file(&tmp_path);
        }
        Ok(())
    }

    fn write_contents(f: &mut File, entries: &[SegmentEntry]) -> Result<()> {
        writeln!(f, "# RiptideKV Segment Manifest")?;
        writeln!(f, "# Format: L<level>:<table-id>:<filename>")?;
        for entry in entries {
            writeln!(f, "L{}:{}:{}", entry.level, entry.table_id, entry.filename)?;
        }
        Ok(())
    }

    /// Appends an entry (does **not** save to disk).
    pub fn add(&mut self, entry: SegmentEntry) {
        self.entries.push(entry);
    }

    /// Segments of `table_id`, oldest first.
    pub fn for_table(&self, table_id: TableId) -> Vec<&SegmentEntry> {
        self.entries.iter().filter(|e| e.table_id == table_id).collect()
    }

    /// Removes and returns every entry of `table_id`.
    pub fn remove_table(&mut self, table_id: TableId) -> Vec<SegmentEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.table_id == table_id);
        self.entries = kept;
        removed
    }

    /// Removes all entries matching the given filenames.
    pub fn remove_files(&mut self, filenames: &[&str]) {
        self.entries
            .retain(|e| !filenames.contains(&e.filename.as_str()));
    }
}

/// Parses `L<level>:<table-id>:<filename>`.
fn parse_entry(line: &str) -> Result<SegmentEntry> {
    let mut parts = line.splitn(3, ':');
    let (Some(level), Some(table_id), Some(filename)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("invalid format (expected 'L<level>:<table-id>:<filename>'): {}", line);
    };
    let level = level
        .strip_prefix('L')
        .and_then(|n| n.parse::<u32>().ok())
        .with_context(|| format!("unknown level '{}'", level))?;
    let table_id = Uuid::parse_str(table_id)
        .map(TableId)
        .with_context(|| format!("invalid table id '{}'", table_id))?;
    if filename.is_empty() || filename.contains(['/', '\\']) {
        bail!("invalid segment filename '{}'", filename);
    }
    Ok(SegmentEntry {
        level,
        table_id,
        filename: filename.to_string(),
    })
}
