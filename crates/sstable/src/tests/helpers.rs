use rows::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{SSTableWriter, SegmentOptions};

pub fn events_table() -> Arc<TableMetadata> {
    Arc::new(
        TableMetadata::builder("ks", "events")
            .clustering("seq", ColumnType::BigInt)
            .static_column("owner", ColumnType::Text)
            .regular("payload", ColumnType::Blob)
            .regular("kind", ColumnType::Text)
            .build(),
    )
}

pub fn partition(meta: &TableMetadata, key: &str, rows: i64) -> Partition {
    let mut p = Partition::new(meta.decorate_key(key.as_bytes().to_vec()))
        .with_static_row(Row::empty_static().with_cell(Cell::live("owner", 10, key)));
    for i in 0..rows {
        p = p.with(
            Row::regular(Clustering(vec![i.to_be_bytes().to_vec()]))
                .with_liveness(LivenessInfo::new(100 + i))
                .with_cell(Cell::live("payload", 100 + i, vec![i as u8; 8]))
                .with_cell(Cell::live("kind", 100 + i, "click")),
        );
    }
    p
}

/// Writes `partitions` in the given order and finishes the segment.
pub fn write_segment(
    dir: &Path,
    name: &str,
    meta: &Arc<TableMetadata>,
    partitions: &[Partition],
    options: SegmentOptions,
) -> anyhow::Result<PathBuf> {
    let mut writer = SSTableWriter::create(dir, name, Arc::clone(meta), options)?;
    for p in partitions {
        writer.append(&mut p.iter(meta))?;
    }
    writer.finish()
}
