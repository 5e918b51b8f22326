use std::fs;
use std::path::Path;
use std::sync::Mutex;

use config::{DataDirectory, StreamingConfig};
use rows::serialization::{write_partition, CodecContext};
use rows::*;
use streaming::{ProgressInfo, SSTableFormat, SectionBounds, StreamSession, TransferDescriptor};
use uuid::Uuid;

pub fn count_sst_files(dir: &Path) -> usize {
    count_with_suffix(dir, ".sst")
}

pub fn count_tmp_files(dir: &Path) -> usize {
    count_with_suffix(dir, ".sst.tmp")
}

fn count_with_suffix(dir: &Path, suffix: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.ends_with(suffix))
                .unwrap_or(false)
        })
        .count()
}

/// Configuration with a single unbounded data directory.
pub fn config_in(dir: &Path) -> StreamingConfig {
    StreamingConfig {
        data_directories: vec![DataDirectory::new(dir)],
        ..StreamingConfig::default()
    }
}

pub fn events_table() -> TableMetadata {
    TableMetadata::builder("ks", "events")
        .clustering("seq", ColumnType::BigInt)
        .regular("payload", ColumnType::Blob)
        .build()
}

/// `n` single-row partitions in token order.
pub fn partitions(meta: &TableMetadata, n: usize) -> Vec<Partition> {
    let mut parts: Vec<Partition> = (0..n)
        .map(|i| {
            Partition::new(meta.decorate_key(format!("key-{i}").into_bytes())).with(
                Row::regular(Clustering(vec![(i as i64).to_be_bytes().to_vec()]))
                    .with_liveness(LivenessInfo::new(1_000))
                    .with_cell(Cell::live("payload", 1_000, vec![i as u8; 16])),
            )
        })
        .collect();
    parts.sort_by(|a, b| a.key.cmp(&b.key));
    parts
}

/// Bytes and descriptor of a V3 transfer of `partitions`.
pub fn transfer(meta: &TableMetadata, partitions: &[Partition]) -> anyhow::Result<(Vec<u8>, TransferDescriptor)> {
    let header = SerializationHeader::for_metadata(meta, EncodingStats::NO_STATS);
    let ctx = CodecContext::new(
        meta,
        Some(&header),
        DeserializationHelper::new(DeserializationFlag::PreserveSize),
    );
    let mut bytes = Vec::new();
    for p in partitions {
        write_partition(&mut bytes, p, FormatVersion::V3, &ctx)?;
    }
    let descriptor = TransferDescriptor {
        table_id: meta.id,
        estimated_keys: partitions.len() as u64,
        sections: vec![SectionBounds::new(0, bytes.len() as u64)],
        version: FormatVersion::V3,
        format: SSTableFormat::Big,
        repaired_at: 0,
        pending_repair: None,
        level: 0,
        header: Some(SerializationHeaderComponent::from_metadata(meta, EncodingStats::NO_STATS)),
        file_seq_num: 1,
    };
    Ok((bytes, descriptor))
}

pub struct Session {
    plan_id: Uuid,
    pub progress: Mutex<Vec<ProgressInfo>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            progress: Mutex::new(Vec::new()),
        }
    }
}

impl StreamSession for Session {
    fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    fn peer(&self) -> &str {
        "10.0.0.3:7000"
    }

    fn pending_repair(&self) -> Option<Uuid> {
        None
    }

    fn progress(&self, info: ProgressInfo) {
        self.progress.lock().unwrap().push(info);
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}
