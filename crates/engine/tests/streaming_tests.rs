use std::collections::BTreeSet;

use anyhow::Result;
use config::{DataDirectory, StreamingConfig};
use engine::{Directories, Engine};
use rows::serialization::{write_partition, CodecContext};
use rows::*;
use streaming::{ProgressInfo, SSTableFormat, SectionBounds, StreamError, StreamSession, TransferDescriptor};
use tempfile::tempdir;
use uuid::Uuid;

struct Peer {
    plan_id: Uuid,
    pending_repair: Option<Uuid>,
}

impl Peer {
    fn new() -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            pending_repair: None,
        }
    }
}

impl StreamSession for Peer {
    fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    fn peer(&self) -> &str {
        "10.0.0.9:7000"
    }

    fn pending_repair(&self) -> Option<Uuid> {
        self.pending_repair
    }

    fn progress(&self, _info: ProgressInfo) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

fn users_table() -> TableMetadata {
    TableMetadata::builder("app", "users")
        .clustering("attr", ColumnType::Text)
        .static_column("region", ColumnType::Text)
        .regular("value", ColumnType::Text)
        .build()
}

fn users(meta: &TableMetadata, prefix: &str, n: usize) -> Vec<Partition> {
    let mut parts: Vec<Partition> = (0..n)
        .map(|i| {
            let name = format!("{prefix}-{i}");
            Partition::new(meta.decorate_key(name.clone().into_bytes()))
                .with_static_row(Row::empty_static().with_cell(Cell::live("region", 5, "eu")))
                .with(
                    Row::regular(Clustering(vec![b"email".to_vec()]))
                        .with_liveness(LivenessInfo::new(10))
                        .with_cell(Cell::live("value", 10, format!("{name}@example.com"))),
                )
        })
        .collect();
    parts.sort_by(|a, b| a.key.cmp(&b.key));
    parts
}

fn encode(meta: &TableMetadata, parts: &[Partition], version: FormatVersion) -> Result<(Vec<u8>, TransferDescriptor)> {
    let header = SerializationHeader::for_metadata(meta, EncodingStats::NO_STATS);
    let ctx = CodecContext::new(
        meta,
        Some(&header),
        DeserializationHelper::new(DeserializationFlag::PreserveSize),
    );
    let mut bytes = Vec::new();
    for p in parts {
        write_partition(&mut bytes, p, version, &ctx)?;
    }
    let descriptor = TransferDescriptor {
        table_id: meta.id,
        estimated_keys: parts.len() as u64,
        sections: vec![SectionBounds::new(0, bytes.len() as u64)],
        version,
        format: SSTableFormat::Big,
        repaired_at: 0,
        pending_repair: None,
        level: 0,
        header: version
            .requires_header()
            .then(|| SerializationHeaderComponent::from_metadata(meta, EncodingStats::NO_STATS)),
        file_seq_num: 0,
    };
    Ok((bytes, descriptor))
}

fn open(dirs: Vec<DataDirectory>) -> Result<Engine> {
    Engine::open(StreamingConfig {
        data_directories: dirs,
        ..StreamingConfig::default()
    })
}

#[test]
fn every_version_lands_as_a_readable_segment() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(vec![DataDirectory::new(dir.path())])?;
    let meta = engine.create_table(users_table());
    engine.set_local_ranges("app", vec![TokenRange::full_ring()]);

    for version in [FormatVersion::Legacy, FormatVersion::V2, FormatVersion::V3] {
        let parts = users(&meta, &format!("{version}"), 12);
        let (bytes, descriptor) = encode(&meta, &parts, version)?;
        let entry = engine
            .receive_segment(bytes.as_slice(), descriptor, &Peer::new())?
            .expect("segment kept");
        assert_eq!(engine.open_segment(&entry)?.partitions()?, parts);
    }
    assert_eq!(engine.segments(meta.id).len(), 3);
    Ok(())
}

#[test]
fn concurrent_transfers_get_distinct_segments() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(vec![DataDirectory::new(dir.path())])?;
    let meta = engine.create_table(users_table());
    engine.set_local_ranges("app", vec![TokenRange::full_ring()]);

    let transfers: Vec<_> = (0..6)
        .map(|t| encode(&meta, &users(&meta, &format!("t{t}"), 40), FormatVersion::V3))
        .collect::<Result<_>>()?;

    std::thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = transfers
            .iter()
            .map(|(bytes, descriptor)| {
                let engine = &engine;
                let descriptor = descriptor.clone();
                s.spawn(move || engine.receive_segment(bytes.as_slice(), descriptor, &Peer::new()))
            })
            .collect();
        for h in handles {
            assert!(h.join().expect("transfer thread panicked")?.is_some());
        }
        Ok(())
    })?;

    let entries = engine.segments(meta.id);
    assert_eq!(entries.len(), 6);
    let names: BTreeSet<_> = entries.iter().map(|e| e.filename.clone()).collect();
    assert_eq!(names.len(), 6);
    let total: usize = entries
        .iter()
        .map(|e| engine.open_segment(e).map(|r| r.len()))
        .sum::<Result<usize>>()?;
    assert_eq!(total, 240);
    Ok(())
}

#[test]
fn segments_go_to_the_emptiest_directory() -> Result<()> {
    let root = tempdir()?;
    let dirs: Vec<_> = (0..3).map(|i| root.path().join(format!("d{i}"))).collect();
    let engine = open(dirs.iter().map(|d| DataDirectory::new(d).with_capacity(1 << 20)).collect())?;
    let meta = engine.create_table(users_table());
    engine.set_local_ranges("app", vec![TokenRange::full_ring()]);

    for t in 0..3 {
        let (bytes, descriptor) = encode(&meta, &users(&meta, &format!("t{t}"), 40), FormatVersion::V3)?;
        engine.receive_segment(bytes.as_slice(), descriptor, &Peer::new())?;
    }
    for d in &dirs {
        assert!(Directories::used_bytes(d) > 0, "{} left empty", d.display());
    }
    // The manifest lives in the first directory and lists all of them.
    let reopened = open(dirs.iter().map(DataDirectory::new).collect())?;
    assert_eq!(reopened.segment_count(), 3);
    Ok(())
}

#[test]
fn pending_ranges_are_accepted_during_bootstrap() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(vec![DataDirectory::new(dir.path())])?;
    let meta = engine.create_table(users_table());
    let parts = users(&meta, "boot", 10);
    let (bytes, descriptor) = encode(&meta, &parts, FormatVersion::V3)?;

    engine.set_pending_ranges("app", vec![TokenRange::full_ring()]);
    let entry = engine
        .receive_segment(bytes.as_slice(), descriptor, &Peer::new())?
        .expect("segment kept");
    assert_eq!(engine.open_segment(&entry)?.len(), 10);
    assert_eq!(engine.metrics().total_ops_for_invalid_token.get(), 0);
    Ok(())
}

#[test]
fn log_only_policy_keeps_stray_partitions() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(StreamingConfig {
        reject_out_of_token_range_requests: false,
        data_directories: vec![DataDirectory::new(dir.path())],
        ..StreamingConfig::default()
    })?;
    let meta = engine.create_table(users_table());
    let parts = users(&meta, "stray", 8);
    let (bytes, descriptor) = encode(&meta, &parts, FormatVersion::V3)?;

    let entry = engine
        .receive_segment(bytes.as_slice(), descriptor, &Peer::new())?
        .expect("segment kept");
    assert_eq!(engine.open_segment(&entry)?.len(), 8);
    assert_eq!(engine.metrics().total_ops_for_invalid_token.get(), 8);
    Ok(())
}

#[test]
fn truncated_transfer_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(vec![DataDirectory::new(dir.path())])?;
    let meta = engine.create_table(users_table());
    engine.set_local_ranges("app", vec![TokenRange::full_ring()]);
    let (bytes, descriptor) = encode(&meta, &users(&meta, "cut", 10), FormatVersion::V3)?;

    let cut = &bytes[..bytes.len() - 7];
    let err = engine
        .receive_segment(cut, descriptor, &Peer::new())
        .unwrap_err();
    assert!(matches!(err, StreamError::Decode { .. }), "{err}");
    assert!(!err.is_local());
    assert_eq!(engine.segment_count(), 0);
    let leftovers = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".sst"))
        .count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[test]
fn repair_session_rejects_foreign_segments() -> Result<()> {
    let dir = tempdir()?;
    let engine = open(vec![DataDirectory::new(dir.path())])?;
    let meta = engine.create_table(users_table());
    let (bytes, descriptor) = encode(&meta, &users(&meta, "r", 2), FormatVersion::V3)?;

    let session = Peer {
        plan_id: Uuid::new_v4(),
        pending_repair: Some(Uuid::new_v4()),
    };
    let err = engine
        .receive_segment(bytes.as_slice(), descriptor, &session)
        .unwrap_err();
    assert!(matches!(err, StreamError::PendingRepairMismatch { segment: None, .. }));
    Ok(())
}
