use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rows::serialization::{write_partition, CodecContext};
use rows::*;
use streaming::{StreamDeserializer, TrackedReader};

const N_PARTITIONS: usize = 2_000;
const ROWS_PER_PARTITION: i64 = 10;
const VALUE_SIZE: usize = 100;

fn table() -> Arc<TableMetadata> {
    Arc::new(
        TableMetadata::builder("bench", "events")
            .clustering("seq", ColumnType::BigInt)
            .regular("payload", ColumnType::Blob)
            .regular("kind", ColumnType::Text)
            .build(),
    )
}

fn build_segment(meta: &TableMetadata, version: FormatVersion) -> Vec<u8> {
    let header = SerializationHeader::for_metadata(meta, EncodingStats::NO_STATS);
    let ctx = CodecContext::new(
        meta,
        Some(&header),
        DeserializationHelper::new(DeserializationFlag::PreserveSize),
    );
    let mut partitions: Vec<Partition> = (0..N_PARTITIONS)
        .map(|i| {
            let mut p = Partition::new(meta.decorate_key(format!("key{}", i).into_bytes()));
            for r in 0..ROWS_PER_PARTITION {
                p = p.with(
                    Row::regular(Clustering(vec![r.to_be_bytes().to_vec()]))
                        .with_liveness(LivenessInfo::new(1_000 + r))
                        .with_cell(Cell::live("payload", 1_000 + r, vec![b'x'; VALUE_SIZE]))
                        .with_cell(Cell::live("kind", 1_000 + r, "click")),
                );
            }
            p
        })
        .collect();
    partitions.sort_by(|a, b| a.key.cmp(&b.key));

    let mut buf = Vec::new();
    for p in &partitions {
        write_partition(&mut buf, p, version, &ctx).unwrap();
    }
    buf
}

fn decode_all(meta: &Arc<TableMetadata>, bytes: &[u8], version: FormatVersion) -> usize {
    let header = (version != FormatVersion::Legacy)
        .then(|| SerializationHeader::for_metadata(meta, EncodingStats::NO_STATS));
    let input = TrackedReader::with_limit(bytes, bytes.len() as u64);
    let mut d = StreamDeserializer::new(Arc::clone(meta), input, version, header).unwrap();
    let mut entries = 0;
    while d.bytes_read() < bytes.len() as u64 {
        d.read_key().unwrap();
        entries += d.read_partition().unwrap().count();
        d.check_for_exceptions().unwrap();
    }
    entries
}

fn stream_decode_benchmark(c: &mut Criterion) {
    let meta = table();
    let mut group = c.benchmark_group("stream_decode");
    for version in [FormatVersion::Legacy, FormatVersion::V3] {
        let bytes = build_segment(&meta, version);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("{}_2k_partitions", version), |b| {
            b.iter_batched(
                || bytes.clone(),
                |bytes| decode_all(&meta, &bytes, version),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, stream_decode_benchmark);
criterion_main!(benches);
