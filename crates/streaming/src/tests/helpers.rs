use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use rows::serialization::{write_partition, CodecContext};
use rows::*;
use uuid::Uuid;

use crate::*;

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

pub fn counters_table() -> Arc<TableMetadata> {
    Arc::new(
        TableMetadata::builder("ks", "page_views")
            .clustering("day", ColumnType::Int)
            .regular("views", ColumnType::Counter)
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

/// `n` partitions in token order, the way a sender emits them.
pub fn sorted_partitions(meta: &TableMetadata, n: usize) -> Vec<Partition> {
    let mut parts: Vec<Partition> = (0..n)
        .map(|i| partition(meta, &format!("key-{i}"), (i % 3) as i64 + 1))
        .collect();
    parts.sort_by(|a, b| a.key.cmp(&b.key));
    parts
}

pub fn sender_header(meta: &TableMetadata) -> SerializationHeader {
    SerializationHeader::for_metadata(meta, EncodingStats::NO_STATS)
}

/// Encodes each partition separately, as the sender would stream them.
pub fn encode_each(
    meta: &TableMetadata,
    partitions: &[Partition],
    version: FormatVersion,
) -> anyhow::Result<Vec<Vec<u8>>> {
    let header = sender_header(meta);
    let ctx = CodecContext::new(
        meta,
        Some(&header),
        DeserializationHelper::new(DeserializationFlag::PreserveSize),
    );
    partitions
        .iter()
        .map(|p| {
            let mut buf = Vec::new();
            write_partition(&mut buf, p, version, &ctx)?;
            Ok(buf)
        })
        .collect()
}

pub fn encode_segment(
    meta: &TableMetadata,
    partitions: &[Partition],
    version: FormatVersion,
) -> anyhow::Result<Vec<u8>> {
    Ok(encode_each(meta, partitions, version)?.concat())
}

pub fn descriptor(meta: &TableMetadata, total_size: u64, version: FormatVersion) -> TransferDescriptor {
    let header = (version != FormatVersion::Legacy)
        .then(|| SerializationHeaderComponent::from_metadata(meta, EncodingStats::NO_STATS));
    TransferDescriptor {
        table_id: meta.id,
        estimated_keys: 16,
        sections: vec![SectionBounds::new(0, total_size)],
        version,
        format: SSTableFormat::Big,
        repaired_at: 0,
        pending_repair: None,
        level: 0,
        header,
        file_seq_num: 7,
    }
}

// ---- Collaborators ----

pub struct TestSession {
    pub plan_id: Uuid,
    pub pending_repair: Option<Uuid>,
    /// Report cancellation once this many partitions were received.
    pub cancel_after: Option<usize>,
    pub progress: Mutex<Vec<ProgressInfo>>,
}

impl TestSession {
    pub fn new() -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            pending_repair: None,
            cancel_after: None,
            progress: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<ProgressInfo> {
        self.progress.lock().unwrap().clone()
    }
}

impl StreamSession for TestSession {
    fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    fn peer(&self) -> &str {
        "10.0.0.2:7000"
    }

    fn pending_repair(&self) -> Option<Uuid> {
        self.pending_repair
    }

    fn progress(&self, info: ProgressInfo) {
        self.progress.lock().unwrap().push(info);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_after
            .is_some_and(|n| self.progress.lock().unwrap().len() >= n)
    }
}

#[derive(Default)]
pub struct Catalog(pub HashMap<TableId, Arc<TableMetadata>>);

impl Catalog {
    pub fn with(meta: &Arc<TableMetadata>) -> Self {
        let mut tables = HashMap::new();
        tables.insert(meta.id, Arc::clone(meta));
        Self(tables)
    }
}

impl TableCatalog for Catalog {
    fn table(&self, id: TableId) -> Option<Arc<TableMetadata>> {
        self.0.get(&id).cloned()
    }
}

pub struct Ranges(pub Vec<TokenRange>);

impl Ranges {
    pub fn full_ring() -> Self {
        Self(vec![TokenRange::full_ring()])
    }
}

impl RangeOracle for Ranges {
    fn owned_ranges(&self, _keyspace: &str) -> Vec<TokenRange> {
        TokenRange::normalize(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created { total_size: u64 },
    Appended(DecoratedKey),
    Aborted(String),
}

pub type Events = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
pub struct RecordingFactory {
    pub events: Events,
    pub no_space: bool,
    /// Fail the append with this index (0-based).
    pub fail_append: Option<usize>,
}

impl RecordingFactory {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn appended_keys(&self) -> Vec<DecoratedKey> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Appended(k) => Some(k),
                _ => None,
            })
            .collect()
    }
}

impl WriterFactory for RecordingFactory {
    type Writer = RecordingWriter;

    fn create_writer(&self, params: &WriterParams) -> Result<RecordingWriter, StreamError> {
        if self.no_space {
            return Err(StreamError::NoSpace {
                required: params.total_size,
            });
        }
        self.events.lock().unwrap().push(Event::Created {
            total_size: params.total_size,
        });
        Ok(RecordingWriter {
            events: Arc::clone(&self.events),
            partitions: Vec::new(),
            appends: 0,
            fail_append: self.fail_append,
        })
    }
}

pub struct RecordingWriter {
    events: Events,
    pub partitions: Vec<Partition>,
    appends: usize,
    fail_append: Option<usize>,
}

impl SegmentWriter for RecordingWriter {
    fn append(&mut self, partition: &mut dyn UnfilteredPartition) -> anyhow::Result<()> {
        let n = self.appends;
        self.appends += 1;
        if self.fail_append == Some(n) {
            bail!("disk full while appending");
        }
        let p = Partition::collect_from(partition);
        if let Some(e) = partition.failure() {
            bail!("partition {} ended early: {}", p.key, e);
        }
        self.events.lock().unwrap().push(Event::Appended(p.key.clone()));
        self.partitions.push(p);
        Ok(())
    }

    fn abort(&mut self, cause: &StreamError) {
        self.events.lock().unwrap().push(Event::Aborted(cause.to_string()));
        self.partitions.clear();
    }

    fn filename(&self) -> String {
        "nb-1-big-Data.db".to_string()
    }
}

pub struct Node {
    pub catalog: Catalog,
    pub ranges: Ranges,
    pub writers: RecordingFactory,
    pub metrics: StorageMetrics,
    pub nospam: NoSpamLogger,
    pub policy: OutOfRangePolicy,
}

impl Node {
    pub fn new(meta: &Arc<TableMetadata>) -> Self {
        Self {
            catalog: Catalog::with(meta),
            ranges: Ranges::full_ring(),
            writers: RecordingFactory::default(),
            metrics: StorageMetrics::new(),
            nospam: NoSpamLogger::with_clock(
                std::time::Duration::from_secs(1),
                Arc::new(|| std::time::Duration::ZERO),
            ),
            policy: OutOfRangePolicy {
                log: true,
                reject: true,
            },
        }
    }

    pub fn context<'a>(&'a self, session: &'a TestSession) -> ReceiveContext<'a, RecordingFactory> {
        ReceiveContext {
            session,
            catalog: &self.catalog,
            oracle: &self.ranges,
            writers: &self.writers,
            policy: self.policy,
            metrics: &self.metrics,
            nospam: &self.nospam,
        }
    }

    pub fn receive(
        &self,
        session: &TestSession,
        descriptor: TransferDescriptor,
        bytes: &[u8],
    ) -> Result<RecordingWriter, StreamError> {
        StreamReader::new(descriptor, self.context(session))?.read(bytes)
    }
}

/// Owned ranges covering every token except those of `excluded`.
pub fn ranges_excluding(excluded: &[Token]) -> Vec<TokenRange> {
    let mut sorted = excluded.to_vec();
    sorted.sort();
    let mut ranges = Vec::new();
    let mut left = Token::MIN;
    for t in sorted {
        // (left, t - 1] then continue after t.
        ranges.push(TokenRange::new(left, Token(t.0 - 1)));
        left = t;
    }
    ranges.push(TokenRange::new(left, Token::MIN));
    ranges
}
