use tracing::warn;

use rows::UnfilteredPartition;
use sstable::SSTableWriter;

use crate::error::StreamError;
use crate::session::SegmentWriter;

impl SegmentWriter for SSTableWriter {
    fn append(&mut self, partition: &mut dyn UnfilteredPartition) -> anyhow::Result<()> {
        SSTableWriter::append(self, partition)
    }

    fn abort(&mut self, cause: &StreamError) {
        warn!(
            path = ?SSTableWriter::filename(self),
            partitions = self.partition_count(),
            error = %cause,
            "discarding partially received segment"
        );
        SSTableWriter::abort(self);
    }

    fn filename(&self) -> String {
        SSTableWriter::filename(self)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
