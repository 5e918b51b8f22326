use std::io::Cursor;

use super::helpers::*;
use crate::*;
use anyhow::Result;
use rows::*;
use uuid::Uuid;

fn last_is_abort(events: &[Event]) -> bool {
    matches!(events.last(), Some(Event::Aborted(_)))
}

// ---- Successful transfers ----

#[test]
fn receives_every_partition_and_reports_progress() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 6);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let total = bytes.len() as u64;
    let node = Node::new(&meta);
    let session = TestSession::new();

    let writer = node.receive(&session, descriptor(&meta, total, FormatVersion::V3), &bytes)?;

    assert_eq!(writer.partitions, parts);
    assert_eq!(node.writers.events()[0], Event::Created { total_size: total });

    let reports = session.reports();
    assert_eq!(reports.len(), parts.len());
    assert!(reports.windows(2).all(|w| w[0].bytes_read < w[1].bytes_read));
    let last = reports.last().unwrap();
    assert_eq!(last.bytes_read, total);
    assert_eq!(last.total_size, total);
    assert_eq!(last.direction, Direction::In);
    assert_eq!(last.file_name, "nb-1-big-Data.db-7");
    assert_eq!(node.metrics.total_ops_for_invalid_token.get(), 0);
    Ok(())
}

#[test]
fn every_format_version_yields_the_same_partitions() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 4);
    for version in [FormatVersion::Legacy, FormatVersion::V2, FormatVersion::V3] {
        let bytes = encode_segment(&meta, &parts, version)?;
        let node = Node::new(&meta);
        let writer = node.receive(
            &TestSession::new(),
            descriptor(&meta, bytes.len() as u64, version),
            &bytes,
        )?;
        assert_eq!(writer.partitions, parts, "{version}");
    }
    Ok(())
}

#[test]
fn counter_rows_reach_the_writer_marked() -> Result<()> {
    let meta = counters_table();
    let p = Partition::new(meta.decorate_key(b"home".to_vec())).with(
        Row::regular(Clustering(vec![1i32.to_be_bytes().to_vec()]))
            .with_cell(Cell::live("views", 5, 9i64.to_be_bytes().to_vec())),
    );
    let bytes = encode_segment(&meta, &[p], FormatVersion::V3)?;
    let node = Node::new(&meta);
    let writer = node.receive(
        &TestSession::new(),
        descriptor(&meta, bytes.len() as u64, FormatVersion::V3),
        &bytes,
    )?;

    let row = writer.partitions[0].unfiltereds[0].as_row().unwrap();
    assert!(row.is_counter_local_to_be_cleared());
    Ok(())
}

#[test]
fn empty_segment_reads_nothing() -> Result<()> {
    let meta = events_table();
    let node = Node::new(&meta);
    let session = TestSession::new();
    let writer = node.receive(&session, descriptor(&meta, 0, FormatVersion::V3), &[])?;
    assert!(writer.partitions.is_empty());
    assert!(session.reports().is_empty());
    Ok(())
}

// ---- Setup failures ----

#[test]
fn dropped_table_fails_before_any_writer() -> Result<()> {
    let meta = events_table();
    let bytes = encode_segment(&meta, &sorted_partitions(&meta, 2), FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.catalog = Catalog::default();

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();
    assert!(matches!(err, Some(StreamError::TableGone { table_id }) if table_id == meta.id));
    assert!(node.writers.events().is_empty());
    Ok(())
}

#[test]
fn no_space_fails_before_reading() -> Result<()> {
    let meta = events_table();
    let bytes = encode_segment(&meta, &sorted_partitions(&meta, 2), FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.writers.no_space = true;
    let mut input = Cursor::new(bytes.clone());
    let session = TestSession::new();

    let reader = StreamReader::new(
        descriptor(&meta, bytes.len() as u64, FormatVersion::V3),
        node.context(&session),
    )?;
    let err = reader.read(&mut input).err();

    assert!(matches!(err, Some(StreamError::NoSpace { required }) if required == bytes.len() as u64));
    assert_eq!(input.position(), 0);
    Ok(())
}

#[test]
fn unresolvable_header_column_is_a_decode_error() -> Result<()> {
    let meta = events_table();
    let bytes = encode_segment(&meta, &sorted_partitions(&meta, 1), FormatVersion::V3)?;
    let node = Node::new(&meta);
    let mut d = descriptor(&meta, bytes.len() as u64, FormatVersion::V3);
    if let Some(header) = d.header.as_mut() {
        header.regular_columns.push(("added_later".to_string(), ColumnType::Text));
    }

    let err = node.receive(&TestSession::new(), d, &bytes).err();
    assert!(matches!(
        err,
        Some(StreamError::Decode { source: DecodeError::UnknownColumn { .. }, .. })
    ));
    assert!(node.writers.events().is_empty());
    Ok(())
}

#[test]
fn pending_repair_must_match_the_session() -> Result<()> {
    let meta = events_table();
    let node = Node::new(&meta);
    let repair = Uuid::new_v4();
    let mut session = TestSession::new();
    session.pending_repair = Some(repair);

    let mut d = descriptor(&meta, 0, FormatVersion::V3);
    d.pending_repair = Some(Uuid::new_v4());
    let err = StreamReader::new(d.clone(), node.context(&session)).err();
    assert!(matches!(err, Some(StreamError::PendingRepairMismatch { session, .. }) if session == repair));

    d.pending_repair = Some(repair);
    assert!(StreamReader::new(d, node.context(&session)).is_ok());
    Ok(())
}

#[test]
fn overflowing_section_sizes_fail_before_a_writer_exists() -> Result<()> {
    let meta = events_table();
    let node = Node::new(&meta);
    let session = TestSession::new();
    let mut d = descriptor(&meta, 0, FormatVersion::V3);
    d.sections = vec![SectionBounds::new(0, u64::MAX), SectionBounds::new(0, 10)];

    let err = StreamReader::new(d, node.context(&session)).err();
    assert!(matches!(
        err,
        Some(StreamError::Decode { key: None, source: DecodeError::Malformed(_) })
    ));
    assert!(node.writers.events().is_empty());
    Ok(())
}

// ---- Failures mid-stream ----

#[test]
fn corrupt_fifth_partition_aborts_after_four_appends() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 10);
    let mut chunks = encode_each(&meta, &parts, FormatVersion::V3)?;
    // A zero key length is never valid.
    chunks[4][0] = 0;
    chunks[4][1] = 0;
    let bytes = chunks.concat();
    let node = Node::new(&meta);

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();

    assert!(matches!(err, Some(StreamError::Decode { source: DecodeError::Malformed(_), .. })));
    let keys: Vec<DecoratedKey> = parts[..4].iter().map(|p| p.key.clone()).collect();
    assert_eq!(node.writers.appended_keys(), keys);
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

#[test]
fn corrupt_row_in_fifth_partition_is_not_committed() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 10);
    let mut chunks = encode_each(&meta, &parts, FormatVersion::V3)?;
    // Key, deletion and static row encode the same without the rows, so the
    // first row starts where the empty partition's end marker sits.
    let head = Partition {
        unfiltereds: Vec::new(),
        ..parts[4].clone()
    };
    let first_row = encode_each(&meta, &[head], FormatVersion::V3)?[0].len() - 1;
    chunks[4][first_row] = 0x40;
    let bytes = chunks.concat();
    let node = Node::new(&meta);

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();

    match err {
        Some(StreamError::Decode {
            key: Some(key),
            source: DecodeError::Malformed(msg),
        }) => {
            assert_eq!(key, parts[4].key);
            assert!(msg.contains("invalid row flags 0x40"), "{msg}");
        }
        other => panic!("expected a decode error, got {other:?}"),
    }
    let keys: Vec<DecoratedKey> = parts[..4].iter().map(|p| p.key.clone()).collect();
    assert_eq!(node.writers.appended_keys(), keys);
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

#[test]
fn truncated_stream_fails_instead_of_hanging() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 3);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let node = Node::new(&meta);
    let short = &bytes[..bytes.len() - 5];

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), short)
        .err();

    match err {
        Some(StreamError::Decode { key, source: DecodeError::Truncated }) => {
            assert_eq!(key.as_ref(), Some(&parts[2].key));
        }
        other => panic!("expected truncation, got {other:?}"),
    }
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

#[test]
fn stream_longer_than_declared_is_not_overread() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 3);
    let chunks = encode_each(&meta, &parts, FormatVersion::V3)?;
    let bytes = chunks.concat();
    // Declare one byte less than the first two partitions take.
    let declared = (chunks[0].len() + chunks[1].len() - 1) as u64;
    let node = Node::new(&meta);
    let mut input = Cursor::new(bytes);
    let session = TestSession::new();

    let reader = StreamReader::new(
        descriptor(&meta, declared, FormatVersion::V3),
        node.context(&session),
    )?;
    let err = reader.read(&mut input).err();

    assert!(matches!(err, Some(StreamError::Decode { source: DecodeError::Truncated, .. })));
    assert_eq!(input.position(), declared);
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

#[test]
fn write_failure_is_attributed_to_the_partition() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 5);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.writers.fail_append = Some(2);

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();

    match err {
        Some(e @ StreamError::Write { .. }) => {
            assert!(e.is_local());
            assert_eq!(e.partition_key(), Some(&parts[2].key));
        }
        other => panic!("expected write failure, got {other:?}"),
    }
    assert_eq!(node.writers.appended_keys().len(), 2);
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

#[test]
fn cancellation_is_observed_between_partitions() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 5);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let node = Node::new(&meta);
    let mut session = TestSession::new();
    session.cancel_after = Some(2);

    let err = node
        .receive(&session, descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();

    assert!(matches!(err, Some(StreamError::Cancelled)));
    assert_eq!(node.writers.appended_keys().len(), 2);
    assert!(last_is_abort(&node.writers.events()));
    Ok(())
}

// ---- Owned ranges ----

#[test]
fn out_of_range_key_is_rejected_after_abort() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 5);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.ranges = Ranges(ranges_excluding(&[parts[3].key.token()]));

    let err = node
        .receive(&TestSession::new(), descriptor(&meta, bytes.len() as u64, FormatVersion::V3), &bytes)
        .err();

    match err {
        Some(StreamError::OutOfRange { key, segment, .. }) => {
            assert_eq!(key, parts[3].key);
            assert_eq!(segment, "nb-1-big-Data.db");
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
    let events = node.writers.events();
    assert_eq!(node.writers.appended_keys().len(), 3);
    assert!(last_is_abort(&events));
    assert_eq!(node.metrics.total_ops_for_invalid_token.get(), 1);
    Ok(())
}

#[test]
fn out_of_range_keys_are_only_logged_when_rejection_is_off() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 8);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.policy = OutOfRangePolicy {
        log: true,
        reject: false,
    };
    node.ranges = Ranges(ranges_excluding(&[parts[1].key.token(), parts[5].key.token()]));

    let writer = node.receive(
        &TestSession::new(),
        descriptor(&meta, bytes.len() as u64, FormatVersion::V3),
        &bytes,
    )?;

    assert_eq!(writer.partitions, parts);
    assert_eq!(node.metrics.total_ops_for_invalid_token.get(), 2);
    assert_eq!(node.nospam.emitted(), 1);
    Ok(())
}

#[test]
fn single_out_of_range_key_counts_once() -> Result<()> {
    let meta = events_table();
    let parts = sorted_partitions(&meta, 4);
    let bytes = encode_segment(&meta, &parts, FormatVersion::V3)?;
    let mut node = Node::new(&meta);
    node.policy = OutOfRangePolicy {
        log: true,
        reject: false,
    };
    node.ranges = Ranges(ranges_excluding(&[parts[0].key.token()]));

    node.receive(
        &TestSession::new(),
        descriptor(&meta, bytes.len() as u64, FormatVersion::V3),
        &bytes,
    )?;
    assert_eq!(node.metrics.total_ops_for_invalid_token.get(), 1);
    Ok(())
}
