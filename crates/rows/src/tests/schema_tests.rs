use crate::*;
use anyhow::Result;

fn users() -> TableMetadata {
    TableMetadata::builder("ks", "users")
        .clustering("ck", ColumnType::Int)
        .static_column("s", ColumnType::Text)
        .regular("name", ColumnType::Text)
        .regular("age", ColumnType::Int)
        .build()
}

#[test]
fn header_component_survives_the_wire() -> Result<()> {
    let meta = users();
    let stats = EncodingStats {
        min_timestamp: 1_000,
        min_local_deletion_time: 50,
        min_ttl: 3,
    };
    let component = SerializationHeaderComponent::from_metadata(&meta, stats);

    let mut buf = Vec::new();
    component.write_to(&mut buf)?;
    let decoded = SerializationHeaderComponent::read_from(&mut buf.as_slice())?;
    assert_eq!(decoded, component);

    let header = decoded.to_header(&meta)?;
    assert_eq!(header, SerializationHeader::for_metadata(&meta, stats));
    Ok(())
}

#[test]
fn unknown_column_fails_resolution() {
    let meta = users();
    let mut component = SerializationHeaderComponent::from_metadata(&meta, EncodingStats::NO_STATS);
    component.regular_columns.push(("email".to_string(), ColumnType::Text));

    let err = component.to_header(&meta).unwrap_err();
    match err {
        DecodeError::UnknownColumn { name } => assert_eq!(name, "email"),
        other => panic!("expected UnknownColumn, got {other:?}"),
    }
}

#[test]
fn dropped_column_resolves_as_dropped() -> Result<()> {
    let sender = TableMetadata::builder("ks", "users")
        .clustering("ck", ColumnType::Int)
        .regular("name", ColumnType::Text)
        .regular("legacy", ColumnType::Blob)
        .build();
    let local = TableMetadata::builder("ks", "users")
        .id(sender.id)
        .clustering("ck", ColumnType::Int)
        .regular("name", ColumnType::Text)
        .dropped("legacy", 77)
        .build();

    let header = SerializationHeaderComponent::from_metadata(&sender, EncodingStats::NO_STATS)
        .to_header(&local)?;
    let regular = header.regular_columns();
    assert_eq!(regular.len(), 2);
    assert!(!regular[0].is_dropped());
    assert!(regular[1].is_dropped());
    assert_eq!(regular[1].name(), "legacy");
    Ok(())
}

#[test]
fn clustering_arity_mismatch_is_malformed() {
    let meta = users();
    let mut component = SerializationHeaderComponent::from_metadata(&meta, EncodingStats::NO_STATS);
    component.clustering_types.push(ColumnType::Text);
    assert!(matches!(component.to_header(&meta), Err(DecodeError::Malformed(_))));
}

#[test]
fn column_type_mismatch_is_malformed() {
    let meta = users();
    let mut component = SerializationHeaderComponent::from_metadata(&meta, EncodingStats::NO_STATS);
    component.regular_columns[1].1 = ColumnType::BigInt;
    assert!(matches!(component.to_header(&meta), Err(DecodeError::Malformed(_))));
}

#[test]
fn counter_tables_are_detected() {
    let counters = TableMetadata::builder("ks", "hits")
        .regular("n", ColumnType::Counter)
        .build();
    assert!(counters.is_counter());
    assert!(!users().is_counter());
}

#[test]
fn fixed_width_values_are_validated() {
    assert!(ColumnType::Int.validate(&[0, 0, 0, 1]).is_ok());
    assert!(ColumnType::Int.validate(&[0, 1]).is_err());
    assert!(ColumnType::Text.validate(&[0xFF, 0xFE]).is_err());
    assert!(ColumnType::BigInt.validate(&[]).is_ok());
}
