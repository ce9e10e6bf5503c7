use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use lazy_static::lazy_static;
use std::sync::Arc;

// Raw source schemas. Field names follow the wire format of each source:
// the catalog is already snake_case, the event log is camelCase.
pub fn raw_catalog_schema() -> Schema {
    Schema::new(vec![
        Field::new("song_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("artist_id", DataType::Utf8, false),
        Field::new("artist_name", DataType::Utf8, false),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("year", DataType::Int32, false),
        Field::new("duration", DataType::Float64, false),
    ])
}

pub fn raw_event_schema() -> Schema {
    Schema::new(vec![
        Field::new("page", DataType::Utf8, false),
        Field::new("userId", DataType::Utf8, true),
        Field::new("firstName", DataType::Utf8, true),
        Field::new("lastName", DataType::Utf8, true),
        Field::new("gender", DataType::Utf8, true),
        Field::new("level", DataType::Utf8, false),
        Field::new("song", DataType::Utf8, true),
        Field::new("ts", DataType::Int64, false),
        Field::new("sessionId", DataType::Int64, false),
        Field::new("location", DataType::Utf8, true),
        Field::new("userAgent", DataType::Utf8, true),
    ])
}

/// Partition columns of the persisted songs table, needed when the fact
/// stage reads the table back from storage.
pub fn songs_partition_cols() -> Vec<(String, DataType)> {
    vec![
        ("year".to_string(), DataType::Int32),
        ("artist_id".to_string(), DataType::Utf8),
    ]
}

/// Partition columns shared by the time and songplays tables.
pub fn calendar_partition_cols() -> Vec<(String, DataType)> {
    vec![
        ("year".to_string(), DataType::Int32),
        ("month".to_string(), DataType::Int32),
    ]
}

// Lazy-loaded static schemas
lazy_static! {
    pub static ref RAW_CATALOG_SCHEMA: SchemaRef = Arc::new(raw_catalog_schema());
    pub static ref RAW_EVENT_SCHEMA: SchemaRef = Arc::new(raw_event_schema());
}
