use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

use crate::schema;

/// One song-catalog record. Carries the song and its artist together;
/// the extractor splits them into the two dimensions.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRecord {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_location: Option<String>,
    #[serde(default)]
    pub artist_latitude: Option<f64>,
    #[serde(default)]
    pub artist_longitude: Option<f64>,
    pub year: i32,
    pub duration: f64,
}

/// One raw listening event. Only `page == "NextSong"` rows ever reach
/// the warehouse tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub page: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub level: String,
    #[serde(default)]
    pub song: Option<String>,
    pub ts: i64,
    pub session_id: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

pub struct ParsedLines<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

/// Parses newline-delimited JSON leniently: malformed lines are skipped
/// with a warning and counted, never aborting the source.
pub fn parse_lines<T: DeserializeOwned>(content: &str, source: &str) -> ParsedLines<T> {
    let mut records = Vec::new();
    let mut skipped = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(source, error = %e, "skipping malformed record");
            }
        }
    }

    ParsedLines { records, skipped }
}

/// Builds a RecordBatch over the raw catalog schema.
pub fn catalog_batch(records: &[CatalogRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.song_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.title.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.artist_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.artist_name.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.artist_location.as_deref()),
        )),
        Arc::new(Float64Array::from_iter(
            records.iter().map(|r| r.artist_latitude),
        )),
        Arc::new(Float64Array::from_iter(
            records.iter().map(|r| r.artist_longitude),
        )),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.year))),
        Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.duration),
        )),
    ];

    RecordBatch::try_new(schema::RAW_CATALOG_SCHEMA.clone(), columns).map_err(Error::from)
}

/// Builds a RecordBatch over the raw event schema.
pub fn event_batch(records: &[EventRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.page.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.user_id.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.first_name.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.last_name.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.gender.as_deref()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.level.as_str()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.song.as_deref()),
        )),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.ts))),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.session_id),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.location.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.user_agent.as_deref()),
        )),
    ];

    RecordBatch::try_new(schema::RAW_EVENT_SCHEMA.clone(), columns).map_err(Error::from)
}
