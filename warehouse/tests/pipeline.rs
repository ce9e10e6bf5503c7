use arrow::array::{Array, Int32Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use common::config::{Settings, StorageSettings};
use datafusion::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use warehouse::pipeline::WarehousePipeline;
use warehouse::schema;

const MATCHED_TS: i64 = 1541990258796; // 2018-11-12 02:37:38 UTC
const UNMATCHED_TS: i64 = 1542001000000; // later the same day
const HOME_TS: i64 = 1541900000000; // must never reach the time table

fn write_fixture(root: &Path) {
    let song_dir = root.join("raw/song_data");
    let log_dir = root.join("raw/log_data");
    fs::create_dir_all(&song_dir).unwrap();
    fs::create_dir_all(&log_dir).unwrap();

    // One catalog record duplicated verbatim, plus a second song nobody
    // plays.
    let catalog = concat!(
        r#"{"song_id":"S1","title":"Test Song","artist_id":"A1","artist_name":"Test Artist","artist_location":"Metropolis","artist_latitude":40.7,"artist_longitude":-74.0,"year":2018,"duration":201.5}"#,
        "\n",
        r#"{"song_id":"S1","title":"Test Song","artist_id":"A1","artist_name":"Test Artist","artist_location":"Metropolis","artist_latitude":40.7,"artist_longitude":-74.0,"year":2018,"duration":201.5}"#,
        "\n",
        r#"{"song_id":"S2","title":"Other Song","artist_id":"A2","artist_name":"Other Artist","year":0,"duration":99.0}"#,
        "\n",
    );
    fs::write(song_dir.join("catalog.json"), catalog).unwrap();

    // Two song plays (one matching the catalog, one not), one non-play
    // page view, and one malformed line.
    let events = format!(
        "{}\n{}\n{}\n{}\n",
        format!(
            r#"{{"page":"NextSong","userId":"10","firstName":"Ada","lastName":"Lively","gender":"F","level":"paid","song":"Test Song","ts":{},"sessionId":100,"location":"Metropolis","userAgent":"agent-a"}}"#,
            MATCHED_TS
        ),
        format!(
            r#"{{"page":"NextSong","userId":"20","firstName":"Ben","lastName":"Quiet","gender":"M","level":"free","song":"Uncatalogued Tune","ts":{},"sessionId":200,"location":"Smallville","userAgent":"agent-b"}}"#,
            UNMATCHED_TS
        ),
        format!(
            r#"{{"page":"Home","userId":"99","firstName":"Eve","lastName":"Idle","gender":"F","level":"free","ts":{},"sessionId":300}}"#,
            HOME_TS
        ),
        "{this line is not json",
    );
    fs::write(log_dir.join("2018-11-12-events.json"), events).unwrap();
}

fn settings(root: &Path) -> Settings {
    Settings {
        storage: StorageSettings {
            input_root: format!("file://{}/raw/", root.display()),
            output_root: format!("file://{}/warehouse/", root.display()),
        },
        s3: None,
    }
}

async fn load_table(
    root: &Path,
    table: &str,
    partition_cols: Vec<(String, arrow::datatypes::DataType)>,
) -> Vec<RecordBatch> {
    let config = SessionConfig::new()
        .set_bool("datafusion.execution.parquet.schema_force_view_types", false);
    let ctx = SessionContext::new_with_config(config);
    let locator = format!("file://{}/warehouse/{}/", root.display(), table);
    let options = ParquetReadOptions::default().table_partition_cols(partition_cols);
    ctx.read_parquet(locator, options)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
}

fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

fn string_at(batch: &RecordBatch, column: &str, row: usize) -> Option<String> {
    let array = batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {}", column))
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

fn int32_at(batch: &RecordBatch, column: &str, row: usize) -> i32 {
    batch
        .column_by_name(column)
        .unwrap_or_else(|| panic!("missing column {}", column))
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap()
        .value(row)
}

/// Locates the row of a batch set by session id.
fn find_by_session(batches: &[RecordBatch], session_id: i64) -> (&RecordBatch, usize) {
    for batch in batches {
        let sessions = batch
            .column_by_name("session_id")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        for row in 0..sessions.len() {
            if sessions.value(row) == session_id {
                return (batch, row);
            }
        }
    }
    panic!("no row with session_id {}", session_id);
}

#[tokio::test]
async fn test_full_pipeline_builds_star_schema() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_fixture(root);

    let pipeline = WarehousePipeline::new(settings(root)).unwrap();
    pipeline.run().await.unwrap();

    // songs: the duplicated catalog row collapses to one, so two songs.
    let songs = load_table(root, "songs", schema::songs_partition_cols()).await;
    assert_eq!(row_count(&songs), 2);

    // artists: full-row dedup leaves two artists.
    let artists = load_table(root, "artists", vec![]).await;
    assert_eq!(row_count(&artists), 2);

    // users: only the two play events contribute; the Home page view
    // for user 99 never shows up.
    let users = load_table(root, "users", vec![]).await;
    assert_eq!(row_count(&users), 2);
    for batch in &users {
        for row in 0..batch.num_rows() {
            assert_ne!(string_at(batch, "user_id", row).as_deref(), Some("99"));
        }
    }

    // time: one row per distinct play instant, none for the Home view.
    let time = load_table(root, "time", schema::calendar_partition_cols()).await;
    assert_eq!(row_count(&time), 2);
    let mut seen_matched_instant = false;
    for batch in &time {
        let start_times = batch
            .column_by_name("start_time")
            .unwrap()
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .unwrap();
        for row in 0..batch.num_rows() {
            assert_ne!(start_times.value(row), HOME_TS);
            if start_times.value(row) == MATCHED_TS {
                seen_matched_instant = true;
                assert_eq!(int32_at(batch, "hour", row), 2);
                assert_eq!(int32_at(batch, "day", row), 12);
                assert_eq!(int32_at(batch, "week", row), 46);
                assert_eq!(int32_at(batch, "weekday", row), 1);
                assert_eq!(int32_at(batch, "year", row), 2018);
                assert_eq!(int32_at(batch, "month", row), 11);
            }
        }
    }
    assert!(seen_matched_instant);

    // songplays: both play events survive; only the catalogued one
    // carries song and artist ids.
    let songplays = load_table(root, "songplays", schema::calendar_partition_cols()).await;
    assert_eq!(row_count(&songplays), 2);

    let (batch, row) = find_by_session(&songplays, 100);
    assert_eq!(string_at(batch, "song_id", row).as_deref(), Some("S1"));
    assert_eq!(string_at(batch, "artist_id", row).as_deref(), Some("A1"));
    assert_eq!(string_at(batch, "user_id", row).as_deref(), Some("10"));
    assert_eq!(string_at(batch, "level", row).as_deref(), Some("paid"));
    assert_eq!(int32_at(batch, "year", row), 2018);
    assert_eq!(int32_at(batch, "month", row), 11);

    let (batch, row) = find_by_session(&songplays, 200);
    assert_eq!(string_at(batch, "song_id", row), None);
    assert_eq!(string_at(batch, "artist_id", row), None);

    // synthetic ids are unique across the whole fact table.
    let mut ids = HashSet::new();
    for batch in &songplays {
        let id_column = batch
            .column_by_name("songplay_id")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        for row in 0..id_column.len() {
            assert!(ids.insert(id_column.value(row)));
        }
    }
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn test_rerun_overwrites_tables_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_fixture(root);

    let pipeline = WarehousePipeline::new(settings(root)).unwrap();
    pipeline.run().await.unwrap();
    pipeline.run().await.unwrap();

    let songs = load_table(root, "songs", schema::songs_partition_cols()).await;
    assert_eq!(row_count(&songs), 2);

    let songplays = load_table(root, "songplays", schema::calendar_partition_cols()).await;
    assert_eq!(row_count(&songplays), 2);
}

#[tokio::test]
async fn test_missing_source_aborts_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("raw")).unwrap();

    let pipeline = WarehousePipeline::new(settings(root)).unwrap();
    let result = pipeline.run().await;

    assert!(result.is_err());
    assert!(!root.join("warehouse/songs").exists());
}
