use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::Result;
use common::config::StorageSettings;
use datafusion::common::JoinType;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::*;
use std::sync::Arc;
use tracing::info;

use super::events::EventTables;
use crate::schema;
use crate::storage::Dataset;

// Low 33 bits carry the per-partition counter, matching the id layout
// of the engine this pipeline replaced.
const PARTITION_ID_SHIFT: u32 = 33;

/// Builds the songplays fact table: joins the filtered events to the
/// persisted songs dimension by title, assigns synthetic ids, attaches
/// the calendar partition key, and persists the result.
pub struct FactBuilder<'a> {
    ctx: &'a SessionContext,
    dataset: &'a dyn Dataset,
}

impl<'a> FactBuilder<'a> {
    pub fn new(ctx: &'a SessionContext, dataset: &'a dyn Dataset) -> Self {
        Self { ctx, dataset }
    }

    pub async fn build(&self, events: EventTables, storage: &StorageSettings) -> Result<u64> {
        // The songs dimension is read back from its persisted form, not
        // the frame the catalog stage held in memory.
        let songs = self
            .dataset
            .read_parquet(&storage.table("songs"), &schema::songs_partition_cols())
            .await?
            .select(vec![col("song_id"), col("title"), col("artist_id")])?;

        let plays = events.filtered.select(vec![
            col("start_time"),
            ident("userId").alias("user_id"),
            col("level"),
            col("song"),
            ident("sessionId").alias("session_id"),
            col("location"),
            ident("userAgent").alias("user_agent"),
        ])?;

        // Identity join: left outer on the free-text title. Events with
        // no catalog match keep null song_id/artist_id. Matching on the
        // title is a known fragility (duplicate or differently-cased
        // titles) preserved for compatibility with the existing tables.
        let matched = plays
            .join_on(songs, JoinType::Left, [col("song").eq(col("title"))])?
            .select(vec![
                col("start_time"),
                col("user_id"),
                col("level"),
                col("song_id"),
                col("artist_id"),
                col("session_id"),
                col("location"),
                col("user_agent"),
            ])?;

        let with_ids = self.assign_songplay_ids(matched).await?;
        let pre_calendar = with_ids.clone().count().await? as u64;

        // Calendar join: inner, so an event whose start_time never made
        // it into the time dimension is dropped here.
        let instants = events.time.select(vec![
            col("start_time").alias("time_start"),
            col("year"),
            col("month"),
        ])?;
        let songplays = with_ids
            .join_on(
                instants,
                JoinType::Inner,
                [col("start_time").eq(col("time_start"))],
            )?
            .select(vec![
                col("songplay_id"),
                col("start_time"),
                col("user_id"),
                col("level"),
                col("song_id"),
                col("artist_id"),
                col("session_id"),
                col("location"),
                col("user_agent"),
                col("year"),
                col("month"),
            ])?
            .distinct()?;

        let rows = self
            .dataset
            .write_parquet(songplays, &storage.table("songplays"), &["year", "month"])
            .await?;

        if pre_calendar > rows {
            info!(
                dropped = pre_calendar - rows,
                filtered = events.filtered_count,
                "events dropped by calendar join and final dedup"
            );
        }
        info!(rows, "songplays fact written");

        Ok(rows)
    }

    /// Assigns a globally unique songplay_id per row without any
    /// cross-partition coordination: each worker owns the id range
    /// `partition_index << 33`, counting locally from there.
    async fn assign_songplay_ids(&self, df: DataFrame) -> Result<DataFrame> {
        let with_id_schema = prepend_id_field(df.schema().into());
        let partitions = df.collect_partitioned().await?;

        let mut out: Vec<Vec<RecordBatch>> = Vec::with_capacity(partitions.len());
        for (partition, batches) in partitions.into_iter().enumerate() {
            let base = (partition as i64) << PARTITION_ID_SHIFT;
            let mut next = 0i64;
            let mut rebuilt = Vec::with_capacity(batches.len());
            for batch in batches {
                let ids: Int64Array = (0..batch.num_rows())
                    .map(|_| {
                        let id = base | next;
                        next += 1;
                        Some(id)
                    })
                    .collect();
                let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns() + 1);
                columns.push(Arc::new(ids));
                columns.extend(batch.columns().iter().cloned());
                rebuilt.push(RecordBatch::try_new(with_id_schema.clone(), columns)?);
            }
            out.push(rebuilt);
        }
        if out.is_empty() {
            out.push(Vec::new());
        }

        let table = MemTable::try_new(with_id_schema, out)?;
        Ok(self.ctx.read_table(Arc::new(table))?)
    }
}

fn prepend_id_field(base: Schema) -> SchemaRef {
    let mut fields = vec![Field::new("songplay_id", DataType::Int64, false)];
    fields.extend(base.fields().iter().map(|f| f.as_ref().clone()));
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};
    use std::collections::HashSet;

    fn play_batch(titles: &[&str]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("song", DataType::Utf8, true)]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from_iter_values(titles.iter().copied())) as ArrayRef],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ids_unique_across_partitions() {
        let ctx = SessionContext::new();
        let dataset = crate::storage::StoreDataset::new(Arc::new(ctx.clone()));
        let builder = FactBuilder::new(&ctx, &dataset);

        let schema = play_batch(&[]).schema();
        let partitions = vec![
            vec![play_batch(&["a", "b"]), play_batch(&["c"])],
            vec![play_batch(&["d", "e"])],
        ];
        let table = MemTable::try_new(schema, partitions).unwrap();
        let df = ctx.read_table(Arc::new(table)).unwrap();

        let with_ids = builder.assign_songplay_ids(df).await.unwrap();
        let batches = with_ids.collect().await.unwrap();

        let mut seen = HashSet::new();
        for batch in &batches {
            let ids = batch
                .column_by_name("songplay_id")
                .unwrap()
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap();
            for i in 0..ids.len() {
                assert!(seen.insert(ids.value(i)), "duplicate id {}", ids.value(i));
            }
        }
        assert_eq!(seen.len(), 5);
        // Rows from the second partition sit in a disjoint id range.
        assert!(seen.contains(&(1i64 << PARTITION_ID_SHIFT)));
    }
}
