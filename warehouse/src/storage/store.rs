use arrow::array::UInt64Array;
use arrow::datatypes::DataType;
use async_trait::async_trait;
use common::{Error, Result};
use datafusion::dataframe::{DataFrame, DataFrameWriteOptions};
use datafusion::datasource::listing::ListingTableUrl;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::ParquetReadOptions;
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectMeta;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Dataset, SourceFrame};
use crate::models;

/// Dataset implementation over the object stores registered on a
/// SessionContext runtime (local filesystem for file:// locators, S3
/// for s3:// ones).
pub struct StoreDataset {
    ctx: Arc<SessionContext>,
}

impl StoreDataset {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    fn table_url(&self, locator: &str) -> Result<ListingTableUrl> {
        ListingTableUrl::parse(locator)
            .map_err(|e| Error::InvalidInput(format!("bad locator {}: {}", locator, e)))
    }

    async fn list_json(&self, locator: &str) -> Result<Vec<ObjectMeta>> {
        let url = self.table_url(locator)?;
        let store = self.ctx.runtime_env().object_store(&url)?;

        let mut files: Vec<ObjectMeta> = store
            .list(Some(url.prefix()))
            .try_collect()
            .await
            .map_err(|e| Error::Source(format!("listing {} failed: {}", locator, e)))?;
        files.retain(|meta| meta.location.extension() == Some("json"));

        if files.is_empty() {
            return Err(Error::Source(format!("no json files under {}", locator)));
        }

        Ok(files)
    }

    /// Reads every NDJSON object under the locator into typed records,
    /// skipping malformed lines.
    async fn read_records<T: DeserializeOwned>(&self, locator: &str) -> Result<(Vec<T>, usize)> {
        let url = self.table_url(locator)?;
        let store = self.ctx.runtime_env().object_store(&url)?;

        let mut records = Vec::new();
        let mut skipped = 0;

        for meta in self.list_json(locator).await? {
            let bytes = store
                .get(&meta.location)
                .await
                .map_err(|e| Error::Source(format!("reading {} failed: {}", meta.location, e)))?
                .bytes()
                .await
                .map_err(|e| Error::Source(format!("reading {} failed: {}", meta.location, e)))?;

            let content = String::from_utf8_lossy(&bytes);
            let parsed = models::parse_lines::<T>(&content, meta.location.as_ref());
            debug!(
                file = %meta.location,
                records = parsed.records.len(),
                skipped = parsed.skipped,
                "parsed source file"
            );
            records.extend(parsed.records);
            skipped += parsed.skipped;
        }

        Ok((records, skipped))
    }

    /// Deletes every object under the target prefix so re-written tables
    /// never mix old and new files.
    async fn delete_prefix(&self, locator: &str) -> Result<()> {
        let url = self.table_url(locator)?;
        let store = self.ctx.runtime_env().object_store(&url)?;

        let locations = store
            .list(Some(url.prefix()))
            .map_ok(|meta| meta.location)
            .boxed();
        let mut results = store.delete_stream(locations);
        let mut deleted = 0u64;
        while let Some(result) = results.next().await {
            match result {
                Ok(_) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if deleted > 0 {
            debug!(locator, deleted, "cleared previous table contents");
        }
        Ok(())
    }
}

#[async_trait]
impl Dataset for StoreDataset {
    async fn read_catalog(&self, locator: &str) -> Result<SourceFrame> {
        let (records, skipped) = self
            .read_records::<models::CatalogRecord>(locator)
            .await?;
        let batch = models::catalog_batch(&records)?;
        let frame = self.ctx.read_batches(vec![batch])?;
        Ok(SourceFrame {
            frame,
            records: records.len(),
            skipped,
        })
    }

    async fn read_events(&self, locator: &str) -> Result<SourceFrame> {
        let (records, skipped) = self.read_records::<models::EventRecord>(locator).await?;
        let batch = models::event_batch(&records)?;
        let frame = self.ctx.read_batches(vec![batch])?;
        Ok(SourceFrame {
            frame,
            records: records.len(),
            skipped,
        })
    }

    async fn read_parquet(
        &self,
        locator: &str,
        partition_cols: &[(String, DataType)],
    ) -> Result<DataFrame> {
        let options = ParquetReadOptions::default().table_partition_cols(partition_cols.to_vec());
        let df = self.ctx.read_parquet(locator, options).await?;
        Ok(df)
    }

    async fn write_parquet(
        &self,
        df: DataFrame,
        locator: &str,
        partition_by: &[&str],
    ) -> Result<u64> {
        self.delete_prefix(locator).await?;

        let options = DataFrameWriteOptions::new()
            .with_partition_by(partition_by.iter().map(|s| s.to_string()).collect());
        let written = df.write_parquet(locator, options, None).await?;

        // write_parquet reports its row count as a single count column.
        let rows: u64 = written
            .iter()
            .filter_map(|batch| {
                batch
                    .column(0)
                    .as_any()
                    .downcast_ref::<UInt64Array>()
                    .map(|counts| counts.iter().flatten().sum::<u64>())
            })
            .sum();

        info!(locator, rows, "table written");
        Ok(rows)
    }
}
