use common::Result;
use common::config::StorageSettings;
use datafusion::prelude::*;
use tracing::info;

use crate::storage::Dataset;

/// Projects the raw song catalog into the songs and artists dimensions
/// and persists both. Every catalog record contributes unless its
/// projection duplicates a row already seen.
pub struct CatalogExtractor<'a> {
    dataset: &'a dyn Dataset,
}

impl<'a> CatalogExtractor<'a> {
    pub fn new(dataset: &'a dyn Dataset) -> Self {
        Self { dataset }
    }

    pub async fn extract(&self, storage: &StorageSettings) -> Result<()> {
        let source = self
            .dataset
            .read_catalog(&storage.source("song_data"))
            .await?;
        info!(
            records = source.records,
            skipped = source.skipped,
            "loaded song catalog"
        );
        let df = source.frame;

        let songs = df
            .clone()
            .select(vec![
                col("song_id"),
                col("title"),
                col("artist_id"),
                col("year"),
                col("duration"),
            ])?
            .distinct()?;
        let rows = self
            .dataset
            .write_parquet(songs, &storage.table("songs"), &["year", "artist_id"])
            .await?;
        info!(rows, "songs dimension written");

        let artists = df
            .select(vec![
                col("artist_id"),
                col("artist_name").alias("name"),
                col("artist_location").alias("location"),
                col("artist_latitude").alias("latitude"),
                col("artist_longitude").alias("longitude"),
            ])?
            .distinct()?;
        let rows = self
            .dataset
            .write_parquet(artists, &storage.table("artists"), &[])
            .await?;
        info!(rows, "artists dimension written");

        Ok(())
    }
}
