pub mod store;

pub use store::StoreDataset;

use arrow::datatypes::DataType;
use async_trait::async_trait;
use common::config::Settings;
use common::{Error, Result};
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use object_store::aws::AmazonS3Builder;
use std::sync::Arc;
use url::Url;

/// A raw source frame plus the record-level telemetry gathered while
/// reading it.
pub struct SourceFrame {
    pub frame: DataFrame,
    pub records: usize,
    pub skipped: usize,
}

/// Capability for reading raw sources and persisting warehouse tables.
/// The transformation pipeline only ever touches storage through this
/// trait; the engine behind it owns parallelism and physical layout.
#[async_trait]
pub trait Dataset: Send + Sync {
    /// Reads the song catalog under `locator` (NDJSON, lenient parse).
    async fn read_catalog(&self, locator: &str) -> Result<SourceFrame>;

    /// Reads the listening-event log under `locator` (NDJSON, lenient parse).
    async fn read_events(&self, locator: &str) -> Result<SourceFrame>;

    /// Reads a persisted table back from columnar storage, declaring its
    /// hive-style partition columns.
    async fn read_parquet(
        &self,
        locator: &str,
        partition_cols: &[(String, DataType)],
    ) -> Result<DataFrame>;

    /// Persists a frame as Parquet under `locator`, destructively
    /// replacing whatever was there before. Returns the row count
    /// written.
    async fn write_parquet(
        &self,
        df: DataFrame,
        locator: &str,
        partition_by: &[&str],
    ) -> Result<u64>;
}

/// Parses a locator into a URL, treating bare absolute paths as file://.
pub(crate) fn parse_locator(locator: &str) -> Result<Url> {
    match Url::parse(locator) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::from_file_path(locator)
            .map_err(|_| Error::InvalidInput(format!("unsupported locator: {}", locator))),
        Err(e) => Err(e.into()),
    }
}

/// Registers an object store for every s3:// root in the configuration.
/// file:// locators use the runtime's built-in local store.
pub fn register_stores(ctx: &SessionContext, settings: &Settings) -> Result<()> {
    let roots = [
        settings.storage.input_root.as_str(),
        settings.storage.output_root.as_str(),
    ];

    for root in roots {
        let url = parse_locator(root)?;
        if url.scheme() != "s3" {
            continue;
        }

        let s3 = settings.s3.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("locator {} requires [s3] settings", root))
        })?;
        let bucket = url
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("locator {} has no bucket", root)))?;

        let store = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&s3.region)
            .with_access_key_id(&s3.access_key)
            .with_secret_access_key(&s3.secret_key)
            .with_endpoint(&s3.endpoint)
            .with_allow_http(true)
            .build()?;

        let store_url = Url::parse(&format!("s3://{}", bucket))?;
        ctx.runtime_env()
            .register_object_store(&store_url, Arc::new(store));
    }

    Ok(())
}
