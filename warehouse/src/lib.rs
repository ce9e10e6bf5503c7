pub mod models;
pub mod pipeline;
pub mod schema;
pub mod storage;
pub mod time;
pub mod udf;

use common::Result;
use common::config::Settings;
use pipeline::WarehousePipeline;

/// Runs the complete warehouse build: dimension tables first, then the
/// songplays fact table.
pub async fn run_warehouse_pipeline(config_path: &str) -> Result<()> {
    let settings = Settings::new(config_path)?;
    let pipeline = WarehousePipeline::new(settings)?;
    pipeline.run().await
}
