mod catalog;
mod events;
mod facts;

pub use catalog::CatalogExtractor;
pub use events::{EventExtractor, EventTables, NEXT_SONG_PAGE};
pub use facts::FactBuilder;

use common::Result;
use common::config::Settings;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::SessionConfig;
use std::sync::Arc;
use tracing::info;

use crate::storage::{self, StoreDataset};
use crate::udf;

/// Coordinates the two-phase warehouse build. Dimensions go first; the
/// fact stage depends on the songs table existing on durable storage.
pub struct WarehousePipeline {
    ctx: Arc<SessionContext>,
    dataset: StoreDataset,
    settings: Settings,
}

impl WarehousePipeline {
    pub fn new(settings: Settings) -> Result<Self> {
        // Keep string columns as Utf8 through parquet round-trips, per the
        // declared table schemas.
        let config = SessionConfig::new()
            .set_bool("datafusion.execution.parquet.schema_force_view_types", false);
        let ctx = Arc::new(SessionContext::new_with_config(config));
        udf::register_udfs(&ctx)?;
        storage::register_stores(&ctx, &settings)?;
        let dataset = StoreDataset::new(ctx.clone());

        Ok(Self {
            ctx,
            dataset,
            settings,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let storage = &self.settings.storage;

        info!("phase 1: materializing dimension tables");
        CatalogExtractor::new(&self.dataset).extract(storage).await?;
        let events = EventExtractor::new(&self.dataset).extract(storage).await?;

        info!("phase 2: materializing songplays fact table");
        FactBuilder::new(&self.ctx, &self.dataset)
            .build(events, storage)
            .await?;

        Ok(())
    }
}
