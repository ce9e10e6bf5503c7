use common::Result;
use common::config::StorageSettings;
use datafusion::prelude::*;
use tracing::info;

use crate::storage::Dataset;

/// The page marker identifying a listening event in the raw log.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// Everything the fact stage needs from the event log: the filtered
/// play events (with their derived start_time) and the time dimension.
pub struct EventTables {
    pub filtered: DataFrame,
    pub time: DataFrame,
    pub filtered_count: u64,
}

/// Filters the raw event log to song plays, persists the users and time
/// dimensions, and hands the filtered events downstream.
pub struct EventExtractor<'a> {
    dataset: &'a dyn Dataset,
}

impl<'a> EventExtractor<'a> {
    pub fn new(dataset: &'a dyn Dataset) -> Self {
        Self { dataset }
    }

    pub async fn extract(&self, storage: &StorageSettings) -> Result<EventTables> {
        let source = self
            .dataset
            .read_events(&storage.source("log_data"))
            .await?;
        info!(
            records = source.records,
            skipped = source.skipped,
            "loaded event log"
        );

        // Everything downstream of here only ever sees song plays.
        let df = source
            .frame
            .filter(col("page").eq(lit(NEXT_SONG_PAGE)))?;

        let users = df
            .clone()
            .select(vec![
                ident("userId").alias("user_id"),
                ident("firstName").alias("first_name"),
                ident("lastName").alias("last_name"),
                col("gender"),
                col("level"),
            ])?
            .distinct()?;
        let rows = self
            .dataset
            .write_parquet(users, &storage.table("users"), &[])
            .await?;
        info!(rows, "users dimension written");

        let to_start_time = df.registry().udf("to_start_time")?;
        let filtered = df.with_column("start_time", to_start_time.call(vec![col("ts")]))?;

        let time = filtered
            .clone()
            .select(vec![
                col("start_time"),
                part_expr(&filtered, "event_hour", "hour")?,
                part_expr(&filtered, "event_day", "day")?,
                part_expr(&filtered, "event_week", "week")?,
                part_expr(&filtered, "event_month", "month")?,
                part_expr(&filtered, "event_year", "year")?,
                part_expr(&filtered, "event_weekday", "weekday")?,
            ])?
            .distinct()?;
        let rows = self
            .dataset
            .write_parquet(time.clone(), &storage.table("time"), &["year", "month"])
            .await?;
        info!(rows, "time dimension written");

        let filtered_count = filtered.clone().count().await? as u64;
        info!(filtered_count, "song-play events retained");

        Ok(EventTables {
            filtered,
            time,
            filtered_count,
        })
    }
}

fn part_expr(df: &DataFrame, udf_name: &str, alias: &str) -> Result<Expr> {
    let udf = df.registry().udf(udf_name)?;
    Ok(udf.call(vec![col("start_time")]).alias(alias))
}
