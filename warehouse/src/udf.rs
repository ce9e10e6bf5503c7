use common::Result;
use datafusion::arrow::array::{Int32Array, Int64Array, TimestampMillisecondArray};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::common::DataFusionError;
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::{ColumnarValue, Volatility, create_udf};
use std::sync::Arc;

use crate::time::{self, CalendarInstant};

/// Registers the calendar UDFs with the SessionContext. Every part
/// function is implemented in terms of [`time::decompose`], so the time
/// dimension and the fact partition key always agree.
pub fn register_udfs(ctx: &SessionContext) -> Result<()> {
    let to_start_time = create_udf(
        "to_start_time",
        vec![DataType::Int64],
        DataType::Timestamp(TimeUnit::Millisecond, None),
        Volatility::Immutable,
        Arc::new(|args| convert_to_start_time(args)),
    );
    ctx.register_udf(to_start_time);

    register_part(ctx, "event_hour", |c| c.hour);
    register_part(ctx, "event_day", |c| c.day);
    register_part(ctx, "event_week", |c| c.week);
    register_part(ctx, "event_month", |c| c.month);
    register_part(ctx, "event_year", |c| c.year);
    register_part(ctx, "event_weekday", |c| c.weekday);

    Ok(())
}

fn register_part(
    ctx: &SessionContext,
    name: &'static str,
    accessor: fn(&CalendarInstant) -> i32,
) {
    let udf = create_udf(
        name,
        vec![DataType::Timestamp(TimeUnit::Millisecond, None)],
        DataType::Int32,
        Volatility::Immutable,
        Arc::new(move |args| decompose_part(args, accessor)),
    );
    ctx.register_udf(udf);
}

/// Converts a raw millisecond epoch column to an Arrow Timestamp column.
fn convert_to_start_time(
    args: &[ColumnarValue],
) -> std::result::Result<ColumnarValue, DataFusionError> {
    let int_array = match &args[0] {
        ColumnarValue::Array(array) => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| DataFusionError::Internal("Expected int64 array".to_string()))?,
        ColumnarValue::Scalar(_) => {
            return Err(DataFusionError::Internal(
                "Scalar inputs not supported".to_string(),
            ));
        }
    };

    let result: TimestampMillisecondArray = int_array.iter().collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}

/// Extracts one calendar part from a Timestamp column. Timestamps that
/// cannot be decomposed yield null.
fn decompose_part(
    args: &[ColumnarValue],
    accessor: fn(&CalendarInstant) -> i32,
) -> std::result::Result<ColumnarValue, DataFusionError> {
    let ts_array = match &args[0] {
        ColumnarValue::Array(array) => array
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .ok_or_else(|| DataFusionError::Internal("Expected timestamp array".to_string()))?,
        ColumnarValue::Scalar(_) => {
            return Err(DataFusionError::Internal(
                "Scalar inputs not supported".to_string(),
            ));
        }
    };

    let result: Int32Array = ts_array
        .iter()
        .map(|opt_ms| opt_ms.and_then(time::decompose).map(|c| accessor(&c)))
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}
