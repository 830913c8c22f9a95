use chrono::NaiveDate;
use common::Result;
use datafusion::arrow::array::{Array, Date32Array, Float64Array};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::DataFusionError;
use datafusion::common::cast::{as_float64_array, as_int64_array, as_string_array};
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::ColumnarValue;
use datafusion::logical_expr::{Volatility, create_udf};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

pub const DAY_OFFSET_TO_DATE: &str = "day_offset_to_date";
pub const PARSE_COORDINATE: &str = "parse_coordinate";
pub const DEGREE_DISTANCE: &str = "degree_distance";

// Magnitude with an optional hemisphere letter, e.g. "39.38N" or "89.48W"
static COORDINATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?\d+(?:\.\d+)?)\s*[NSEWnsew]?\s*$").expect("Invalid coordinate regex")
});

/// Registers all UDFs with the SessionContext
pub fn register_udfs(ctx: &SessionContext, epoch: NaiveDate) -> Result<()> {
    let epoch_days = days_since_unix_epoch(epoch);

    // Day offset -> calendar date
    let day_offset_to_date = create_udf(
        DAY_OFFSET_TO_DATE,
        vec![DataType::Int64],
        DataType::Date32,
        Volatility::Immutable,
        Arc::new(move |args: &[ColumnarValue]| {
            decode_day_offsets(args, epoch_days)
                .map_err(|e| DataFusionError::Internal(e.to_string()))
        }),
    );

    // "39.38N" -> 39.38
    let parse_coordinate = create_udf(
        PARSE_COORDINATE,
        vec![DataType::Utf8],
        DataType::Float64,
        Volatility::Immutable,
        Arc::new(|args: &[ColumnarValue]| {
            parse_coordinates(args).map_err(|e| DataFusionError::Internal(e.to_string()))
        }),
    );

    // Euclidean distance between two (lat, lon) pairs in degree space
    let degree_distance = create_udf(
        DEGREE_DISTANCE,
        vec![
            DataType::Float64,
            DataType::Float64,
            DataType::Float64,
            DataType::Float64,
        ],
        DataType::Float64,
        Volatility::Immutable,
        Arc::new(|args: &[ColumnarValue]| {
            degree_distances(args).map_err(|e| DataFusionError::Internal(e.to_string()))
        }),
    );

    ctx.register_udf(day_offset_to_date);
    ctx.register_udf(parse_coordinate);
    ctx.register_udf(degree_distance);

    Ok(())
}

fn days_since_unix_epoch(date: NaiveDate) -> i64 {
    let unix_epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - unix_epoch).num_days()
}

/// Converts day offsets from `epoch` into Arrow Date32 values (days since 1970-01-01)
fn decode_day_offsets(args: &[ColumnarValue], epoch_days: i64) -> Result<ColumnarValue> {
    let arrays = ColumnarValue::values_to_arrays(args)?;
    let offsets = as_int64_array(&arrays[0])?;

    let result: Date32Array = offsets
        .iter()
        .map(|offset| {
            offset
                .and_then(|days| epoch_days.checked_add(days))
                .and_then(|days| i32::try_from(days).ok())
        })
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}

/// Parses the numeric part of a hemisphere-suffixed coordinate
fn parse_coordinates(args: &[ColumnarValue]) -> Result<ColumnarValue> {
    let arrays = ColumnarValue::values_to_arrays(args)?;
    let text = as_string_array(&arrays[0])?;

    let result: Float64Array = text
        .iter()
        .map(|value| {
            value
                .and_then(|s| COORDINATE_REGEX.captures(s))
                .and_then(|caps| caps.get(1))
                .and_then(|number| number.as_str().parse::<f64>().ok())
        })
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}

fn degree_distances(args: &[ColumnarValue]) -> Result<ColumnarValue> {
    let arrays = ColumnarValue::values_to_arrays(args)?;
    let lat_a = as_float64_array(&arrays[0])?;
    let lon_a = as_float64_array(&arrays[1])?;
    let lat_b = as_float64_array(&arrays[2])?;
    let lon_b = as_float64_array(&arrays[3])?;

    let result: Float64Array = (0..lat_a.len())
        .map(|i| {
            if lat_a.is_null(i) || lon_a.is_null(i) || lat_b.is_null(i) || lon_b.is_null(i) {
                return None;
            }
            let d_lat = lat_a.value(i) - lat_b.value(i);
            let d_lon = lon_a.value(i) - lon_b.value(i);
            Some((d_lat * d_lat + d_lon * d_lon).sqrt())
        })
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Int64Array, StringArray};

    fn epoch_1960() -> i64 {
        days_since_unix_epoch(NaiveDate::from_ymd_opt(1960, 1, 1).unwrap())
    }

    #[test]
    fn test_decode_day_offsets() {
        let input = Int64Array::from(vec![Some(20545), None, Some(0)]);

        let result =
            decode_day_offsets(&[ColumnarValue::Array(Arc::new(input))], epoch_1960()).unwrap();

        if let ColumnarValue::Array(array) = result {
            let dates = array.as_any().downcast_ref::<Date32Array>().unwrap();
            assert_eq!(
                dates.value_as_date(0),
                NaiveDate::from_ymd_opt(2016, 4, 1)
            );
            assert!(dates.is_null(1));
            assert_eq!(
                dates.value_as_date(2),
                NaiveDate::from_ymd_opt(1960, 1, 1)
            );
        } else {
            panic!("Expected Array result");
        }
    }

    #[test]
    fn test_decode_day_offsets_follows_configured_epoch() {
        let unix = days_since_unix_epoch(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        assert_eq!(unix, 0);

        let input = Int64Array::from(vec![Some(31)]);
        let result = decode_day_offsets(&[ColumnarValue::Array(Arc::new(input))], unix).unwrap();

        if let ColumnarValue::Array(array) = result {
            let dates = array.as_any().downcast_ref::<Date32Array>().unwrap();
            assert_eq!(dates.value(0), 31);
        } else {
            panic!("Expected Array result");
        }
    }

    #[test]
    fn test_parse_coordinates() {
        let input = StringArray::from(vec![
            Some("39.38N"),
            Some("89.48W"),
            Some("42.59"),
            Some("north"),
            None,
        ]);

        let result = parse_coordinates(&[ColumnarValue::Array(Arc::new(input))]).unwrap();

        if let ColumnarValue::Array(array) = result {
            let values = array.as_any().downcast_ref::<Float64Array>().unwrap();
            assert_eq!(values.value(0), 39.38);
            assert_eq!(values.value(1), 89.48);
            assert_eq!(values.value(2), 42.59);
            assert!(values.is_null(3));
            assert!(values.is_null(4));
        } else {
            panic!("Expected Array result");
        }
    }

    #[test]
    fn test_degree_distances() {
        let lat_a = Float64Array::from(vec![Some(0.0), Some(41.0), None]);
        let lon_a = Float64Array::from(vec![Some(0.0), Some(-87.0), Some(1.0)]);
        let lat_b = Float64Array::from(vec![Some(3.0), Some(41.0), Some(1.0)]);
        let lon_b = Float64Array::from(vec![Some(4.0), Some(-87.5), Some(1.0)]);

        let result = degree_distances(&[
            ColumnarValue::Array(Arc::new(lat_a)),
            ColumnarValue::Array(Arc::new(lon_a)),
            ColumnarValue::Array(Arc::new(lat_b)),
            ColumnarValue::Array(Arc::new(lon_b)),
        ])
        .unwrap();

        if let ColumnarValue::Array(array) = result {
            let values = array.as_any().downcast_ref::<Float64Array>().unwrap();
            assert_eq!(values.value(0), 5.0);
            assert_eq!(values.value(1), 0.5);
            assert!(values.is_null(2));
        } else {
            panic!("Expected Array result");
        }
    }
}
