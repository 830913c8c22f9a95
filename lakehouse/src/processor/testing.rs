use super::bind;
use datafusion::arrow::array::{ArrayRef, StringArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::cast::{as_float64_array, as_string_array};
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use std::sync::Arc;

/// Binds an all-text table, the shape raw CSV inputs arrive in
pub async fn bind_text_table(
    ctx: &SessionContext,
    name: &str,
    columns: &[&str],
    rows: &[&[Option<&str>]],
) {
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(*c, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = (0..columns.len())
        .map(|i| Arc::new(StringArray::from(rows.iter().map(|r| r[i]).collect::<Vec<_>>())) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema, arrays).unwrap();

    bind_batch(ctx, name, batch);
}

pub fn bind_batch(ctx: &SessionContext, name: &str, batch: RecordBatch) {
    let df = ctx.read_batch(batch).unwrap();
    bind(ctx, name, df).unwrap();
}

/// Values of one column rendered as text, nulls kept
pub async fn column_values(df: &DataFrame, column: &str) -> Vec<Option<String>> {
    let batches = df
        .clone()
        .select_columns(&[column])
        .unwrap()
        .collect()
        .await
        .unwrap();

    let mut values = Vec::new();
    for batch in batches {
        let text = cast(batch.column(0), &DataType::Utf8).unwrap();
        let text = as_string_array(&text).unwrap();
        values.extend(text.iter().map(|v| v.map(|s| s.to_string())));
    }
    values
}

pub async fn float_values(df: &DataFrame, column: &str) -> Vec<Option<f64>> {
    let batches = df
        .clone()
        .select_columns(&[column])
        .unwrap()
        .collect()
        .await
        .unwrap();

    let mut values = Vec::new();
    for batch in batches {
        let numbers = cast(batch.column(0), &DataType::Float64).unwrap();
        values.extend(as_float64_array(&numbers).unwrap().iter());
    }
    values
}

pub fn strings(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(|s| s.to_string())).collect()
}
