pub mod transform;

pub use transform::CleaningTransformer;

use super::table::{CONFORMED_TABLES, LakeTable, Layer};
use super::{LakehouseProcessor, StageReport, TableReport, count_rows};
use chrono::Utc;
use common::Result;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

const STAGE: &str = "preprocess";

/// Cleans and reshapes the `source` layer into the `preprocessed` layer
pub async fn run(processor: &LakehouseProcessor) -> Result<StageReport> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let ctx = processor.create_context()?;

    let frames = processor
        .read_layer(&ctx, Layer::Source, &CONFORMED_TABLES)
        .await?;
    let mut input_rows = HashMap::new();
    for (kind, df) in CONFORMED_TABLES.into_iter().zip(&frames) {
        let table = LakeTable::new(Layer::Source, kind);
        let rows = count_rows(df).await?;
        info!(stage = STAGE, table = %table, rows, "Loaded source table");
        input_rows.insert(kind, rows);
    }

    let cleaner = CleaningTransformer::new(&ctx, &processor.settings().pipeline);
    let tables = cleaner.clean_all().await?;
    let kinds: Vec<_> = tables.iter().map(|(kind, _)| *kind).collect();

    let writer = processor.table_writer();
    let markers = writer
        .write_tables(
            tables
                .into_iter()
                .map(|(kind, df)| (LakeTable::new(Layer::Preprocessed, kind), df))
                .collect(),
        )
        .await?;

    let reports: Vec<TableReport> = kinds
        .iter()
        .zip(&markers)
        .map(|(kind, marker)| {
            TableReport::new(
                LakeTable::new(Layer::Preprocessed, *kind),
                input_rows.get(kind).copied(),
                marker.record_count,
            )
        })
        .collect();

    let report = StageReport {
        stage: STAGE.to_string(),
        run_id: writer.run_id().to_string(),
        started_at,
        duration_secs: timer.elapsed().as_secs_f64(),
        tables: reports,
        markers,
        quality: None,
    };
    report.log();
    Ok(report)
}
