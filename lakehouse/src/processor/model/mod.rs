pub mod transform;

pub use transform::ModelBuilder;

use super::quality::check_model;
use super::table::{ANALYTICS_TABLES, CONFORMED_TABLES, LakeTable, Layer};
use super::{LakehouseProcessor, StageReport, TableReport};
use chrono::Utc;
use common::Result;
use std::time::Instant;
use tracing::{error, info};

const STAGE: &str = "model";

/// Builds the star schema from the `preprocessed` layer. The three tables are
/// written together, and only once the quality gate has passed.
pub async fn run(processor: &LakehouseProcessor) -> Result<StageReport> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let ctx = processor.create_context()?;

    processor
        .read_layer(&ctx, Layer::Preprocessed, &CONFORMED_TABLES)
        .await?;

    let builder = ModelBuilder::new(&ctx);
    let fact = builder.build_fact().await?.cache().await?;
    let dim_cities = builder.build_dim_cities().await?.cache().await?;
    let dim_time = builder.build_dim_time().await?.cache().await?;

    let quality = check_model(&fact, &dim_cities, &dim_time).await?;
    if !quality.passed() {
        error!(stage = STAGE, failed = quality.failures().len(), "Quality gate rejected the model");
    }
    let quality = quality.into_result()?;
    info!(stage = STAGE, checks = quality.checks.len(), "Quality gate passed");

    let writer = processor.table_writer();
    let markers = writer
        .write_tables(
            ANALYTICS_TABLES
                .into_iter()
                .map(|kind| LakeTable::new(Layer::Analytics, kind))
                .zip([fact, dim_cities, dim_time])
                .collect(),
        )
        .await?;
    let reports = markers
        .iter()
        .map(|m| TableReport::new(format!("{}/{}", m.layer, m.table), None, m.record_count))
        .collect();

    let report = StageReport {
        stage: STAGE.to_string(),
        run_id: writer.run_id().to_string(),
        started_at,
        duration_secs: timer.elapsed().as_secs_f64(),
        tables: reports,
        markers,
        quality: Some(quality),
    };
    report.log();
    Ok(report)
}
