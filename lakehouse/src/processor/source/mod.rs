pub mod transform;

pub use transform::SourceTransformer;

use super::reference::load_reference_sets;
use super::table::{LakeTable, Layer};
use super::{LakehouseProcessor, StageReport, TableReport};
use crate::schema::{RawSchema, get_raw_schema};
use crate::utils::paths::file_extension;
use chrono::Utc;
use common::Result;
use common::config::{InputConfig, SourceFormat};
use datafusion::execution::context::SessionContext;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions};
use std::time::Instant;
use tracing::info;

pub const RAW_IMMIGRATION: &str = "raw_i94";
pub const RAW_DEMOGRAPHIC: &str = "raw_demographic";
pub const RAW_AIRPORTS: &str = "raw_airports";
pub const RAW_TEMPERATURE: &str = "raw_temperature";

const STAGE: &str = "source";

/// Reads the raw inputs, conforms them and replaces the `source` layer
pub async fn run(processor: &LakehouseProcessor) -> Result<StageReport> {
    let started_at = Utc::now();
    let timer = Instant::now();
    let settings = processor.settings();
    let ctx = processor.create_context()?;

    info!(stage = STAGE, "Reading dictionary tables");
    processor.register_input(&ctx, &settings.input.dict_tables)?;
    load_reference_sets(&ctx, &settings.input.dict_tables).await?;

    info!(stage = STAGE, "Reading raw datasets");
    register_raw_inputs(processor, &ctx, &settings.input).await?;

    let transformer = SourceTransformer::new(&ctx, settings.pipeline.weather_min_year);
    let tables = transformer
        .conform_all()
        .await?
        .into_iter()
        .map(|(kind, df)| (LakeTable::new(Layer::Source, kind), df))
        .collect::<Vec<_>>();

    let writer = processor.table_writer();
    let markers = writer.write_tables(tables).await?;
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
        quality: None,
    };
    report.log();
    Ok(report)
}

/// Registers the four raw datasets. CSV inputs other than the fact table are
/// read with their text schema so casting stays in the conformance queries.
pub async fn register_raw_inputs(
    processor: &LakehouseProcessor,
    ctx: &SessionContext,
    input: &InputConfig,
) -> Result<()> {
    for location in [
        &input.immigration,
        &input.demographic,
        &input.airports,
        &input.temperature,
    ] {
        processor.register_input(ctx, location)?;
    }

    match input.immigration_format {
        SourceFormat::Parquet => {
            ctx.register_parquet(RAW_IMMIGRATION, &input.immigration, ParquetReadOptions::default())
                .await?
        }
        SourceFormat::Csv => {
            ctx.register_csv(RAW_IMMIGRATION, &input.immigration, csv_options(&input.immigration, b','))
                .await?
        }
    }

    ctx.register_csv(
        RAW_DEMOGRAPHIC,
        &input.demographic,
        csv_options(&input.demographic, b';').schema(get_raw_schema(RawSchema::Demographic)),
    )
    .await?;
    ctx.register_csv(
        RAW_AIRPORTS,
        &input.airports,
        csv_options(&input.airports, b',').schema(get_raw_schema(RawSchema::Airports)),
    )
    .await?;
    ctx.register_csv(
        RAW_TEMPERATURE,
        &input.temperature,
        csv_options(&input.temperature, b',').schema(get_raw_schema(RawSchema::Temperature)),
    )
    .await?;

    for name in [RAW_IMMIGRATION, RAW_DEMOGRAPHIC, RAW_AIRPORTS, RAW_TEMPERATURE] {
        let rows = ctx.table(name).await?.count().await?;
        info!(stage = STAGE, table = name, rows, "Loaded raw dataset");
    }

    Ok(())
}

fn csv_options(location: &str, delimiter: u8) -> CsvReadOptions<'_> {
    let options = CsvReadOptions::new().has_header(true).delimiter(delimiter);
    match file_extension(location) {
        Some(extension) => options.file_extension(extension),
        None => options,
    }
}
