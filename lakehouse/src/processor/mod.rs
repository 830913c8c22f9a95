pub mod model;
pub mod preprocess;
pub mod quality;
pub mod reference;
pub mod report;
pub mod source;
pub mod table;
pub mod udf;

#[cfg(test)]
pub(crate) mod testing;

pub use quality::{QualityCheck, QualityReport};
pub use report::{StageReport, TableReport};
pub use table::{LakeTable, Layer, TableKind};
pub use udf::register_udfs;

use crate::storage::{LakeStorage, ObjectStorage, StoreRegistry, TableWriter, read_table_set};
use crate::utils::paths::SUCCESS_MARKER;
use common::config::Settings;
use common::{Error, Result};
use datafusion::dataframe::DataFrame;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::ParquetReadOptions;
use object_store::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Shared plumbing for the three stages: settings, lake storage and
/// per-stage session contexts.
pub struct LakehouseProcessor {
    settings: Settings,
    registry: StoreRegistry,
    storage: Arc<dyn ObjectStorage>,
}

impl LakehouseProcessor {
    pub fn new(settings: Settings) -> Result<Self> {
        let registry = StoreRegistry::new(settings.s3.clone());
        let storage = Arc::new(LakeStorage::from_location(&settings.lake.root, &registry)?);

        Ok(Self {
            settings,
            registry,
            storage,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A fresh context with the UDFs and the lake's object store registered.
    /// Every stage gets its own, so table bindings never leak between stages.
    pub fn create_context(&self) -> Result<SessionContext> {
        let ctx = SessionContext::new();
        register_udfs(&ctx, self.settings.pipeline.day_offset_epoch)?;
        self.registry.register_location(&ctx, &self.settings.lake.root)?;
        Ok(ctx)
    }

    pub fn register_input(&self, ctx: &SessionContext, location: &str) -> Result<()> {
        self.registry.register_location(ctx, location)
    }

    /// Binds a committed lake table under its table name
    pub async fn read_lake_table(&self, ctx: &SessionContext, table: LakeTable) -> Result<DataFrame> {
        let base = Path::from(table.relative_path());
        if !self.storage.check_file_exists(&base.child(SUCCESS_MARKER)).await? {
            return Err(Error::InvalidInput(format!(
                "Table {} has not been committed; run the stage that produces it first",
                table
            )));
        }

        let url = format!("{}/", self.storage.location_url(&base));
        debug!(table = %table, url = %url, "Registering lake table");

        ctx.deregister_table(table.name())?;
        ctx.register_parquet(table.name(), &url, ParquetReadOptions::default())
            .await?;

        Ok(ctx.table(table.name()).await?)
    }

    /// Binds every table of a layer that one stage run wrote together,
    /// refusing a set whose markers carry different run ids
    pub async fn read_layer(
        &self,
        ctx: &SessionContext,
        layer: Layer,
        kinds: &[TableKind],
    ) -> Result<Vec<DataFrame>> {
        let tables: Vec<LakeTable> = kinds
            .iter()
            .map(|kind| LakeTable::new(layer, *kind))
            .collect();
        read_table_set(self.storage.as_ref(), &tables).await?;

        let mut frames = Vec::with_capacity(tables.len());
        for table in tables {
            frames.push(self.read_lake_table(ctx, table).await?);
        }
        Ok(frames)
    }

    /// A writer with a new run id, so concurrent runs never share a staging area
    pub fn table_writer(&self) -> TableWriter {
        TableWriter::new(self.storage.clone(), &Uuid::new_v4().to_string())
    }

    pub async fn run_source(&self) -> Result<StageReport> {
        source::run(self).await
    }

    pub async fn run_preprocess(&self) -> Result<StageReport> {
        preprocess::run(self).await
    }

    pub async fn run_model(&self) -> Result<StageReport> {
        model::run(self).await
    }
}

/// Binds `df` under `name` in the stage context, replacing any earlier binding
pub fn bind(ctx: &SessionContext, name: &str, df: DataFrame) -> Result<()> {
    ctx.deregister_table(name)?;
    ctx.register_table(name, df.into_view())?;
    Ok(())
}

pub async fn count_rows(df: &DataFrame) -> Result<usize> {
    Ok(df.clone().count().await?)
}
