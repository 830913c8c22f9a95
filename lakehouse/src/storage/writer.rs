use super::lake::ObjectStorage;
use crate::processor::table::LakeTable;
use crate::utils::paths::{
    PathBuilder, SUCCESS_MARKER, join_paths, partition_segment, staging_root,
};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use datafusion::arrow::array::{Array, UInt32Array};
use datafusion::arrow::compute::{cast, take_record_batch};
use datafusion::arrow::datatypes::{DataType, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::cast::as_string_array;
use datafusion::dataframe::DataFrame;
use object_store::path::Path;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PART_FILE: &str = "part-00000.parquet";

/// Contents of the `_SUCCESS` marker written next to every committed table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMarker {
    pub run_id: String,
    pub table: String,
    pub layer: String,
    pub record_count: usize,
    /// Data files relative to the table directory
    pub files: Vec<String>,
    pub partition_by: Vec<String>,
    /// sha256 over the data files, in `files` order
    pub checksum: String,
    pub columns: Vec<MarkerColumn>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A table whose files sit in the staging area, waiting for commit
#[derive(Debug)]
pub struct StagedTable {
    pub table: LakeTable,
    pub files: Vec<Path>,
    pub record_count: usize,
    pub checksum: String,
    pub schema: SchemaRef,
}

/// Writes whole tables as hive-partitioned parquet.
///
/// Files are first written below `_staging/<run id>/` and only moved over the
/// previous output once every table of the set has been staged.
pub struct TableWriter {
    storage: Arc<dyn ObjectStorage>,
    run_id: String,
}

impl TableWriter {
    pub fn new(storage: Arc<dyn ObjectStorage>, run_id: &str) -> Self {
        Self {
            storage,
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stages and commits a set of tables. Nothing is committed unless every
    /// table could be staged.
    ///
    /// The markers of the whole set are removed before any files move and
    /// written back only once every table holds its new files, so an
    /// interrupted commit leaves the set unreadable rather than mixed.
    pub async fn write_tables(&self, tables: Vec<(LakeTable, DataFrame)>) -> Result<Vec<TableMarker>> {
        let mut staged = Vec::with_capacity(tables.len());

        for (table, df) in tables {
            match self.stage_dataframe(table, df).await {
                Ok(table) => staged.push(table),
                Err(e) => {
                    warn!(table = %table, error = %e, "Staging failed, discarding run output");
                    self.discard_staging().await?;
                    return Err(e);
                }
            }
        }

        for table in &staged {
            self.retract_marker(&table.table).await?;
        }

        let mut replaced = Vec::with_capacity(staged.len());
        for table in &staged {
            replaced.push(self.swap_files(table).await?);
        }

        let mut markers = Vec::with_capacity(staged.len());
        for (table, removed) in staged.iter().zip(replaced) {
            markers.push(self.write_marker(table, removed).await?);
        }
        self.discard_staging().await?;

        Ok(markers)
    }

    pub async fn stage_dataframe(&self, table: LakeTable, df: DataFrame) -> Result<StagedTable> {
        let schema: SchemaRef = Arc::new(df.schema().as_arrow().clone());
        let batches = df.collect().await?;
        self.stage_table(table, schema, batches).await
    }

    pub async fn stage_table(
        &self,
        table: LakeTable,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<StagedTable> {
        let schema = batches.first().map(|b| b.schema()).unwrap_or(schema);
        let record_count: usize = batches.iter().map(|b| b.num_rows()).sum();
        let base = table.relative_path();

        // An empty table still gets one schema-only file so it can be read back
        let partitions = if record_count == 0 {
            BTreeMap::from([(Vec::new(), Vec::new())])
        } else {
            partition_batches(&batches, table.partition_by())?
        };

        let mut hasher = Sha256::new();
        let mut files = Vec::with_capacity(partitions.len());

        for (segments, part_batches) in partitions {
            let buffer = self.encode_parquet(&table, &schema, &part_batches)?;
            hasher.update(&buffer);

            let relative = PathBuilder::new(&base)
                .with_partition_segments(&segments)
                .with_file_name(PART_FILE)
                .build();
            let staged = join_paths(&staging_root(&self.run_id), &relative);

            debug!(table = %table, path = %staged, bytes = buffer.len(), "Staging partition file");
            self.storage.put_object(&staged, buffer).await?;
            files.push(relative);
        }

        Ok(StagedTable {
            table,
            files,
            record_count,
            checksum: format!("{:x}", hasher.finalize()),
            schema,
        })
    }

    /// Replaces the committed output of a single table with its staged files
    pub async fn commit(&self, staged: &StagedTable) -> Result<TableMarker> {
        let removed = self.swap_files(staged).await?;
        self.write_marker(staged, removed).await
    }

    async fn retract_marker(&self, table: &LakeTable) -> Result<()> {
        let key = Path::from(table.relative_path()).child(SUCCESS_MARKER);
        self.storage.delete_object(&key).await
    }

    /// Deletes the table's previous files and moves the staged ones in.
    /// Returns how many objects were removed.
    async fn swap_files(&self, staged: &StagedTable) -> Result<usize> {
        let base = Path::from(staged.table.relative_path());
        let removed = self.storage.delete_prefix(&base).await?;

        for file in &staged.files {
            let from = join_paths(&staging_root(&self.run_id), file);
            self.storage.rename_object(&from, file).await?;
        }

        Ok(removed)
    }

    async fn write_marker(&self, staged: &StagedTable, removed: usize) -> Result<TableMarker> {
        let base = Path::from(staged.table.relative_path());
        let marker = TableMarker {
            run_id: self.run_id.clone(),
            table: staged.table.name().to_string(),
            layer: staged.table.layer.as_str().to_string(),
            record_count: staged.record_count,
            files: staged
                .files
                .iter()
                .map(|file| relative_to(file, &base))
                .collect(),
            partition_by: staged
                .table
                .partition_by()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            checksum: staged.checksum.clone(),
            columns: staged
                .schema
                .fields()
                .iter()
                .map(|field| MarkerColumn {
                    name: field.name().clone(),
                    data_type: field.data_type().to_string(),
                    nullable: field.is_nullable(),
                })
                .collect(),
            created_at: Utc::now(),
        };

        let marker_json = serde_json::to_vec_pretty(&marker)?;
        self.storage
            .put_object(&base.child(SUCCESS_MARKER), marker_json)
            .await?;

        info!(
            table = %staged.table,
            rows = staged.record_count,
            files = staged.files.len(),
            replaced = removed,
            "Table committed"
        );

        Ok(marker)
    }

    pub async fn discard_staging(&self) -> Result<()> {
        self.storage.delete_prefix(&staging_root(&self.run_id)).await?;
        Ok(())
    }

    fn encode_parquet(
        &self,
        table: &LakeTable,
        schema: &SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<Vec<u8>> {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(vec![
                KeyValue::new("lake.table".to_string(), table.to_string()),
                KeyValue::new("lake.run_id".to_string(), self.run_id.clone()),
            ]))
            .build();

        let mut buffer: Vec<u8> = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema.clone(), Some(props))?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.close()?;

        Ok(buffer)
    }
}

/// Reads a committed table's `_SUCCESS` marker
pub async fn read_marker(storage: &dyn ObjectStorage, table: &LakeTable) -> Result<TableMarker> {
    let key = Path::from(table.relative_path()).child(SUCCESS_MARKER);
    if !storage.check_file_exists(&key).await? {
        return Err(Error::InvalidInput(format!(
            "Table {} has not been committed; run the stage that produces it first",
            table
        )));
    }

    let data = storage.get_object(&key).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Markers of tables that were written together. They must all carry the
/// same run id, otherwise the set mixes output of different runs.
pub async fn read_table_set(storage: &dyn ObjectStorage, tables: &[LakeTable]) -> Result<Vec<TableMarker>> {
    let mut markers = Vec::with_capacity(tables.len());
    for table in tables {
        markers.push(read_marker(storage, table).await?);
    }

    if let Some(first) = markers.first() {
        if let Some(other) = markers.iter().find(|m| m.run_id != first.run_id) {
            return Err(Error::InvalidInput(format!(
                "Tables {}/{} (run {}) and {}/{} (run {}) come from different runs; rerun the stage that produces them",
                first.layer, first.table, first.run_id, other.layer, other.table, other.run_id
            )));
        }
    }

    Ok(markers)
}

fn relative_to(file: &Path, base: &Path) -> String {
    file.prefix_match(base)
        .map(|parts| Path::from_iter(parts).to_string())
        .unwrap_or_else(|| file.to_string())
}

/// Groups rows by their hive partition segments, e.g. `["year=2016", "month=4"]`
fn partition_batches(
    batches: &[RecordBatch],
    partition_by: &[&str],
) -> Result<BTreeMap<Vec<String>, Vec<RecordBatch>>> {
    let mut partitions: BTreeMap<Vec<String>, Vec<RecordBatch>> = BTreeMap::new();

    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }

        let mut key_columns = Vec::with_capacity(partition_by.len());
        for column in partition_by {
            let index = batch.schema().index_of(column).map_err(|_| {
                Error::SchemaValidation(format!("Partition column '{}' is missing", column))
            })?;
            let values = cast(batch.column(index), &DataType::Utf8)?;
            key_columns.push(as_string_array(&values)?.clone());
        }

        let mut rows_by_key: BTreeMap<Vec<String>, Vec<u32>> = BTreeMap::new();
        for row in 0..batch.num_rows() {
            let key = partition_by
                .iter()
                .zip(&key_columns)
                .map(|(column, values)| {
                    let value = (!values.is_null(row)).then(|| values.value(row));
                    partition_segment(column, value)
                })
                .collect::<Vec<String>>();
            rows_by_key.entry(key).or_default().push(row as u32);
        }

        for (key, rows) in rows_by_key {
            let indices = UInt32Array::from(rows);
            let part = take_record_batch(batch, &indices)?;
            partitions.entry(key).or_default().push(part);
        }
    }

    Ok(partitions)
}
