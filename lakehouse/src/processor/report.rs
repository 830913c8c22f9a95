use crate::processor::quality::QualityReport;
use crate::storage::TableMarker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Row accounting for one table produced by a stage
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    /// Rows read before cleaning; `None` when the table has no single input
    pub input_rows: Option<usize>,
    pub output_rows: usize,
}

impl TableReport {
    pub fn new(table: impl ToString, input_rows: Option<usize>, output_rows: usize) -> Self {
        Self {
            table: table.to_string(),
            input_rows,
            output_rows,
        }
    }

    pub fn dropped(&self) -> Option<usize> {
        self.input_rows
            .map(|input| input.saturating_sub(self.output_rows))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub tables: Vec<TableReport>,
    pub markers: Vec<TableMarker>,
    pub quality: Option<QualityReport>,
}

impl StageReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn log(&self) {
        for table in &self.tables {
            info!(
                stage = %self.stage,
                table = %table.table,
                rows = table.output_rows,
                dropped = table.dropped().unwrap_or(0),
                "Table summary"
            );
        }
        info!(
            stage = %self.stage,
            run_id = %self.run_id,
            tables = self.tables.len(),
            duration_secs = self.duration_secs,
            "Stage completed"
        );
    }
}
