use common::{Error, Result};
use datafusion::common::JoinType;
use datafusion::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Outcome of every check run against the analytical tables
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityReport {
    pub checks: Vec<QualityCheck>,
}

impl QualityReport {
    fn record(&mut self, name: &str, passed: bool, detail: String) {
        if passed {
            info!(check = name, %detail, "Quality check passed");
        } else {
            warn!(check = name, %detail, "Quality check failed");
        }
        self.checks.push(QualityCheck {
            name: name.to_string(),
            passed,
            detail,
        });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn failures(&self) -> Vec<&QualityCheck> {
        self.checks.iter().filter(|check| !check.passed).collect()
    }

    /// `Error::QualityCheck` naming the failed checks, or the report itself
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            return Ok(self);
        }

        let failed = self
            .failures()
            .iter()
            .map(|check| format!("{} ({})", check.name, check.detail))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::QualityCheck(failed))
    }
}

/// Checks the model before it is written: no table may be empty and every
/// (year, month) of arrival must be present in the time dimension.
pub async fn check_model(
    fact: &DataFrame,
    dim_cities: &DataFrame,
    dim_time: &DataFrame,
) -> Result<QualityReport> {
    let mut report = QualityReport::default();

    for (name, df) in [
        ("fact_i94_history", fact),
        ("dim_cities", dim_cities),
        ("dim_time", dim_time),
    ] {
        let rows = df.clone().count().await?;
        report.record(
            &format!("{}_not_empty", name),
            rows > 0,
            format!("{} rows", rows),
        );
    }

    let uncovered = uncovered_arrival_months(fact, dim_time).await?;
    report.record(
        "arrival_months_in_dim_time",
        uncovered == 0,
        format!("{} arrival (year, month) pairs missing from dim_time", uncovered),
    );

    Ok(report)
}

async fn uncovered_arrival_months(fact: &DataFrame, dim_time: &DataFrame) -> Result<usize> {
    let fact_months = fact
        .clone()
        .select(vec![col("year"), col("month")])?
        .distinct()?;
    let time_months = dim_time
        .clone()
        .select(vec![col("year").alias("t_year"), col("month").alias("t_month")])?
        .distinct()?;

    let missing = fact_months
        .join(
            time_months,
            JoinType::LeftAnti,
            &["year", "month"],
            &["t_year", "t_month"],
            None,
        )?
        .count()
        .await?;

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int32Array;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn months(ctx: &SessionContext, rows: &[(i32, i32)]) -> DataFrame {
        let schema = Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int32, true),
            Field::new("month", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                Arc::new(Int32Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
            ],
        )
        .unwrap();
        ctx.read_batch(batch).unwrap()
    }

    #[tokio::test]
    async fn test_covered_model_passes() {
        let ctx = SessionContext::new();
        let fact = months(&ctx, &[(2016, 4), (2016, 4)]);
        let cities = months(&ctx, &[(0, 0)]);
        let time = months(&ctx, &[(2016, 4), (2016, 5)]);

        let report = check_model(&fact, &cities, &time).await.unwrap();
        assert!(report.passed());
        assert_eq!(report.checks.len(), 4);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_empty_fact_fails() {
        let ctx = SessionContext::new();
        let fact = months(&ctx, &[]);
        let cities = months(&ctx, &[(0, 0)]);
        let time = months(&ctx, &[(2016, 4)]);

        let report = check_model(&fact, &cities, &time).await.unwrap();
        assert!(!report.passed());
        let failed: Vec<_> = report.failures().iter().map(|c| c.name.clone()).collect();
        assert_eq!(failed, vec!["fact_i94_history_not_empty"]);
    }

    #[tokio::test]
    async fn test_uncovered_month_fails() {
        let ctx = SessionContext::new();
        let fact = months(&ctx, &[(2016, 4), (2016, 6)]);
        let cities = months(&ctx, &[(0, 0)]);
        let time = months(&ctx, &[(2016, 4), (2017, 6)]);

        let report = check_model(&fact, &cities, &time).await.unwrap();
        assert!(!report.passed());
        match report.into_result() {
            Err(Error::QualityCheck(detail)) => {
                assert!(detail.contains("arrival_months_in_dim_time"));
                assert!(detail.starts_with("arrival_months_in_dim_time (1 arrival"));
            }
            other => panic!("expected quality failure, got {:?}", other.map(|r| r.checks.len())),
        }
    }
}
