use crate::processor::bind;
use crate::processor::table::TableKind;
use crate::processor::udf::DEGREE_DISTANCE;
use common::Result;
use common::config::{PipelineConfig, RegionResolution};
use datafusion::prelude::*;

pub const CLEAN_AIRPORTS: &str = "clean_airports";
pub const CLEAN_WEATHER: &str = "clean_weather";
pub const WEATHER_REGIONS: &str = "weather_regions";

/// (race label in the source data, pivoted column)
pub const RACE_COLUMNS: [(&str, &str); 5] = [
    ("American Indian and Alaska Native", "american_indian_and_alaska_native"),
    ("Asian", "asian"),
    ("White", "white"),
    ("Hispanic or Latino", "hispanic_or_latino"),
    ("Black or African-American", "black_or_african_american"),
];

const DEMOGRAPHIC_ATTRIBUTES: [&str; 7] = [
    "median_age",
    "male_population",
    "female_population",
    "total_population",
    "number_of_veterans",
    "foreign_born",
    "avg_household_size",
];

/// Cleans the conformed tables bound in the stage context under their table names
pub struct CleaningTransformer {
    ctx: SessionContext,
    distance_threshold: f64,
    region_resolution: RegionResolution,
}

impl CleaningTransformer {
    pub fn new(ctx: &SessionContext, pipeline: &PipelineConfig) -> Self {
        Self {
            ctx: ctx.clone(),
            distance_threshold: pipeline.distance_threshold,
            region_resolution: pipeline.region_resolution,
        }
    }

    pub async fn clean_all(&self) -> Result<Vec<(TableKind, DataFrame)>> {
        let immigration = self
            .clean_immigration(self.ctx.table(TableKind::Immigration.as_str()).await?)?;
        let demographic = self.pivot_demographic().await?;
        let airports = self.clean_airports(self.ctx.table(TableKind::Airports.as_str()).await?)?;
        let weather = self
            .assign_weather_regions(self.ctx.table(TableKind::Weather.as_str()).await?, airports.clone())
            .await?;

        Ok(vec![
            (TableKind::Immigration, immigration),
            (TableKind::Demographic, demographic),
            (TableKind::Airports, airports),
            (TableKind::Weather, weather),
        ])
    }

    /// Drops exact duplicates, events missing a key field and events that
    /// depart before they arrive. A repeated `id` with different attributes
    /// is kept.
    pub fn clean_immigration(&self, df: DataFrame) -> Result<DataFrame> {
        let df = df.distinct()?.filter(
            col("id")
                .is_not_null()
                .and(col("state_of_entry_code").is_not_null())
                .and(col("city_of_entry").is_not_null())
                .and(col("arr_date").is_not_null())
                .and(
                    col("dep_date")
                        .is_null()
                        .or(col("dep_date").gt_eq(col("arr_date"))),
                ),
        )?;

        Ok(df)
    }

    /// One wide row per (city, state_code). Category columns hold the count
    /// reported for that race, or null when the city has no such row.
    pub async fn pivot_demographic(&self) -> Result<DataFrame> {
        let attributes = DEMOGRAPHIC_ATTRIBUTES
            .iter()
            .map(|c| format!("MAX({c}) AS {c}"))
            .collect::<Vec<_>>()
            .join(",\n                ");
        let categories = RACE_COLUMNS
            .iter()
            .map(|(race, column)| {
                format!("MAX(CASE WHEN race = '{race}' THEN \"count\" END) AS {column}")
            })
            .collect::<Vec<_>>()
            .join(",\n                ");

        let sql = format!(
            "SELECT
                city,
                MAX(state) AS state,
                state_code,
                {attributes},
                {categories}
            FROM {table}
            WHERE city IS NOT NULL AND state_code IS NOT NULL
            GROUP BY city, state_code",
            table = TableKind::Demographic.as_str(),
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// Duplicate airports are kept: they are counted per city later on
    pub fn clean_airports(&self, df: DataFrame) -> Result<DataFrame> {
        let df = df.filter(
            col("iso_region")
                .is_not_null()
                .and(col("municipality").is_not_null())
                .and(col("lat").is_not_null())
                .and(col("lon").is_not_null()),
        )?;

        Ok(df)
    }

    /// Gives every weather series the region of an airport in the same city
    /// lying within the distance threshold, then averages observations per
    /// (date, city, region, location). Series without such an airport are dropped.
    pub async fn assign_weather_regions(
        &self,
        weather: DataFrame,
        airports: DataFrame,
    ) -> Result<DataFrame> {
        let weather = weather.distinct()?.filter(
            col("dt")
                .is_not_null()
                .and(col("avg_temperature").is_not_null())
                .and(col("city").is_not_null())
                .and(col("lat").is_not_null())
                .and(col("lon").is_not_null()),
        )?;
        bind(&self.ctx, CLEAN_WEATHER, weather)?;
        bind(&self.ctx, CLEAN_AIRPORTS, airports)?;

        let regions = self.resolve_regions().await?;
        bind(&self.ctx, WEATHER_REGIONS, regions)?;

        let sql = format!(
            "SELECT w.dt, w.year, w.month, w.day, w.city, r.region, w.lat, w.lon,
                AVG(w.avg_temperature) AS avg_temperature
            FROM {CLEAN_WEATHER} w
            JOIN {WEATHER_REGIONS} r ON w.city = r.city AND w.lat = r.lat AND w.lon = r.lon
            GROUP BY w.dt, w.year, w.month, w.day, w.city, r.region, w.lat, w.lon"
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// Region per distinct (city, lat, lon) weather location
    pub async fn resolve_regions(&self) -> Result<DataFrame> {
        let qualifying = format!(
            "WITH locations AS (
                SELECT DISTINCT city, lat, lon FROM {CLEAN_WEATHER}
            ),
            candidates AS (
                SELECT l.city, l.lat, l.lon, a.iso_region AS region,
                    {DEGREE_DISTANCE}(l.lat, l.lon, a.lat, a.lon) AS distance
                FROM locations l
                JOIN {CLEAN_AIRPORTS} a ON l.city = a.municipality
            ),
            qualifying AS (
                SELECT city, lat, lon, region, distance
                FROM candidates
                WHERE distance < {threshold:?}
            )",
            threshold = self.distance_threshold,
        );

        let sql = match self.region_resolution {
            RegionResolution::Nearest => format!(
                "{qualifying}
                SELECT city, lat, lon, region
                FROM (
                    SELECT city, lat, lon, region,
                        ROW_NUMBER() OVER (PARTITION BY city, lat, lon ORDER BY distance, region) AS match_rank
                    FROM qualifying
                ) ranked
                WHERE match_rank = 1"
            ),
            RegionResolution::AllMatches => format!(
                "{qualifying}
                SELECT DISTINCT city, lat, lon, region FROM qualifying"
            ),
        };

        Ok(self.ctx.sql(&sql).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::{bind_batch, column_values, float_values, strings};
    use crate::processor::udf::register_udfs;
    use chrono::NaiveDate;
    use datafusion::arrow::array::{ArrayRef, Date32Array, Float64Array, Int32Array, Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn days(date: &str) -> i32 {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        (date - NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).num_days() as i32
    }

    fn context() -> SessionContext {
        let ctx = SessionContext::new();
        register_udfs(&ctx, NaiveDate::from_ymd_opt(1960, 1, 1).unwrap()).unwrap();
        ctx
    }

    fn pipeline(resolution: RegionResolution) -> PipelineConfig {
        PipelineConfig {
            region_resolution: resolution,
            ..PipelineConfig::default()
        }
    }

    fn batch(fields: Vec<(&str, DataType)>, columns: Vec<ArrayRef>) -> RecordBatch {
        let schema = Schema::new(
            fields
                .into_iter()
                .map(|(name, data_type)| Field::new(name, data_type, true))
                .collect::<Vec<_>>(),
        );
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    fn immigration_batch(rows: &[(Option<i64>, Option<&str>, &str, Option<&str>)]) -> RecordBatch {
        batch(
            vec![
                ("id", DataType::Int64),
                ("state_of_entry_code", DataType::Utf8),
                ("city_of_entry", DataType::Utf8),
                ("arr_date", DataType::Date32),
                ("dep_date", DataType::Date32),
            ],
            vec![
                Arc::new(Int64Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                Arc::new(StringArray::from(rows.iter().map(|r| Some(r.2)).collect::<Vec<_>>())),
                Arc::new(Date32Array::from(rows.iter().map(|_| Some(days("2016-04-05"))).collect::<Vec<_>>())),
                Arc::new(Date32Array::from(rows.iter().map(|r| r.3.map(days)).collect::<Vec<_>>())),
            ],
        )
    }

    #[tokio::test]
    async fn test_departure_before_arrival_is_dropped() {
        let ctx = context();
        let transformer = CleaningTransformer::new(&ctx, &PipelineConfig::default());
        let df = ctx
            .read_batch(immigration_batch(&[
                (Some(1), Some("IL"), "CHICAGO", Some("2016-03-01")),
                (Some(2), Some("IL"), "CHICAGO", None),
                (Some(2), Some("IL"), "CHICAGO", None),
                (Some(3), Some("IL"), "CHICAGO", Some("2016-04-05")),
                (Some(4), None, "CHICAGO", None),
                (None, Some("IL"), "CHICAGO", None),
            ]))
            .unwrap();

        let cleaned = transformer
            .clean_immigration(df)
            .unwrap()
            .sort(vec![col("id").sort(true, false)])
            .unwrap();

        assert_eq!(column_values(&cleaned, "id").await, strings(&[Some("2"), Some("3")]));
        assert_eq!(
            column_values(&cleaned, "dep_date").await,
            strings(&[None, Some("2016-04-05")])
        );
    }

    #[tokio::test]
    async fn test_demographic_pivot_keeps_absent_categories_null() {
        let ctx = context();
        let rows: [(&str, &str, &str, i64); 3] = [
            ("CHICAGO", "IL", "Asian", 500),
            ("CHICAGO", "IL", "White", 1000),
            ("SPRINGFIELD", "IL", "Hispanic or Latino", 70),
        ];
        bind_batch(
            &ctx,
            TableKind::Demographic.as_str(),
            batch(
                vec![
                    ("city", DataType::Utf8),
                    ("state", DataType::Utf8),
                    ("median_age", DataType::Float64),
                    ("male_population", DataType::Int64),
                    ("female_population", DataType::Int64),
                    ("total_population", DataType::Int64),
                    ("number_of_veterans", DataType::Int64),
                    ("foreign_born", DataType::Int64),
                    ("avg_household_size", DataType::Float64),
                    ("state_code", DataType::Utf8),
                    ("race", DataType::Utf8),
                    ("count", DataType::Int64),
                ],
                vec![
                    Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                    Arc::new(StringArray::from(vec!["ILLINOIS"; 3])),
                    Arc::new(Float64Array::from(vec![34.2; 3])),
                    Arc::new(Int64Array::from(vec![1_300_000; 3])),
                    Arc::new(Int64Array::from(vec![1_400_000; 3])),
                    Arc::new(Int64Array::from(vec![2_700_000; 3])),
                    Arc::new(Int64Array::from(vec![70_000; 3])),
                    Arc::new(Int64Array::from(vec![570_000; 3])),
                    Arc::new(Float64Array::from(vec![2.5; 3])),
                    Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                    Arc::new(StringArray::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
                    Arc::new(Int64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
                ],
            ),
        );

        let transformer = CleaningTransformer::new(&ctx, &PipelineConfig::default());
        let df = transformer
            .pivot_demographic()
            .await
            .unwrap()
            .sort(vec![col("city").sort(true, false)])
            .unwrap();

        assert_eq!(
            column_values(&df, "city").await,
            strings(&[Some("CHICAGO"), Some("SPRINGFIELD")])
        );
        assert_eq!(column_values(&df, "asian").await, strings(&[Some("500"), None]));
        assert_eq!(column_values(&df, "white").await, strings(&[Some("1000"), None]));
        assert_eq!(
            column_values(&df, "hispanic_or_latino").await,
            strings(&[None, Some("70")])
        );
        assert_eq!(
            column_values(&df, "american_indian_and_alaska_native").await,
            strings(&[None, None])
        );
        assert_eq!(
            column_values(&df, "total_population").await,
            strings(&[Some("2700000"), Some("2700000")])
        );
    }

    // (dt, year, city, lat, lon, avg_temperature)
    fn weather_batch(rows: &[(&str, i32, &str, f64, f64, f64)]) -> RecordBatch {
        batch(
            vec![
                ("dt", DataType::Date32),
                ("year", DataType::Int32),
                ("month", DataType::Int32),
                ("day", DataType::Int32),
                ("avg_temperature", DataType::Float64),
                ("city", DataType::Utf8),
                ("country", DataType::Utf8),
                ("lon", DataType::Float64),
                ("lat", DataType::Float64),
            ],
            vec![
                Arc::new(Date32Array::from(rows.iter().map(|r| days(r.0)).collect::<Vec<_>>())),
                Arc::new(Int32Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                Arc::new(Int32Array::from(vec![8; rows.len()])),
                Arc::new(Int32Array::from(vec![1; rows.len()])),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.5).collect::<Vec<_>>())),
                Arc::new(StringArray::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
                Arc::new(StringArray::from(vec!["UNITED STATES"; rows.len()])),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.4).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
            ],
        )
    }

    fn airports_batch(rows: &[(&str, &str, f64, f64)]) -> RecordBatch {
        batch(
            vec![
                ("type", DataType::Utf8),
                ("name", DataType::Utf8),
                ("elevation_ft", DataType::Int64),
                ("iso_region", DataType::Utf8),
                ("municipality", DataType::Utf8),
                ("gps_code", DataType::Utf8),
                ("lon", DataType::Float64),
                ("lat", DataType::Float64),
            ],
            vec![
                Arc::new(StringArray::from(vec!["small_airport"; rows.len()])),
                Arc::new(StringArray::from(vec!["Field"; rows.len()])),
                Arc::new(Int64Array::from(vec![600; rows.len()])),
                Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                Arc::new(StringArray::from(vec![None::<&str>; rows.len()])),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
            ],
        )
    }

    // (city, region, lat, lon): one airport 0.5 degrees away, another 2.0 away,
    // and one at 0.8 degrees in a different region
    fn kansas_city_airports() -> RecordBatch {
        airports_batch(&[
            ("KANSAS CITY", "MO", 39.5, -94.0),
            ("KANSAS CITY", "IA", 41.0, -94.0),
            ("KANSAS CITY", "KS", 39.0, -94.8),
            ("ST LOUIS", "MO", 39.0, -94.0),
        ])
    }

    async fn regions_for(resolution: RegionResolution, weather: RecordBatch) -> DataFrame {
        regions_with_airports(resolution, weather, kansas_city_airports()).await
    }

    async fn regions_with_airports(
        resolution: RegionResolution,
        weather: RecordBatch,
        airports: RecordBatch,
    ) -> DataFrame {
        let ctx = context();
        let transformer = CleaningTransformer::new(&ctx, &pipeline(resolution));
        let weather = ctx.read_batch(weather).unwrap();
        let airports = ctx.read_batch(airports).unwrap();

        transformer
            .assign_weather_regions(weather, airports)
            .await
            .unwrap()
            .sort(vec![
                col("region").sort(true, false),
                col("dt").sort(true, false),
            ])
            .unwrap()
    }

    #[tokio::test]
    async fn test_nearest_airport_region_wins() {
        let weather = weather_batch(&[
            ("2013-08-01", 2013, "KANSAS CITY", 39.0, -94.0, 25.0),
            ("2013-08-01", 2013, "KANSAS CITY", 39.0, -94.0, 27.0),
            ("2013-09-01", 2013, "KANSAS CITY", 39.0, -94.0, 20.0),
            ("2013-08-01", 2013, "SMALLVILLE", 39.0, -94.0, 22.0),
        ]);

        let df = regions_for(RegionResolution::Nearest, weather).await;

        assert_eq!(column_values(&df, "region").await, strings(&[Some("MO"), Some("MO")]));
        assert_eq!(column_values(&df, "city").await, strings(&[Some("KANSAS CITY"), Some("KANSAS CITY")]));
        assert_eq!(float_values(&df, "avg_temperature").await, vec![Some(26.0), Some(20.0)]);
    }

    #[tokio::test]
    async fn test_equidistant_airports_resolve_to_lowest_region_code() {
        let weather = weather_batch(&[("2013-08-01", 2013, "KANSAS CITY", 39.0, -94.0, 25.0)]);
        // both exactly 0.5 degrees from the weather location
        let airports = airports_batch(&[
            ("KANSAS CITY", "MO", 39.0, -93.5),
            ("KANSAS CITY", "KS", 39.0, -94.5),
        ]);

        let df = regions_with_airports(RegionResolution::Nearest, weather, airports).await;

        assert_eq!(column_values(&df, "region").await, strings(&[Some("KS")]));
        assert_eq!(float_values(&df, "avg_temperature").await, vec![Some(25.0)]);
    }

    #[tokio::test]
    async fn test_all_matches_keeps_every_qualifying_region() {
        let weather = weather_batch(&[("2013-08-01", 2013, "KANSAS CITY", 39.0, -94.0, 25.0)]);

        let df = regions_for(RegionResolution::AllMatches, weather).await;

        // IA is 2.0 degrees away and never qualifies
        assert_eq!(column_values(&df, "region").await, strings(&[Some("KS"), Some("MO")]));
    }

    #[tokio::test]
    async fn test_region_assignment_ignores_input_order() {
        let rows = [
            ("2013-08-01", 2013, "KANSAS CITY", 39.0, -94.0, 25.0),
            ("2013-09-01", 2013, "KANSAS CITY", 39.0, -94.0, 20.0),
        ];
        let mut reversed = rows;
        reversed.reverse();

        let forward = regions_for(RegionResolution::Nearest, weather_batch(&rows)).await;
        let backward = regions_for(RegionResolution::Nearest, weather_batch(&reversed)).await;

        for column in ["dt", "city", "region", "avg_temperature"] {
            assert_eq!(
                column_values(&forward, column).await,
                column_values(&backward, column).await
            );
        }
    }
}
