use crate::processor::table::TableKind;
use common::Result;
use datafusion::prelude::*;

/// Builds the star schema from the preprocessed tables bound in the stage context
pub struct ModelBuilder {
    ctx: SessionContext,
}

impl ModelBuilder {
    pub fn new(ctx: &SessionContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Every distinct date seen as an arrival, a departure or a weather
    /// observation. `dow` runs from 1 (Sunday) to 7 (Saturday).
    pub async fn build_dim_time(&self) -> Result<DataFrame> {
        let sql = format!(
            "WITH dates AS (
                SELECT arr_date AS dt FROM {i94}
                UNION
                SELECT dep_date AS dt FROM {i94} WHERE dep_date IS NOT NULL
                UNION
                SELECT dt FROM {weather}
            )
            SELECT
                dt,
                CAST(date_part('year', dt) AS INT) AS year,
                CAST(date_part('month', dt) AS INT) AS month,
                CAST(date_part('day', dt) AS INT) AS day,
                CAST(date_part('dow', dt) AS INT) + 1 AS dow,
                CAST(date_part('week', dt) AS INT) AS week
            FROM dates",
            i94 = TableKind::Immigration.as_str(),
            weather = TableKind::Weather.as_str(),
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// Demographic rows with the number of airports in the same city and
    /// region; null when the city has none.
    pub async fn build_dim_cities(&self) -> Result<DataFrame> {
        let sql = format!(
            "SELECT c.*, a.number_of_airports
            FROM {demographic} c
            LEFT JOIN (
                SELECT iso_region, municipality, COUNT(*) AS number_of_airports
                FROM {airports}
                GROUP BY iso_region, municipality
            ) a ON c.city = a.municipality AND c.state_code = a.iso_region",
            demographic = TableKind::Demographic.as_str(),
            airports = TableKind::Airports.as_str(),
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// One row per cleaned event with the monthly mean temperature of its
    /// entry city. Weather is reduced to a single row per (city, region, year,
    /// month) first so the enrichment cannot duplicate events.
    pub async fn build_fact(&self) -> Result<DataFrame> {
        let sql = format!(
            "WITH events AS (
                SELECT
                    id,
                    country_of_residence,
                    country_of_citizenship,
                    city_of_entry,
                    state_of_entry_code,
                    border_cross_method,
                    type_of_visa,
                    class_of_admission,
                    gender,
                    age,
                    arr_date,
                    dep_date,
                    CAST(date_part('year', arr_date) AS INT) AS year,
                    CAST(date_part('month', arr_date) AS INT) AS month,
                    CAST(date_part('day', arr_date) AS INT) AS day
                FROM {i94}
            ),
            monthly_weather AS (
                SELECT city, region, year, month, AVG(avg_temperature) AS avg_temperature
                FROM {weather}
                GROUP BY city, region, year, month
            )
            SELECT e.*, w.avg_temperature
            FROM events e
            LEFT JOIN monthly_weather w
                ON e.city_of_entry = w.city
                AND e.state_of_entry_code = w.region
                AND e.year = w.year
                AND e.month = w.month",
            i94 = TableKind::Immigration.as_str(),
            weather = TableKind::Weather.as_str(),
        );

        Ok(self.ctx.sql(&sql).await?)
    }
}
