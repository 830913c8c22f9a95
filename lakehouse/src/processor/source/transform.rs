use super::{RAW_AIRPORTS, RAW_DEMOGRAPHIC, RAW_IMMIGRATION, RAW_TEMPERATURE};
use crate::processor::reference::{COUNTRY_CODES, MODE_CODES, PORT_CODES, STATE_CODES, VISA_CODES};
use crate::processor::table::TableKind;
use crate::processor::udf::{DAY_OFFSET_TO_DATE, PARSE_COORDINATE};
use common::Result;
use datafusion::prelude::*;

/// Numeric text or floats to BIGINT, truncating toward zero; junk becomes null
fn lenient_bigint(column: &str) -> String {
    format!("TRY_CAST(TRY_CAST({column} AS DOUBLE) AS BIGINT)")
}

fn date_parts(date: &str) -> String {
    format!(
        "CAST(date_part('year', {date}) AS INT) AS year, \
         CAST(date_part('month', {date}) AS INT) AS month, \
         CAST(date_part('day', {date}) AS INT) AS day"
    )
}

/// Turns the raw inputs bound in a stage context into the conformed source tables
pub struct SourceTransformer {
    ctx: SessionContext,
    weather_min_year: i32,
}

impl SourceTransformer {
    pub fn new(ctx: &SessionContext, weather_min_year: i32) -> Self {
        Self {
            ctx: ctx.clone(),
            weather_min_year,
        }
    }

    pub async fn conform_all(&self) -> Result<Vec<(TableKind, DataFrame)>> {
        Ok(vec![
            (TableKind::Immigration, self.conform_immigration().await?),
            (TableKind::Demographic, self.conform_demographic().await?),
            (TableKind::Airports, self.conform_airports().await?),
            (TableKind::Weather, self.conform_weather().await?),
        ])
    }

    /// Resolves every code of a travel event against the reference sets.
    /// Events with any unresolvable code are dropped by the inner joins.
    pub async fn conform_immigration(&self) -> Result<DataFrame> {
        let sql = format!(
            "WITH decoded AS (
                SELECT
                    {id} AS id,
                    {residence} AS residence_code,
                    {citizenship} AS citizenship_code,
                    trim(CAST(i94port AS VARCHAR)) AS port_code,
                    {mode} AS mode_code,
                    {visa} AS visa_code,
                    CAST(visatype AS VARCHAR) AS class_of_admission,
                    CAST(gender AS VARCHAR) AS gender,
                    {age} AS age,
                    {decode}({arrival}) AS arr_date,
                    {decode}({departure}) AS dep_date
                FROM {raw}
            )
            SELECT
                d.id,
                UPPER(res.country_name) AS country_of_residence,
                UPPER(cit.country_name) AS country_of_citizenship,
                UPPER(p.port_location) AS city_of_entry,
                UPPER(p.state) AS state_of_entry_code,
                UPPER(s.state) AS state_of_entry_full,
                m.border_cross_method,
                v.visa_type AS type_of_visa,
                d.class_of_admission,
                d.gender,
                d.age,
                d.arr_date,
                d.dep_date,
                {parts}
            FROM decoded d
            JOIN {country} res ON d.residence_code = res.code
            JOIN {country} cit ON d.citizenship_code = cit.code
            JOIN {port} p ON d.port_code = p.code
            JOIN {state} s ON p.state = s.code
            JOIN {mode_set} m ON d.mode_code = m.code
            JOIN {visa_set} v ON d.visa_code = v.code",
            id = lenient_bigint("cicid"),
            residence = lenient_bigint("i94res"),
            citizenship = lenient_bigint("i94cit"),
            mode = lenient_bigint("i94mode"),
            visa = lenient_bigint("i94visa"),
            age = lenient_bigint("i94bir"),
            decode = DAY_OFFSET_TO_DATE,
            arrival = lenient_bigint("arrdate"),
            departure = lenient_bigint("depdate"),
            raw = RAW_IMMIGRATION,
            parts = date_parts("d.arr_date"),
            country = COUNTRY_CODES.name,
            port = PORT_CODES.name,
            state = STATE_CODES.name,
            mode_set = MODE_CODES.name,
            visa_set = VISA_CODES.name,
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    pub async fn conform_demographic(&self) -> Result<DataFrame> {
        let sql = format!(
            "SELECT
                UPPER(city) AS city,
                UPPER(state) AS state,
                TRY_CAST(median_age AS DOUBLE) AS median_age,
                {male} AS male_population,
                {female} AS female_population,
                {total} AS total_population,
                {veterans} AS number_of_veterans,
                {foreign_born} AS foreign_born,
                TRY_CAST(avg_household_size AS DOUBLE) AS avg_household_size,
                UPPER(state_code) AS state_code,
                race,
                {count} AS \"count\"
            FROM {raw}",
            male = lenient_bigint("male_population"),
            female = lenient_bigint("female_population"),
            total = lenient_bigint("total_population"),
            veterans = lenient_bigint("number_of_veterans"),
            foreign_born = lenient_bigint("foreign_born"),
            count = lenient_bigint("\"count\""),
            raw = RAW_DEMOGRAPHIC,
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// U.S. airports that are not closed; `US-IL` becomes region `IL` and the
    /// `"lon, lat"` pair is split into two columns.
    pub async fn conform_airports(&self) -> Result<DataFrame> {
        let sql = format!(
            "SELECT
                \"type\",
                name,
                {elevation} AS elevation_ft,
                NULLIF(UPPER(split_part(iso_region, '-', 2)), '') AS iso_region,
                UPPER(municipality) AS municipality,
                gps_code,
                TRY_CAST(trim(split_part(coordinates, ',', 1)) AS DOUBLE) AS lon,
                TRY_CAST(trim(split_part(coordinates, ',', 2)) AS DOUBLE) AS lat
            FROM {raw}
            WHERE iso_country = 'US' AND \"type\" <> 'closed'",
            elevation = lenient_bigint("elevation_ft"),
            raw = RAW_AIRPORTS,
        );

        Ok(self.ctx.sql(&sql).await?)
    }

    /// U.S. observations from the configured year on. Coordinates carry a
    /// hemisphere suffix; every U.S. city is north and west, so only the
    /// longitude changes sign.
    pub async fn conform_weather(&self) -> Result<DataFrame> {
        let sql = format!(
            "WITH parsed AS (
                SELECT
                    TRY_CAST(dt AS DATE) AS dt,
                    TRY_CAST(average_temperature AS DOUBLE) AS avg_temperature,
                    UPPER(city) AS city,
                    UPPER(country) AS country,
                    -{parse}(longitude) AS lon,
                    {parse}(latitude) AS lat
                FROM {raw}
                WHERE UPPER(country) = 'UNITED STATES'
            )
            SELECT dt, {parts}, avg_temperature, city, country, lon, lat
            FROM parsed
            WHERE date_part('year', dt) >= {min_year}",
            parse = PARSE_COORDINATE,
            raw = RAW_TEMPERATURE,
            parts = date_parts("dt"),
            min_year = self.weather_min_year,
        );

        Ok(self.ctx.sql(&sql).await?)
    }
}
