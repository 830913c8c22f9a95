use arrow::datatypes::{DataType, Field, Schema};
use lazy_static::lazy_static;

// Raw inputs are read as text and cast during conformance.
fn text_schema(columns: &[&str]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<Field>>(),
    )
}

/// Column names are positional: the header line of the file is skipped.
pub fn raw_demographic_schema() -> Schema {
    text_schema(&[
        "city",
        "state",
        "median_age",
        "male_population",
        "female_population",
        "total_population",
        "number_of_veterans",
        "foreign_born",
        "avg_household_size",
        "state_code",
        "race",
        "count",
    ])
}

pub fn raw_airports_schema() -> Schema {
    text_schema(&[
        "ident",
        "type",
        "name",
        "elevation_ft",
        "continent",
        "iso_country",
        "iso_region",
        "municipality",
        "gps_code",
        "iata_code",
        "local_code",
        "coordinates",
    ])
}

pub fn raw_temperature_schema() -> Schema {
    text_schema(&[
        "dt",
        "average_temperature",
        "average_temperature_uncertainty",
        "city",
        "country",
        "latitude",
        "longitude",
    ])
}

pub fn reference_schema(columns: &[&str]) -> Schema {
    text_schema(columns)
}

pub enum RawSchema {
    Demographic,
    Airports,
    Temperature,
}

pub fn get_raw_schema(kind: RawSchema) -> &'static Schema {
    match kind {
        RawSchema::Demographic => &RAW_DEMOGRAPHIC_SCHEMA,
        RawSchema::Airports => &RAW_AIRPORTS_SCHEMA,
        RawSchema::Temperature => &RAW_TEMPERATURE_SCHEMA,
    }
}

// Lazy-loaded static schemas
lazy_static! {
    static ref RAW_DEMOGRAPHIC_SCHEMA: Schema = raw_demographic_schema();
    static ref RAW_AIRPORTS_SCHEMA: Schema = raw_airports_schema();
    static ref RAW_TEMPERATURE_SCHEMA: Schema = raw_temperature_schema();
}
