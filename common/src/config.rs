use chrono::NaiveDate;
use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub input: InputConfig,
    pub lake: LakeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub s3: Option<S3Settings>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locations of the raw datasets. Each entry is a local path or an `s3://` url.
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Directory holding countries.csv, i94ports.csv, i94mode.csv, i94visa.csv and us_states.csv
    pub dict_tables: String,
    pub immigration: String,
    #[serde(default)]
    pub immigration_format: SourceFormat,
    pub demographic: String,
    pub airports: String,
    pub temperature: String,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Parquet,
    Csv,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LakeConfig {
    /// Local directory or `s3://bucket/prefix`
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "default_day_offset_epoch")]
    pub day_offset_epoch: NaiveDate,
    #[serde(default = "default_weather_min_year")]
    pub weather_min_year: i32,
    #[serde(default)]
    pub region_resolution: RegionResolution,
}

/// How a weather location picks its region when several airports qualify.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegionResolution {
    /// Region of the closest qualifying airport, ties broken by region code.
    #[default]
    Nearest,
    /// Every distinct qualifying region is kept.
    AllMatches,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub allow_http: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            day_offset_epoch: default_day_offset_epoch(),
            weather_min_year: default_weather_min_year(),
            region_resolution: RegionResolution::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_distance_threshold() -> f64 {
    1.0
}

fn default_day_offset_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1960, 1, 1).unwrap_or_default()
}

fn default_weather_min_year() -> i32 {
    1960
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let config = builder.build()?;

        let settings: Settings = config.try_deserialize()?;

        debug!(
            lake_root = %settings.lake.root,
            distance_threshold = settings.pipeline.distance_threshold,
            "Parsed pipeline settings"
        );

        Ok(settings)
    }
}
