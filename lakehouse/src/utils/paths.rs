use object_store::path::Path;

pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";
pub const SUCCESS_MARKER: &str = "_SUCCESS";
pub const STAGING_DIR: &str = "_staging";

/// Builds hive-style object paths such as `analytics/dim_time/year=2016/month=4/part-00000.parquet`
pub struct PathBuilder {
    base: Path,
    partitions: Vec<String>,
    file_name: Option<String>,
}

impl PathBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: Path::from(base),
            partitions: Vec::new(),
            file_name: None,
        }
    }

    pub fn with_partition_segments(mut self, segments: &[String]) -> Self {
        self.partitions.extend(segments.iter().cloned());
        self
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.file_name = Some(file_name.to_string());
        self
    }

    pub fn build(&self) -> Path {
        let mut path = self.base.clone();
        for segment in &self.partitions {
            path = path.child(segment.as_str());
        }
        if let Some(file_name) = &self.file_name {
            path = path.child(file_name.as_str());
        }
        path
    }
}

/// `column=value`, with nulls mapped to the hive default partition
pub fn partition_segment(column: &str, value: Option<&str>) -> String {
    format!("{}={}", column, value.unwrap_or(HIVE_DEFAULT_PARTITION))
}

/// Root of a run's staging area
pub fn staging_root(run_id: &str) -> Path {
    Path::from(STAGING_DIR).child(run_id)
}

pub fn join_paths(base: &Path, relative: &Path) -> Path {
    Path::from_iter(base.parts().chain(relative.parts()))
}

/// File inside an input directory, which may be local or an `s3://` url
pub fn input_file(dir: &str, file_name: &str) -> String {
    if dir.is_empty() {
        return file_name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), file_name)
}

/// Extension of the last path segment including the dot, e.g. `.csv`
pub fn file_extension(location: &str) -> Option<&str> {
    let file_name = location.rsplit('/').next()?;
    file_name.rfind('.').map(|dot| &file_name[dot..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioned_file_path() {
        let segments = [
            partition_segment("year", Some("2016")),
            partition_segment("month", Some("4")),
        ];
        let path = PathBuilder::new("analytics/dim_time")
            .with_partition_segments(&segments)
            .with_file_name("part-00000.parquet")
            .build();

        assert_eq!(
            path.to_string(),
            "analytics/dim_time/year=2016/month=4/part-00000.parquet"
        );
    }

    #[test]
    fn test_null_partition_uses_hive_default() {
        let path = PathBuilder::new("source/i94")
            .with_partition_segments(&[partition_segment("year", None)])
            .build();

        assert_eq!(path.to_string(), "source/i94/year=__HIVE_DEFAULT_PARTITION__");
    }

    #[test]
    fn test_input_locations() {
        assert_eq!(input_file("data/dict/", "countries.csv"), "data/dict/countries.csv");
        assert_eq!(
            input_file("s3://raw/dict", "i94ports.csv"),
            "s3://raw/dict/i94ports.csv"
        );
        assert_eq!(file_extension("data/airport-codes_csv.csv"), Some(".csv"));
        assert_eq!(file_extension("s3://raw/sas_data"), None);
        assert_eq!(file_extension("data/sas_data/"), None);
    }

    #[test]
    fn test_join_paths() {
        let staged = join_paths(
            &staging_root("run-1"),
            &Path::from("analytics/dim_cities/state_code=IL/part-00000.parquet"),
        );

        assert_eq!(
            staged.to_string(),
            "_staging/run-1/analytics/dim_cities/state_code=IL/part-00000.parquet"
        );
    }
}
