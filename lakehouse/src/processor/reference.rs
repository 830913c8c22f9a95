use super::bind;
use crate::schema::reference_schema;
use crate::utils::paths::input_file;
use common::{Error, Result};
use datafusion::execution::context::SessionContext;
use datafusion::prelude::CsvReadOptions;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    Integer,
    Text,
}

/// A semicolon-delimited code dictionary, bound in the stage context under `name`
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSet {
    pub name: &'static str,
    pub file_name: &'static str,
    pub code_type: CodeType,
    pub labels: &'static [&'static str],
}

pub const COUNTRY_CODES: ReferenceSet = ReferenceSet {
    name: "country_codes",
    file_name: "countries.csv",
    code_type: CodeType::Integer,
    labels: &["country_name"],
};

pub const PORT_CODES: ReferenceSet = ReferenceSet {
    name: "port_codes",
    file_name: "i94ports.csv",
    code_type: CodeType::Text,
    labels: &["port_location", "state"],
};

pub const MODE_CODES: ReferenceSet = ReferenceSet {
    name: "mode_codes",
    file_name: "i94mode.csv",
    code_type: CodeType::Integer,
    labels: &["border_cross_method"],
};

pub const VISA_CODES: ReferenceSet = ReferenceSet {
    name: "visa_codes",
    file_name: "i94visa.csv",
    code_type: CodeType::Integer,
    labels: &["visa_type"],
};

pub const STATE_CODES: ReferenceSet = ReferenceSet {
    name: "state_codes",
    file_name: "us_states.csv",
    code_type: CodeType::Text,
    labels: &["state"],
};

pub const REFERENCE_SETS: [ReferenceSet; 5] =
    [COUNTRY_CODES, PORT_CODES, MODE_CODES, VISA_CODES, STATE_CODES];

impl ReferenceSet {
    pub fn columns(&self) -> Vec<&'static str> {
        std::iter::once("code")
            .chain(self.labels.iter().copied())
            .collect()
    }

    pub fn raw_name(&self) -> String {
        format!("raw_{}", self.name)
    }

    fn code_expr(&self) -> &'static str {
        match self.code_type {
            // "101" and "101.0" both resolve to 101
            CodeType::Integer => "TRY_CAST(TRY_CAST(trim(code) AS DOUBLE) AS BIGINT)",
            CodeType::Text => "NULLIF(trim(code), '')",
        }
    }
}

/// Reads every dictionary file from `dict_dir` and binds the conformed sets
pub async fn load_reference_sets(ctx: &SessionContext, dict_dir: &str) -> Result<()> {
    for set in REFERENCE_SETS {
        let location = input_file(dict_dir, set.file_name);
        let schema = reference_schema(&set.columns());
        let options = CsvReadOptions::new()
            .has_header(true)
            .delimiter(b';')
            .schema(&schema);

        ctx.deregister_table(set.raw_name().as_str())?;
        ctx.register_csv(set.raw_name().as_str(), &location, options)
            .await?;

        let rows = conform_reference_set(ctx, &set).await?;
        info!(reference_set = set.name, rows, file = %location, "Loaded reference set");
    }

    Ok(())
}

/// Conforms the raw dictionary bound as `raw_<name>` and binds it as `<name>`.
///
/// Rows without a usable code are discarded; a repeated code is an error since
/// it would multiply fact rows in the conformance joins.
pub async fn conform_reference_set(ctx: &SessionContext, set: &ReferenceSet) -> Result<usize> {
    let code = set.code_expr();
    let labels = set
        .labels
        .iter()
        .map(|label| format!("trim({label}) AS {label}"))
        .collect::<Vec<_>>()
        .join(", ");

    let df = ctx
        .sql(&format!(
            "SELECT {code} AS code, {labels} FROM {raw} WHERE {code} IS NOT NULL",
            raw = set.raw_name()
        ))
        .await?
        .cache()
        .await?;
    bind(ctx, set.name, df.clone())?;

    let duplicates = ctx
        .sql(&format!(
            "SELECT code FROM {} GROUP BY code HAVING COUNT(*) > 1",
            set.name
        ))
        .await?
        .count()
        .await?;
    if duplicates > 0 {
        return Err(Error::DuplicateReferenceCode {
            set: set.name.to_string(),
            duplicates,
        });
    }

    Ok(df.count().await?)
}
