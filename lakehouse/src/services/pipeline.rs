use crate::processor::{LakehouseProcessor, StageReport};
use common::config::Settings;
use common::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

/// The three pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Preprocess,
    Model,
}

impl Stage {
    pub fn all() -> [Stage; 3] {
        [Stage::Source, Stage::Preprocess, Stage::Model]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Preprocess => "preprocess",
            Stage::Model => "model",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Stage::all()
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown stage: {}", s)))
    }
}

/// Runs stages one after the other; the first failure stops the run and
/// leaves every table committed so far in place.
pub struct PipelineService {
    processor: LakehouseProcessor,
}

impl PipelineService {
    pub fn new(settings: Settings) -> Result<Self> {
        Ok(Self {
            processor: LakehouseProcessor::new(settings)?,
        })
    }

    pub async fn run_stage(&self, stage: Stage) -> Result<StageReport> {
        info!(stage = %stage, "Starting stage");
        let result = match stage {
            Stage::Source => self.processor.run_source().await,
            Stage::Preprocess => self.processor.run_preprocess().await,
            Stage::Model => self.processor.run_model().await,
        };

        if let Err(e) = &result {
            error!(stage = %stage, error = %e, "Stage failed");
        }
        result
    }

    pub async fn run(&self, stages: &[Stage]) -> Result<Vec<StageReport>> {
        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            reports.push(self.run_stage(*stage).await?);
        }
        Ok(reports)
    }
}
