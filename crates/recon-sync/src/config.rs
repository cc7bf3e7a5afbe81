use std::path::Path;

use recon_core::ObjectType;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SyncError;

pub const DEFAULT_JOB_NUMBER_PATTERN: &str = r"\b\d{4}-\d{3,}\b";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub fuzzy_accept_threshold: f64,
    pub fuzzy_review_threshold: f64,
    pub job_number_pattern: String,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            fuzzy_accept_threshold: 0.85,
            fuzzy_review_threshold: 0.70,
            job_number_pattern: DEFAULT_JOB_NUMBER_PATTERN.to_string(),
        }
    }
}

impl MatchSettings {
    pub fn job_number_regex(&self) -> Result<Regex, SyncError> {
        Regex::new(&self.job_number_pattern).map_err(|err| {
            SyncError::Config(format!(
                "job_number_pattern {:?} does not compile: {err}",
                self.job_number_pattern
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub batch_size: usize,
    pub matching: MatchSettings,
    /// Types reconciled when the caller passes no allow-list.
    pub objects: Vec<ObjectType>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            batch_size: 200,
            matching: MatchSettings::default(),
            objects: ObjectType::ALL.to_vec(),
        }
    }
}

impl ReconcileSettings {
    pub fn from_yaml(text: &str) -> Result<Self, SyncError> {
        let settings: Self = serde_yaml::from_str(text)
            .map_err(|err| SyncError::Config(format!("parsing settings: {err}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("reading settings {}: {err}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be greater than 0".into()));
        }
        let m = &self.matching;
        for (name, value) in [
            ("fuzzy_accept_threshold", m.fuzzy_accept_threshold),
            ("fuzzy_review_threshold", m.fuzzy_review_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SyncError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        m.job_number_regex()?;
        if self.objects.is_empty() {
            return Err(SyncError::Config("objects must name at least one type".into()));
        }
        Ok(())
    }
}
