//! Assignment configuration and reconciliation
//!
//! The config document is the persisted, hand-editable grading schema. Each
//! build recomputes per-exercise defaults from the registry and overlays
//! whatever the prior document held: exercise-level values carry forward
//! wholesale, input/output entries carry forward per name, and exercises no
//! longer registered are dropped. Running a build twice with no registry
//! changes persists a byte-identical document the second time.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::blueprint::{Blueprint, TestSpec};
use crate::error::{ForgeError, Result};

/// Default float comparison tolerance for outputs
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 0.000001;

/// Default number of visible grading trials
pub const DEFAULT_VISIBLE_TRIALS: u32 = 100;

/// Default number of hidden grading trials
pub const DEFAULT_HIDDEN_TRIALS: u32 = 1;

fn default_points() -> f64 {
    1.0
}

fn default_visible_trials() -> u32 {
    DEFAULT_VISIBLE_TRIALS
}

fn default_hidden_trials() -> u32 {
    DEFAULT_HIDDEN_TRIALS
}

/// One module imported at the top of the generated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImport {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Grading schema for one input argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default)]
    pub dtype: String,
    pub check_modified: bool,
}

/// Grading schema for one output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub index: usize,
    #[serde(default)]
    pub dtype: String,
    pub check_dtype: bool,
    pub check_col_dtypes: bool,
    pub check_col_order: bool,
    pub check_row_order: bool,
    pub float_tolerance: f64,
}

/// The graded-test portion of one exercise's config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    pub case_file: String,
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputSpec>,
}

/// The persisted, reconciled per-exercise grading schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseConfig {
    pub num: usize,
    #[serde(default = "default_points")]
    pub points: f64,
    #[serde(default = "default_visible_trials")]
    pub n_visible_trials: u32,
    #[serde(default = "default_hidden_trials")]
    pub n_hidden_trials: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<TestConfig>,
}

/// Top-level assignment document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    pub assignment_name: String,
    pub subtitle: String,
    pub version: String,
    pub topics: String,
    pub points_cap: String,
    pub total_points: String,
    pub global_imports: Vec<GlobalImport>,
    pub exercises: IndexMap<String, ExerciseConfig>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            assignment_name: "assignment name".to_string(),
            subtitle: "assignment subtitle".to_string(),
            version: "0.0.1".to_string(),
            topics: "this, that, and the other".to_string(),
            points_cap: "points cap".to_string(),
            total_points: "total points".to_string(),
            global_imports: vec![
                GlobalImport {
                    module: "re".to_string(),
                    alias: None,
                },
                GlobalImport {
                    module: "pandas".to_string(),
                    alias: Some("pd".to_string()),
                },
            ],
            exercises: IndexMap::new(),
        }
    }
}

impl AssignmentConfig {
    /// Load the document at `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found; starting from defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&raw)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Persist the document atomically, preserving insertion order
    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered = serde_yaml::to_string(self)?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tmp.write_all(rendered.as_bytes())?;
        tmp.persist(path).map_err(|e| ForgeError::Io(e.error))?;
        info!(path = %path.display(), "Config persisted");
        Ok(())
    }
}

/// Compute the fresh default test config for one registered test
fn fresh_test_config(ex_name: &str, test: &TestSpec) -> TestConfig {
    let db_key = test.db_key.as_deref().unwrap_or("");
    let inputs = test
        .arg_names
        .iter()
        .map(|arg| {
            let is_db = !db_key.is_empty() && arg == db_key;
            let dtype = test
                .annotations
                .get(arg)
                .cloned()
                .unwrap_or_else(|| if is_db { "db".to_string() } else { String::new() });
            (
                arg.clone(),
                InputSpec {
                    dtype,
                    check_modified: !is_db,
                },
            )
        })
        .collect();
    let outputs = test
        .output_names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            (
                name.clone(),
                OutputSpec {
                    index,
                    dtype: String::new(),
                    check_dtype: true,
                    check_col_dtypes: true,
                    check_col_order: true,
                    check_row_order: false,
                    float_tolerance: DEFAULT_FLOAT_TOLERANCE,
                },
            )
        })
        .collect();
    TestConfig {
        case_file: format!("tc_{}", ex_name),
        inputs,
        outputs,
    }
}

/// Merge freshly computed defaults with the prior document.
///
/// Prior exercise-level values win wholesale; input/output entries keyed by
/// name take the prior value when the name already existed, else the fresh
/// default. Exercises absent from the registry are dropped. The case file
/// name is always forced to the registry's.
pub fn reconcile(prior: AssignmentConfig, blueprint: &Blueprint) -> AssignmentConfig {
    let mut merged = AssignmentConfig {
        exercises: IndexMap::new(),
        ..prior.clone()
    };

    for (num, (ex_name, ex)) in blueprint.exercises().iter().enumerate() {
        let fresh_config = ex.test.as_ref().map(|t| fresh_test_config(ex_name, t));
        let fresh = ExerciseConfig {
            num,
            points: default_points(),
            n_visible_trials: DEFAULT_VISIBLE_TRIALS,
            n_hidden_trials: DEFAULT_HIDDEN_TRIALS,
            config: fresh_config.clone(),
        };

        let entry = match prior.exercises.get(ex_name) {
            None => {
                debug!(exercise = %ex_name, "New exercise; using fresh defaults");
                fresh
            }
            Some(prev) => {
                let mut carried = prev.clone();
                carried.config = match (fresh_config, prev.config.clone()) {
                    (Some(fresh_cfg), Some(prev_cfg)) => Some(TestConfig {
                        case_file: format!("tc_{}", ex_name),
                        inputs: fresh_cfg
                            .inputs
                            .into_iter()
                            .map(|(name, spec)| {
                                let kept = prev_cfg.inputs.get(&name).cloned().unwrap_or(spec);
                                (name, kept)
                            })
                            .collect(),
                        outputs: fresh_cfg
                            .outputs
                            .into_iter()
                            .map(|(name, spec)| {
                                let kept = prev_cfg.outputs.get(&name).cloned().unwrap_or(spec);
                                (name, kept)
                            })
                            .collect(),
                    }),
                    (Some(fresh_cfg), None) => Some(fresh_cfg),
                    // Registry no longer declares a test; keep the prior
                    // config verbatim rather than inventing one
                    (None, prev_cfg) => prev_cfg,
                };
                carried
            }
        };
        merged.exercises.insert(ex_name.clone(), entry);
    }

    let dropped: Vec<&String> = prior
        .exercises
        .keys()
        .filter(|name| !blueprint.exercises().contains_key(*name))
        .collect();
    if !dropped.is_empty() {
        info!(?dropped, "Dropping config entries for unregistered exercises");
    }

    merged
}
