//! Assignment Forge
//!
//! Turns a declarative registry of exercise components (solutions, helpers,
//! demos, samplers, preload objects) into two reproducible artifacts: an
//! updated notebook whose generated cells are replaced in place while user
//! edits are preserved, and a set of encrypted, deterministically generated
//! test-case files used to grade submissions.
//!
//! ## Module Structure
//!
//! - `keyring`: encryption keys and sampling seed, persisted once per target
//! - `sample`: sampler and solution callable model
//! - `casegen`: deterministic test-case generation
//! - `store`: encrypted case-file persistence
//! - `db`: in-memory SQLite materialization for sampler resources
//! - `plugins`: named solution transforms (registry + built-ins)
//! - `blueprint`: exercise component registry and merge semantics
//! - `config`: grading config document and reconciliation
//! - `notebook`: target document model and tag-addressed merge
//! - `render`: generated cell rendering
//! - `builder`: the build pipeline
//! - `manager`: case-set verification helpers
//!
//! The build is a single-threaded batch pipeline; its correctness contract
//! is determinism and idempotence across repeated invocations, with
//! registration order as the only user-observable sequencing guarantee.

/// Error taxonomy
pub mod error;

/// Encryption keys and sampling seed
pub mod keyring;

/// Sampler and solution callable model
pub mod sample;

/// Deterministic test-case generation
pub mod casegen;

/// Encrypted case-file persistence
pub mod store;

/// Sampler resource materialization
pub mod db;

/// Plugin registry and built-in transforms
pub mod plugins;

/// Exercise component registry
pub mod blueprint;

/// Grading config document and reconciliation
pub mod config;

/// Target document model and merge
pub mod notebook;

/// Generated cell rendering
pub mod render;

/// Build pipeline
pub mod builder;

/// Case-set verification helpers
pub mod manager;

pub use blueprint::{Blueprint, ComponentRecord, Exercise, Role, TestRegistration, TestSpec};
pub use builder::{AssignmentBuilder, BuildPaths};
pub use casegen::CaseGenerator;
pub use config::{
    reconcile, AssignmentConfig, ExerciseConfig, GlobalImport, InputSpec, OutputSpec, TestConfig,
};
pub use error::{ForgeError, Result};
pub use keyring::{generate_case_key, CaseKey, Keyring, KEY_SIZE};
pub use manager::CaseManager;
pub use notebook::{merge_cells, Cell, CellKind, CellMetadata, Notebook};
pub use plugins::PluginRegistry;
pub use render::{build_core_cells, RenderOptions};
pub use sample::{
    Case, PluginFn, PluginKwargs, Sampler, SamplerOutput, SolutionFn, SolutionOutput, StagedArgs,
};
pub use store::{EncryptedCaseStore, NONCE_SIZE};
