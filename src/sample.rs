//! Sampler and solution callable model
//!
//! Samplers produce randomized input arguments for one test case. A sampler
//! either takes no arguments or takes the build's deterministic RNG; both
//! shapes are first-class variants rather than runtime-sniffed signatures.
//! Likewise the sampler's return shape is a tagged variant: a plain argument
//! mapping, or a mapping plus the name of the argument that must be
//! materialized into a live connection before the solution runs.

use rand::rngs::StdRng;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ForgeError, Result};

/// One sampled trial: every input and output name mapped to a concrete value
pub type Case = serde_json::Map<String, Value>;

/// Keyword arguments forwarded to a plugin transform
pub type PluginKwargs = serde_json::Map<String, Value>;

/// What a sampler returns for one trial
pub enum SamplerOutput {
    /// A plain mapping of argument name to value
    Plain(Case),
    /// A mapping plus the name of the entry to materialize as a connection
    WithResource {
        inputs: Case,
        resource_key: String,
    },
}

/// A sampler callable, by declared arity
pub enum Sampler {
    /// Zero-argument sampler, called bare
    Bare(Box<dyn Fn() -> SamplerOutput + Send + Sync>),
    /// One-argument sampler taking the seeded deterministic RNG
    Seeded(Box<dyn Fn(&mut StdRng) -> SamplerOutput + Send + Sync>),
}

impl Sampler {
    pub fn bare(f: impl Fn() -> SamplerOutput + Send + Sync + 'static) -> Self {
        Self::Bare(Box::new(f))
    }

    pub fn seeded(f: impl Fn(&mut StdRng) -> SamplerOutput + Send + Sync + 'static) -> Self {
        Self::Seeded(Box::new(f))
    }

    /// Checked constructor for dynamically described samplers. Arity 0 calls
    /// the function without an RNG, arity 1 passes the seeded RNG; anything
    /// else is rejected.
    pub fn with_arity(
        arity: usize,
        f: Box<dyn Fn(Option<&mut StdRng>) -> SamplerOutput + Send + Sync>,
    ) -> Result<Self> {
        match arity {
            0 => Ok(Self::Bare(Box::new(move || f(None)))),
            1 => Ok(Self::Seeded(Box::new(move |rng| f(Some(rng))))),
            n => Err(ForgeError::InvalidSamplerSignature(n)),
        }
    }

    pub(crate) fn sample(&self, rng: &mut StdRng) -> SamplerOutput {
        match self {
            Self::Bare(f) => f(),
            Self::Seeded(f) => f(rng),
        }
    }
}

/// Inputs staged for one solution call. The resource-key argument, if any,
/// is exposed as a live connection instead of its raw sampled value.
pub struct StagedArgs<'a> {
    values: &'a Case,
    db: Option<(&'a str, &'a Connection)>,
}

impl<'a> StagedArgs<'a> {
    pub fn new(values: &'a Case, db: Option<(&'a str, &'a Connection)>) -> Self {
        Self { values, db }
    }

    /// Look up an argument by name. The resource-key argument is not
    /// reachable here; use [`StagedArgs::db`] for it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.db {
            Some((key, _)) if key == name => None,
            _ => self.values.get(name),
        }
    }

    /// Look up an argument by name, failing the solution call if absent
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| ForgeError::Solution(format!("missing argument `{}`", name)))
    }

    /// The materialized connection, if this trial staged one
    pub fn db(&self) -> Option<&Connection> {
        self.db.map(|(_, conn)| conn)
    }

    /// Name of the argument materialized as a connection, if any
    pub fn resource_key(&self) -> Option<&str> {
        self.db.map(|(key, _)| key)
    }
}

/// What a solution returns: a single value, or an ordered tuple of values.
/// A single value is coerced to a 1-tuple when zipped against output names.
pub enum SolutionOutput {
    Single(Value),
    Many(Vec<Value>),
}

impl SolutionOutput {
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::Single(v) => vec![v],
            Self::Many(vs) => vs,
        }
    }
}

impl From<Value> for SolutionOutput {
    fn from(v: Value) -> Self {
        Self::Single(v)
    }
}

/// A solution callable: computes the reference outputs for one staged trial
pub type SolutionFn = Arc<dyn Fn(&StagedArgs) -> Result<SolutionOutput> + Send + Sync>;

/// A plugin transform: wraps a solution to adapt it for sampling/testing
pub type PluginFn = Arc<dyn Fn(SolutionFn, &PluginKwargs) -> Result<SolutionFn> + Send + Sync>;
