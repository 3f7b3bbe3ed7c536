//! Deterministic test-case generation
//!
//! A `CaseGenerator` wraps a solution callable (possibly plugin-wrapped), a
//! sampler, and the ordered output names. Its RNG is seeded exactly once at
//! construction from the keyring seed, so for a fixed seed and a fixed
//! sequence of `make_case` calls the produced cases are bit-for-bit
//! reproducible across processes and across independently constructed
//! generators wrapping equivalent sampler/solution logic.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use std::path::Path;
use tracing::warn;

use crate::db::tables_to_conn;
use crate::error::{ForgeError, Result};
use crate::keyring::{generate_case_key, CaseKey};
use crate::sample::{Case, Sampler, SamplerOutput, SolutionFn, StagedArgs};
use crate::store::EncryptedCaseStore;

pub struct CaseGenerator {
    solution: SolutionFn,
    sampler: Sampler,
    output_names: Option<Vec<String>>,
    rng: StdRng,
    db_key: Option<String>,
    strict_resource_keys: bool,
}

impl CaseGenerator {
    /// Build a generator seeded once from the keyring's `rng_seed`
    pub fn new(
        solution: SolutionFn,
        sampler: Sampler,
        output_names: Option<Vec<String>>,
        seed: u64,
    ) -> Self {
        Self {
            solution,
            sampler,
            output_names,
            rng: StdRng::seed_from_u64(seed),
            db_key: None,
            strict_resource_keys: false,
        }
    }

    /// Fail instead of warning when a declared resource key is absent from
    /// the sampler output
    pub fn strict_resource_keys(mut self, strict: bool) -> Self {
        self.strict_resource_keys = strict;
        self
    }

    /// The resource-key argument discovered from the last sampler run
    pub fn db_key(&self) -> Option<&str> {
        self.db_key.as_deref()
    }

    /// Invoke the sampler once and return the raw argument mapping
    pub fn make_inputs(&mut self) -> Result<Case> {
        match self.sampler.sample(&mut self.rng) {
            SamplerOutput::Plain(inputs) => {
                self.db_key = None;
                Ok(inputs)
            }
            SamplerOutput::WithResource {
                inputs,
                resource_key,
            } => {
                if !inputs.contains_key(&resource_key) {
                    // Some samplers declare the connection argument via
                    // extra_param_names instead of the sampled mapping.
                    if self.strict_resource_keys {
                        return Err(ForgeError::MissingResourceKey(resource_key));
                    }
                    warn!(key = %resource_key, "Resource key is not in the sampler output");
                }
                self.db_key = Some(resource_key);
                Ok(inputs)
            }
        }
    }

    /// Run the solution on staged inputs and zip the result against the
    /// output names, synthesizing `output_{i}` names when unset
    pub fn make_outputs(&mut self, inputs: &Case) -> Result<Case> {
        let conn: Option<Connection> = match &self.db_key {
            Some(key) => inputs.get(key).map(tables_to_conn).transpose()?,
            None => None,
        };
        let db = match (&self.db_key, &conn) {
            (Some(key), Some(conn)) => Some((key.as_str(), conn)),
            _ => None,
        };

        let staged = StagedArgs::new(inputs, db);
        let produced = (self.solution)(&staged)?.into_values();

        let names = self.output_names.get_or_insert_with(|| {
            (0..produced.len())
                .map(|i| format!("output_{}", i))
                .collect()
        });

        Ok(names.iter().cloned().zip(produced).collect())
    }

    /// Compose one case: inputs plus outputs, outputs winning on any name
    /// collision. The materialized connection never appears in the case.
    pub fn make_case(&mut self) -> Result<Case> {
        let inputs = self.make_inputs()?;
        let outputs = self.make_outputs(&inputs)?;
        let mut case = inputs;
        for (name, value) in outputs {
            case.insert(name, value);
        }
        Ok(case)
    }

    /// Generate `n_cases` cases and write them encrypted to `path`. When no
    /// key is supplied a fresh one is generated and returned (bootstrap
    /// flows only; normal builds always pass a keyring key).
    pub fn write_cases(
        &mut self,
        path: &Path,
        n_cases: usize,
        key: Option<CaseKey>,
    ) -> Result<CaseKey> {
        let key = key.unwrap_or_else(generate_case_key);
        let mut cases = Vec::with_capacity(n_cases);
        for _ in 0..n_cases {
            cases.push(self.make_case()?);
        }
        EncryptedCaseStore::new(&key).write(path, &cases)?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SolutionOutput;
    use rand::Rng;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn linear_solution() -> SolutionFn {
        Arc::new(|args: &StagedArgs| {
            let x = args.require("x")?.as_i64().unwrap();
            Ok(SolutionOutput::Single(json!(2 * x + 3)))
        })
    }

    fn int_sampler() -> Sampler {
        Sampler::seeded(|rng| {
            let mut inputs = Case::new();
            inputs.insert("x".to_string(), json!(rng.gen_range(0..10)));
            SamplerOutput::Plain(inputs)
        })
    }

    #[test]
    fn test_deterministic_across_generators() {
        let mut a = CaseGenerator::new(linear_solution(), int_sampler(), None, 6040);
        let mut b = CaseGenerator::new(linear_solution(), int_sampler(), None, 6040);

        for _ in 0..100 {
            assert_eq!(a.make_case().unwrap(), b.make_case().unwrap());
        }
    }

    #[test]
    fn test_different_seed_diverges() {
        let mut a = CaseGenerator::new(linear_solution(), int_sampler(), None, 6040);
        let mut b = CaseGenerator::new(linear_solution(), int_sampler(), None, 6041);

        let a_cases: Vec<_> = (0..20).map(|_| a.make_case().unwrap()).collect();
        let b_cases: Vec<_> = (0..20).map(|_| b.make_case().unwrap()).collect();
        assert_ne!(a_cases, b_cases);
    }

    #[test]
    fn test_synthesized_output_names() {
        let mut gen = CaseGenerator::new(linear_solution(), int_sampler(), None, 1);
        let case = gen.make_case().unwrap();
        assert!(case.contains_key("output_0"));
        assert!(case.contains_key("x"));
    }

    #[test]
    fn test_outputs_shadow_same_named_inputs() {
        let solution: SolutionFn =
            Arc::new(|_: &StagedArgs| Ok(SolutionOutput::Single(json!("replaced"))));
        let sampler = Sampler::bare(|| {
            let mut inputs = Case::new();
            inputs.insert("x".to_string(), json!("original"));
            SamplerOutput::Plain(inputs)
        });

        let mut gen =
            CaseGenerator::new(solution, sampler, Some(vec!["x".to_string()]), 0);
        let case = gen.make_case().unwrap();
        assert_eq!(case.get("x"), Some(&json!("replaced")));
        assert_eq!(case.len(), 1);
    }

    #[test]
    fn test_resource_key_materialized_and_persisted_raw() {
        let solution: SolutionFn = Arc::new(|args: &StagedArgs| {
            let conn = args
                .db()
                .ok_or_else(|| ForgeError::Solution("no connection".to_string()))?;
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
                .map_err(ForgeError::Sqlite)?;
            Ok(SolutionOutput::Single(json!(n)))
        });
        let sampler = Sampler::bare(|| {
            let mut inputs = Case::new();
            inputs.insert("conn".to_string(), json!({"t": [{"a": 1}, {"a": 2}]}));
            SamplerOutput::WithResource {
                inputs,
                resource_key: "conn".to_string(),
            }
        });

        let mut gen = CaseGenerator::new(
            solution,
            sampler,
            Some(vec!["row_count".to_string()]),
            0,
        );
        let case = gen.make_case().unwrap();

        assert_eq!(case.get("row_count"), Some(&json!(2)));
        // The case holds the raw mapping, never a connection handle
        assert_eq!(case.get("conn"), Some(&json!({"t": [{"a": 1}, {"a": 2}]})));
        assert_eq!(gen.db_key(), Some("conn"));
    }

    #[test]
    fn test_missing_resource_key_warns_by_default() {
        let sampler = || {
            Sampler::bare(|| {
                let mut inputs = Case::new();
                inputs.insert("x".to_string(), json!(1));
                SamplerOutput::WithResource {
                    inputs,
                    resource_key: "conn".to_string(),
                }
            })
        };
        let solution: SolutionFn =
            Arc::new(|_: &StagedArgs| Ok(SolutionOutput::Single(Value::Null)));

        let mut lenient = CaseGenerator::new(solution.clone(), sampler(), None, 0);
        assert!(lenient.make_inputs().is_ok());

        let mut strict =
            CaseGenerator::new(solution, sampler(), None, 0).strict_resource_keys(true);
        assert!(matches!(
            strict.make_inputs(),
            Err(ForgeError::MissingResourceKey(_))
        ));
    }

    #[test]
    fn test_write_cases_generates_key_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tc_bootstrap");

        let mut gen = CaseGenerator::new(linear_solution(), int_sampler(), None, 6040);
        let key = gen.write_cases(&path, 5, None).unwrap();

        let cases = EncryptedCaseStore::new(&key).read(&path).unwrap();
        assert_eq!(cases.len(), 5);
    }

    #[test]
    fn test_identical_case_files_once_decrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("tc_a");
        let path_b = dir.path().join("tc_b");
        let key = generate_case_key();

        CaseGenerator::new(linear_solution(), int_sampler(), None, 6040)
            .write_cases(&path_a, 100, Some(key))
            .unwrap();
        CaseGenerator::new(linear_solution(), int_sampler(), None, 6040)
            .write_cases(&path_b, 100, Some(key))
            .unwrap();

        let store = EncryptedCaseStore::new(&key);
        assert_eq!(store.read(&path_a).unwrap(), store.read(&path_b).unwrap());
    }
}
