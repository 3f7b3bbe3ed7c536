//! Plugin registry
//!
//! Plugins are named transforms that wrap a solution callable to adapt it
//! for sampling and testing. The registry is an explicit object passed into
//! blueprint construction; looking up an unregistered name is a structured
//! error listing the available names, surfaced before any case generation
//! runs.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{ForgeError, Result};
use crate::sample::{PluginFn, PluginKwargs, SolutionFn, SolutionOutput, StagedArgs};

pub struct PluginRegistry {
    builtin: IndexMap<String, PluginFn>,
    custom: IndexMap<String, PluginFn>,
}

impl PluginRegistry {
    /// An empty registry with no built-ins
    pub fn empty() -> Self {
        Self {
            builtin: IndexMap::new(),
            custom: IndexMap::new(),
        }
    }

    /// A registry preloaded with the built-in transforms
    pub fn with_builtins() -> Self {
        let mut builtin: IndexMap<String, PluginFn> = IndexMap::new();
        builtin.insert("postprocess_sort".to_string(), Arc::new(postprocess_sort));
        builtin.insert("error_handler".to_string(), Arc::new(error_handler));
        builtin.insert("sql_executor".to_string(), Arc::new(sql_executor));
        Self {
            builtin,
            custom: IndexMap::new(),
        }
    }

    /// Register a custom plugin. Duplicate names (against built-ins or
    /// other custom plugins) are rejected.
    pub fn register(&mut self, name: &str, plugin: PluginFn) -> Result<()> {
        if self.builtin.contains_key(name) || self.custom.contains_key(name) {
            return Err(ForgeError::DuplicateRegistration(format!(
                "plugin `{}`",
                name
            )));
        }
        info!(plugin = %name, "Registered plugin");
        self.custom.insert(name.to_string(), plugin);
        Ok(())
    }

    /// Look up a plugin by name
    pub fn get(&self, name: &str) -> Result<&PluginFn> {
        self.custom
            .get(name)
            .or_else(|| self.builtin.get(name))
            .ok_or_else(|| ForgeError::UnknownPlugin {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtin.contains_key(name) || self.custom.contains_key(name)
    }

    /// All registered names, built-ins first, in registration order
    pub fn names(&self) -> Vec<String> {
        self.builtin
            .keys()
            .chain(self.custom.keys())
            .cloned()
            .collect()
    }

    /// Custom plugin names only (built-ins are implicit in every registry)
    pub fn custom_names(&self) -> Vec<String> {
        self.custom.keys().cloned().collect()
    }

    /// Union another registry's custom plugins into this one; a duplicate
    /// custom name is an error, the same policy as exercise roles.
    pub fn merge(&mut self, other: PluginRegistry) -> Result<()> {
        for (name, plugin) in other.custom {
            if self.custom.contains_key(&name) {
                return Err(ForgeError::DuplicateRegistration(format!(
                    "plugin `{}`",
                    name
                )));
            }
            self.custom.insert(name, plugin);
        }
        Ok(())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Canonical total order over case values: the JSON encoding
fn canonical_text(v: &Value) -> String {
    v.to_string()
}

/// Sort a JSON-array output into canonical order before persisting, so a
/// submission may return list results in any order and still match.
/// Supports an optional boolean kwarg `reverse`.
fn postprocess_sort(solution: SolutionFn, kwargs: &PluginKwargs) -> Result<SolutionFn> {
    let reverse = kwargs
        .get("reverse")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(Arc::new(move |args: &StagedArgs| {
        let values = solution(args)?.into_values();
        let sorted = values
            .into_iter()
            .map(|v| match v {
                Value::Array(mut items) => {
                    items.sort_by_key(|item| canonical_text(item));
                    if reverse {
                        items.reverse();
                    }
                    Value::Array(items)
                }
                other => {
                    debug!("postprocess_sort output is not a list; passing through");
                    other
                }
            })
            .collect();
        Ok(SolutionOutput::Many(sorted))
    }))
}

/// Capture whether the solution raised instead of aborting generation. The
/// wrapped solution returns the pair `(error_raised, result)`; on error the
/// result slot is null.
fn error_handler(solution: SolutionFn, _kwargs: &PluginKwargs) -> Result<SolutionFn> {
    Ok(Arc::new(move |args: &StagedArgs| {
        let outputs = match solution(args) {
            Ok(SolutionOutput::Single(v)) => vec![Value::Bool(false), v],
            Ok(SolutionOutput::Many(vs)) => vec![Value::Bool(false), Value::Array(vs)],
            Err(e) => {
                debug!(error = %e, "error_handler captured a solution error");
                vec![Value::Bool(true), Value::Null]
            }
        };
        Ok(SolutionOutput::Many(outputs))
    }))
}

/// Execute the solution's output as a SQL query against the staged
/// connection and return the result rows. Requires the exercise sampler to
/// stage a resource.
fn sql_executor(solution: SolutionFn, _kwargs: &PluginKwargs) -> Result<SolutionFn> {
    Ok(Arc::new(move |args: &StagedArgs| {
        let query = match solution(args)? {
            SolutionOutput::Single(Value::String(q)) => q,
            _ => {
                return Err(ForgeError::Solution(
                    "sql_executor expects the solution to return a query string".to_string(),
                ))
            }
        };
        let conn = args.db().ok_or_else(|| {
            ForgeError::Solution("sql_executor requires a staged connection".to_string())
        })?;
        let rows = crate::db::query_to_rows(conn, &query)?;
        Ok(SolutionOutput::Single(Value::Array(rows)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tables_to_conn;
    use serde_json::json;

    fn kwargs() -> PluginKwargs {
        PluginKwargs::new()
    }

    #[test]
    fn test_unknown_plugin_lists_names() {
        let registry = PluginRegistry::with_builtins();
        let err = match registry.get("nope") {
            Ok(_) => panic!("expected lookup of unknown plugin to fail"),
            Err(e) => e,
        };
        match err {
            ForgeError::UnknownPlugin { name, available } => {
                assert_eq!(name, "nope");
                assert!(available.contains(&"sql_executor".to_string()));
            }
            other => panic!("Expected UnknownPlugin, got: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_custom_name_rejected() {
        let mut registry = PluginRegistry::with_builtins();
        let noop: PluginFn = Arc::new(|solution, _: &PluginKwargs| Ok(solution));

        registry.register("shuffle", noop.clone()).unwrap();
        assert!(registry.register("shuffle", noop.clone()).is_err());
        // Shadowing a built-in is also rejected
        assert!(registry.register("error_handler", noop).is_err());
    }

    #[test]
    fn test_merge_unions_custom_plugins() {
        let mut a = PluginRegistry::with_builtins();
        let mut b = PluginRegistry::with_builtins();
        let noop: PluginFn = Arc::new(|solution, _: &PluginKwargs| Ok(solution));
        b.register("shuffle", noop).unwrap();

        a.merge(b).unwrap();
        assert!(a.contains("shuffle"));
    }

    #[test]
    fn test_postprocess_sort_orders_list_output() {
        let solution: SolutionFn =
            Arc::new(|_: &StagedArgs| Ok(SolutionOutput::Single(json!([3, 1, 2]))));
        let sorted = postprocess_sort(solution, &kwargs()).unwrap();

        let inputs = crate::sample::Case::new();
        let args = StagedArgs::new(&inputs, None);
        let out = sorted(&args).unwrap().into_values();
        assert_eq!(out, vec![json!([1, 2, 3])]);
    }

    #[test]
    fn test_error_handler_captures_failure() {
        let failing: SolutionFn =
            Arc::new(|_: &StagedArgs| Err(ForgeError::Solution("boom".to_string())));
        let wrapped = error_handler(failing, &kwargs()).unwrap();

        let inputs = crate::sample::Case::new();
        let args = StagedArgs::new(&inputs, None);
        let out = wrapped(&args).unwrap().into_values();
        assert_eq!(out, vec![json!(true), Value::Null]);
    }

    #[test]
    fn test_error_handler_passes_success_through() {
        let ok: SolutionFn = Arc::new(|_: &StagedArgs| Ok(SolutionOutput::Single(json!(7))));
        let wrapped = error_handler(ok, &kwargs()).unwrap();

        let inputs = crate::sample::Case::new();
        let args = StagedArgs::new(&inputs, None);
        let out = wrapped(&args).unwrap().into_values();
        assert_eq!(out, vec![json!(false), json!(7)]);
    }

    #[test]
    fn test_sql_executor_runs_query() {
        let query_solution: SolutionFn = Arc::new(|_: &StagedArgs| {
            Ok(SolutionOutput::Single(json!(
                "SELECT a FROM t ORDER BY a DESC"
            )))
        });
        let wrapped = sql_executor(query_solution, &kwargs()).unwrap();

        let mut inputs = crate::sample::Case::new();
        inputs.insert("conn".to_string(), json!({"t": [{"a": 1}, {"a": 5}]}));
        let conn = tables_to_conn(inputs.get("conn").unwrap()).unwrap();
        let args = StagedArgs::new(&inputs, Some(("conn", &conn)));

        let out = wrapped(&args).unwrap().into_values();
        assert_eq!(out, vec![json!([{"a": 5}, {"a": 1}])]);
    }
}
