//! Exercise component registry
//!
//! A blueprint is a container to which assignment components are registered
//! under an exercise name: solution, helper, and demo records, a test spec
//! with its case generator, and preload objects. Blueprints authored
//! independently compose into one build via [`Blueprint::merge`], which
//! rejects duplicate (exercise, role) registrations rather than silently
//! overwriting.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

use crate::casegen::CaseGenerator;
use crate::error::{ForgeError, Result};
use crate::keyring::Keyring;
use crate::plugins::PluginRegistry;
use crate::sample::{PluginKwargs, Sampler, SolutionFn};

/// Metadata describing a registered callable. Immutable once created; the
/// source text is opaque to the build and supplied by the caller.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub name: String,
    pub source: String,
    pub annotations: IndexMap<String, String>,
    pub docstring: Option<String>,
}

impl ComponentRecord {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            annotations: IndexMap::new(),
            docstring: None,
        }
    }

    pub fn with_annotations(mut self, annotations: IndexMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }
}

/// Component roles that admit at most one registration per exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Solution,
    Helper,
    Demo,
    Test,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Solution => "solution",
            Role::Helper => "helper",
            Role::Demo => "demo",
            Role::Test => "test",
        };
        f.write_str(s)
    }
}

/// Everything needed to register a graded test besides the sampler itself
pub struct TestRegistration {
    pub solution: SolutionFn,
    pub solution_name: String,
    /// Solution argument names, in call order
    pub arg_names: Vec<String>,
    /// Argument name -> dtype, from the solution's annotations
    pub annotations: IndexMap<String, String>,
    pub n_cases: usize,
    /// Ordered output names; must be non-empty
    pub output_names: Vec<String>,
    pub plugin: Option<String>,
    pub plugin_kwargs: Option<PluginKwargs>,
    /// Parameters required by a plugin wrapper but not the solution itself
    pub extra_param_names: Vec<String>,
    /// Overrides the blueprint-level default when set
    pub include_hidden: Option<bool>,
}

impl TestRegistration {
    pub fn new(
        solution: SolutionFn,
        solution_name: impl Into<String>,
        n_cases: usize,
        output_names: Vec<String>,
    ) -> Self {
        Self {
            solution,
            solution_name: solution_name.into(),
            arg_names: Vec::new(),
            annotations: IndexMap::new(),
            n_cases,
            output_names,
            plugin: None,
            plugin_kwargs: None,
            extra_param_names: Vec::new(),
            include_hidden: None,
        }
    }

    pub fn with_args(mut self, arg_names: Vec<String>) -> Self {
        self.arg_names = arg_names;
        self
    }

    pub fn with_annotations(mut self, annotations: IndexMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_plugin_kwargs(mut self, kwargs: PluginKwargs) -> Self {
        self.plugin_kwargs = Some(kwargs);
        self
    }

    pub fn with_extra_params(mut self, names: Vec<String>) -> Self {
        self.extra_param_names = names;
        self
    }

    pub fn with_include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = Some(include);
        self
    }
}

/// A registered test: the resolved spec plus its seeded generator
pub struct TestSpec {
    pub n_cases: usize,
    pub output_names: Vec<String>,
    /// Display form of the solution, plugin-wrapped when a plugin applies
    pub solution_name: String,
    pub arg_names: Vec<String>,
    pub annotations: IndexMap<String, String>,
    pub plugin: Option<String>,
    pub plugin_kwargs: Option<PluginKwargs>,
    pub db_key: Option<String>,
    pub include_hidden: bool,
    pub generator: CaseGenerator,
}

/// The registered component set for one exercise
#[derive(Default)]
pub struct Exercise {
    pub solution: Option<ComponentRecord>,
    pub helper: Option<ComponentRecord>,
    pub demo: Option<ComponentRecord>,
    pub test: Option<TestSpec>,
    pub preload_objects: IndexMap<String, Value>,
    /// No graded test; the test cell renders empty
    pub free: bool,
}

/// Drop every line between `### BEGIN IGNORE` and `### END IGNORE` markers
/// (inclusive) from a source text.
pub fn strip_ignored_lines(source: &str) -> String {
    let mut kept = Vec::new();
    let mut ignoring = false;
    for line in source.lines() {
        if line.contains("### BEGIN IGNORE") {
            ignoring = true;
        }
        if !ignoring {
            kept.push(line);
        } else {
            debug!(line = %line, "Ignoring line");
        }
        if line.contains("### END IGNORE") {
            ignoring = false;
        }
    }
    kept.join("\n")
}

/// Wrap a function body in solution markers unless the source already
/// carries them. The first line is treated as the definition.
pub fn wrap_solution_markers(source: &str) -> String {
    if source.contains("### BEGIN SOLUTION") {
        return source.to_string();
    }
    let mut lines = source.lines();
    let Some(definition) = lines.next() else {
        return source.to_string();
    };
    let body: Vec<&str> = lines.collect();
    format!(
        "{}\n    ### BEGIN SOLUTION\n{}\n    ### END SOLUTION",
        definition,
        body.join("\n")
    )
}

pub struct Blueprint {
    exercises: IndexMap<String, Exercise>,
    plugins: PluginRegistry,
    /// Named utility records made visible under a stable namespace
    utils: IndexMap<String, ComponentRecord>,
    keyring: Keyring,
    include_hidden: bool,
}

impl Blueprint {
    pub fn new(keyring: Keyring, plugins: PluginRegistry) -> Self {
        Self {
            exercises: IndexMap::new(),
            plugins,
            utils: IndexMap::new(),
            keyring,
            include_hidden: true,
        }
    }

    /// Convenience constructor: load or create the keyring at `keys_path`
    /// and start from the built-in plugins.
    pub fn open(keys_path: &std::path::Path) -> Result<Self> {
        let keyring = Keyring::load_or_create(keys_path)?;
        Ok(Self::new(keyring, PluginRegistry::with_builtins()))
    }

    /// Whether hidden tests are rendered by default for this blueprint
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginRegistry {
        &mut self.plugins
    }

    pub fn utils(&self) -> &IndexMap<String, ComponentRecord> {
        &self.utils
    }

    pub fn exercises(&self) -> &IndexMap<String, Exercise> {
        &self.exercises
    }

    pub(crate) fn exercises_mut(&mut self) -> &mut IndexMap<String, Exercise> {
        &mut self.exercises
    }

    fn entry(&mut self, ex_name: &str) -> &mut Exercise {
        self.exercises.entry(ex_name.to_string()).or_default()
    }

    fn check_role_free(&self, ex_name: &str, role: Role) -> Result<()> {
        let taken = match self.exercises.get(ex_name) {
            None => false,
            Some(ex) => match role {
                Role::Solution => ex.solution.is_some(),
                Role::Helper => ex.helper.is_some(),
                Role::Demo => ex.demo.is_some(),
                Role::Test => ex.test.is_some(),
            },
        };
        if taken {
            return Err(ForgeError::DuplicateRegistration(format!(
                "{}.{}",
                ex_name, role
            )));
        }
        Ok(())
    }

    /// Register a solution record. `wrap_markers` wraps the body in
    /// solution markers unless the exercise is free.
    pub fn register_solution(
        &mut self,
        ex_name: &str,
        mut record: ComponentRecord,
        free: bool,
        wrap_markers: bool,
    ) -> Result<()> {
        self.check_role_free(ex_name, Role::Solution)?;
        info!(exercise = %ex_name, "Registering solution");
        record.source = strip_ignored_lines(&record.source);
        if wrap_markers && !free {
            record.source = wrap_solution_markers(&record.source);
        }
        let ex = self.entry(ex_name);
        ex.free = free;
        ex.solution = Some(record);
        Ok(())
    }

    pub fn register_helper(&mut self, ex_name: &str, mut record: ComponentRecord) -> Result<()> {
        self.check_role_free(ex_name, Role::Helper)?;
        info!(exercise = %ex_name, "Registering helper");
        record.source = strip_ignored_lines(&record.source);
        self.entry(ex_name).helper = Some(record);
        Ok(())
    }

    pub fn register_demo(&mut self, ex_name: &str, mut record: ComponentRecord) -> Result<()> {
        self.check_role_free(ex_name, Role::Demo)?;
        info!(exercise = %ex_name, "Registering demo");
        record.source = strip_ignored_lines(&record.source);
        self.entry(ex_name).demo = Some(record);
        Ok(())
    }

    /// Register a query-authoring solution: the rendered source is a
    /// scaffold the student fills in, with the reference query between
    /// solution markers.
    pub fn register_sql_solution(
        &mut self,
        ex_name: &str,
        query: &str,
        doc: &str,
    ) -> Result<()> {
        self.check_role_free(ex_name, Role::Solution)?;
        let name = format!("{}_query", ex_name);
        let source = format!(
            "{name} = '''YOUR QUERY HERE'''\n### BEGIN SOLUTION\n{name} = '''{query}'''\n### END SOLUTION",
            name = name,
            query = query
        );
        info!(exercise = %ex_name, "Registering SQL solution");
        self.entry(ex_name).solution =
            Some(ComponentRecord::new(name, source).with_docstring(doc));
        Ok(())
    }

    /// Register an object to preload before an exercise. Multiple objects
    /// per exercise are allowed; a repeated name replaces the prior value.
    pub fn register_preload_object(
        &mut self,
        ex_name: &str,
        obj_name: &str,
        value: Value,
    ) {
        info!(exercise = %ex_name, object = %obj_name, "Registering preload object");
        self.entry(ex_name)
            .preload_objects
            .insert(obj_name.to_string(), value);
    }

    /// Register a named utility record. Duplicate names are rejected.
    pub fn register_util(&mut self, record: ComponentRecord) -> Result<()> {
        if self.utils.contains_key(&record.name) {
            return Err(ForgeError::DuplicateRegistration(format!(
                "util `{}`",
                record.name
            )));
        }
        info!(util = %record.name, "Registering util");
        self.utils.insert(record.name.clone(), record);
        Ok(())
    }

    /// Register a graded test: resolve the plugin (fatal if unknown), wrap
    /// the solution, construct the seeded generator, and probe the sampler
    /// once to discover the resource key.
    pub fn register_test(
        &mut self,
        ex_name: &str,
        registration: TestRegistration,
        sampler: Sampler,
    ) -> Result<()> {
        self.check_role_free(ex_name, Role::Test)?;
        if registration.output_names.is_empty() {
            return Err(ForgeError::InvalidRegistration(format!(
                "test for `{}` must name at least one output",
                ex_name
            )));
        }
        info!(exercise = %ex_name, "Registering test");

        let empty_kwargs = PluginKwargs::new();
        let kwargs = registration.plugin_kwargs.as_ref().unwrap_or(&empty_kwargs);
        let (solution, solution_name) = match &registration.plugin {
            Some(plugin_name) => {
                let plugin = self.plugins.get(plugin_name)?;
                let wrapped = plugin(registration.solution.clone(), kwargs)?;
                let display = if registration.plugin_kwargs.is_some() {
                    format!(
                        "plugins.{}({}, **plugin_kwargs)",
                        plugin_name, registration.solution_name
                    )
                } else {
                    format!("plugins.{}({})", plugin_name, registration.solution_name)
                };
                (wrapped, display)
            }
            None => (
                registration.solution.clone(),
                registration.solution_name.clone(),
            ),
        };

        let mut generator = CaseGenerator::new(
            solution,
            sampler,
            Some(registration.output_names.clone()),
            self.keyring.rng_seed,
        );
        // One probe run to discover the resource key for config defaults
        generator.make_inputs()?;
        let db_key = generator.db_key().map(str::to_string);

        let mut arg_names = registration.arg_names;
        arg_names.extend(registration.extra_param_names);

        let include_hidden = registration
            .include_hidden
            .unwrap_or(self.include_hidden);

        self.entry(ex_name).test = Some(TestSpec {
            n_cases: registration.n_cases,
            output_names: registration.output_names,
            solution_name,
            arg_names,
            annotations: registration.annotations,
            plugin: registration.plugin,
            plugin_kwargs: registration.plugin_kwargs,
            db_key,
            include_hidden,
            generator,
        });
        Ok(())
    }

    /// Merge another blueprint into this one: new exercises copy wholesale,
    /// existing exercises merge role-by-role, rejecting any (exercise,
    /// role) overlap. Preload objects union, last write wins per name.
    pub fn merge(&mut self, other: Blueprint) -> Result<()> {
        for (ex_name, other_ex) in other.exercises {
            match self.exercises.entry(ex_name) {
                indexmap::map::Entry::Vacant(slot) => {
                    debug!(exercise = %slot.key(), "Merging whole exercise");
                    slot.insert(other_ex);
                }
                indexmap::map::Entry::Occupied(mut slot) => {
                    let ex_name = slot.key().clone();
                    debug!(exercise = %ex_name, "Merging exercise role by role");
                    let ex = slot.get_mut();
                    merge_role(&ex_name, Role::Solution, &mut ex.solution, other_ex.solution)?;
                    merge_role(&ex_name, Role::Helper, &mut ex.helper, other_ex.helper)?;
                    merge_role(&ex_name, Role::Demo, &mut ex.demo, other_ex.demo)?;
                    if other_ex.test.is_some() {
                        if ex.test.is_some() {
                            return Err(ForgeError::DuplicateRegistration(format!(
                                "{}.{}",
                                ex_name,
                                Role::Test
                            )));
                        }
                        ex.test = other_ex.test;
                    }
                    ex.preload_objects.extend(other_ex.preload_objects);
                    ex.free |= other_ex.free;
                }
            }
        }
        for (_, record) in other.utils {
            self.register_util(record)?;
        }
        self.plugins.merge(other.plugins)?;
        Ok(())
    }
}

fn merge_role(
    ex_name: &str,
    role: Role,
    existing: &mut Option<ComponentRecord>,
    incoming: Option<ComponentRecord>,
) -> Result<()> {
    if let Some(record) = incoming {
        if existing.is_some() {
            return Err(ForgeError::DuplicateRegistration(format!(
                "{}.{}",
                ex_name, role
            )));
        }
        *existing = Some(record);
    }
    Ok(())
}
