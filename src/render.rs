//! Core cell rendering
//!
//! Renders the generated cells for a build from registry and config
//! metadata. Rendering is pure string formatting; the interesting part of
//! the build is where these cells land, which is the merger's job. Cells
//! are keyed by their full tag, in registration order, because that order
//! decides where newly introduced cells are appended.

use indexmap::IndexMap;
use serde_json::json;

use crate::blueprint::{Blueprint, Exercise};
use crate::config::{AssignmentConfig, ExerciseConfig};
use crate::keyring::Keyring;
use crate::notebook::Cell;

pub struct RenderOptions {
    /// Render the `main.header` cell
    pub header: bool,
    /// Path of the config document, referenced by generated test cells
    pub config_path: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            header: true,
            config_path: "resource/asnlib/publicdata/assignment_config.yaml".to_string(),
        }
    }
}

fn header_cell(config: &AssignmentConfig) -> Cell {
    let source = format!(
        "# {name}\n\n## {subtitle}\n\n_Version {version}_\n\n**Topics covered**: {topics}\n\n\
         This assignment is worth a total of **{total} points**, capped at {cap}.",
        name = config.assignment_name,
        subtitle = config.subtitle,
        version = config.version,
        topics = config.topics,
        total = config.total_points,
        cap = config.points_cap,
    );
    Cell::markdown("main.header", source)
}

fn global_imports_cell(config: &AssignmentConfig, blueprint: &Blueprint) -> Cell {
    let mut lines: Vec<String> = config
        .global_imports
        .iter()
        .map(|import| match &import.alias {
            Some(alias) => format!("import {} as {}", import.module, alias),
            None => format!("import {}", import.module),
        })
        .collect();

    let mut loadables: Vec<String> = blueprint.utils().keys().cloned().collect();
    loadables.extend(blueprint.plugins().custom_names());
    if !loadables.is_empty() {
        lines.push(String::new());
        for name in loadables {
            lines.push(format!(
                "{name} = load_object_from_publicdata('{name}')",
                name = name
            ));
        }
    }
    Cell::code("main.global_imports", lines.join("\n"))
}

fn preload_cell(ex_name: &str, ex: &Exercise) -> Cell {
    let lines: Vec<String> = ex
        .preload_objects
        .keys()
        .map(|obj| format!("{obj} = load_object_from_publicdata('{obj}')", obj = obj))
        .collect();
    Cell::code(format!("{}.preload_objects", ex_name), lines.join("\n"))
}

fn prompt_cell(ex_name: &str, ex: &Exercise, num: usize, cfg: &ExerciseConfig) -> Cell {
    let mut source = format!(
        "### Exercise {num}: `{ex_name}` ({points} point(s))",
        num = num,
        ex_name = ex_name,
        points = cfg.points,
    );
    if let Some(doc) = ex.solution.as_ref().and_then(|s| s.docstring.as_deref()) {
        source.push_str("\n\n");
        source.push_str(doc);
    }
    if let Some(helper) = &ex.helper {
        source.push_str(&format!(
            "\n\nThe helper function `{}` is provided for you:",
            helper.name
        ));
        if let Some(doc) = helper.docstring.as_deref() {
            source.push_str("\n\n");
            source.push_str(doc);
        }
    }
    Cell::markdown(format!("{}.prompt", ex_name), source)
}

fn solution_cell(ex_name: &str, ex: &Exercise) -> Option<Cell> {
    let solution = ex.solution.as_ref()?;
    let mut parts = Vec::new();
    if let Some(helper) = &ex.helper {
        parts.push(helper.source.clone());
    }
    parts.push(solution.source.clone());
    if let Some(demo) = &ex.demo {
        parts.push(demo.source.clone());
    }
    Some(Cell::code(
        format!("{}.solution", ex_name),
        parts.join("\n\n"),
    ))
}

fn test_boilerplate_cell(ex_name: &str, ex: &Exercise, num: usize) -> Cell {
    let mut source = format!(
        "The cell below will test your solution for `{ex_name}` (exercise {num}). \
         The testing variables will be available for debugging under the following names \
         in a dictionary format.\n\
         - `input_vars` - Input variables for your solution.\n\
         - `original_input_vars` - Copy of the input variables from prior to running your \
         solution. Any `check_modified` inputs will be compared against this copy.\n\
         - `returned_output_vars` - Outputs returned by your solution.\n\
         - `true_output_vars` - The expected output.",
        ex_name = ex_name,
        num = num,
    );
    if let Some(doc) = ex.demo.as_ref().and_then(|d| d.docstring.as_deref()) {
        source.push_str("\n\n");
        source.push_str(doc);
    }
    Cell::markdown(format!("{}.test_boilerplate", ex_name), source)
}

fn test_cell(
    ex_name: &str,
    ex: &Exercise,
    num: usize,
    cfg: &ExerciseConfig,
    keyring: &Keyring,
    opts: &RenderOptions,
) -> Option<Cell> {
    let source = if ex.free {
        format!(
            "### Run Me!!!\nprint('Exercise {num} is free; there is nothing to test. Yay!')",
            num = num
        )
    } else {
        let test = ex.test.as_ref()?;
        let mut source = format!(
            "### test_cell_ex_{num}\n\
             passed, test_case_vars, e = execute_tests(\n\
             \x20   func={func},\n\
             \x20   ex_name='{ex_name}',\n\
             \x20   key=b'{visible_key}',\n\
             \x20   n_iter={n_visible},\n\
             \x20   conf_path='{conf_path}')\n\
             assert passed, f'Test failed: {{e}}'\n\
             print('Passed! Please submit.')",
            num = num,
            func = test.solution_name,
            ex_name = ex_name,
            visible_key = hex::encode(keyring.visible_key),
            n_visible = cfg.n_visible_trials,
            conf_path = opts.config_path,
        );
        if test.include_hidden {
            source.push_str(&format!(
                "\n\n### BEGIN HIDDEN TESTS\n\
                 passed, test_case_vars, e = execute_tests(\n\
                 \x20   func={func},\n\
                 \x20   ex_name='{ex_name}',\n\
                 \x20   key=b'{hidden_key}',\n\
                 \x20   n_iter={n_hidden},\n\
                 \x20   hidden=True,\n\
                 \x20   conf_path='{conf_path}')\n\
                 assert passed, f'Test failed on hidden cases: {{e}}'\n\
                 ### END HIDDEN TESTS",
                func = test.solution_name,
                ex_name = ex_name,
                hidden_key = hex::encode(keyring.hidden_key),
                n_hidden = cfg.n_hidden_trials,
                conf_path = opts.config_path,
            ));
        }
        source
    };

    let mut cell = Cell::code(format!("{}.test", ex_name), source);
    cell.metadata.nbgrader = Some(json!({
        "grade": true,
        "grade_id": format!("ex_{}", num),
        "locked": true,
        "points": cfg.points,
        "solution": false,
    }));
    Some(cell)
}

/// Render every generated cell for this build, keyed by full tag
pub fn build_core_cells(
    config: &AssignmentConfig,
    blueprint: &Blueprint,
    opts: &RenderOptions,
) -> IndexMap<String, Cell> {
    let mut cells = IndexMap::new();

    if opts.header {
        cells.insert("main.header".to_string(), header_cell(config));
    }
    cells.insert(
        "main.global_imports".to_string(),
        global_imports_cell(config, blueprint),
    );

    for (num, (ex_name, cfg)) in config.exercises.iter().enumerate() {
        let Some(ex) = blueprint.exercises().get(ex_name) else {
            continue;
        };
        if !ex.preload_objects.is_empty() {
            cells.insert(
                format!("{}.preload_objects", ex_name),
                preload_cell(ex_name, ex),
            );
        }
        cells.insert(
            format!("{}.prompt", ex_name),
            prompt_cell(ex_name, ex, num, cfg),
        );
        if let Some(cell) = solution_cell(ex_name, ex) {
            cells.insert(format!("{}.solution", ex_name), cell);
            cells.insert(
                format!("{}.test_boilerplate", ex_name),
                test_boilerplate_cell(ex_name, ex, num),
            );
        }
        if let Some(cell) = test_cell(ex_name, ex, num, cfg, blueprint.keyring(), opts) {
            cells.insert(format!("{}.test", ex_name), cell);
        }
    }
    cells
}
