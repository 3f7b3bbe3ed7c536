//! Target document model and tag-addressed merge
//!
//! The target is an nbformat-v4 notebook. Generated cells carry a tag of the
//! form `{exercise}.{role}` as their identity key; merging replaces a tagged
//! cell in place with its freshly rendered counterpart, leaves every other
//! cell untouched and in order, and appends newly introduced cells at the
//! end in registration order.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Markdown,
    Code,
    Raw,
}

/// Cell metadata; unknown user metadata round-trips untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbgrader: Option<Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// nbformat stores cell source as either a string or a list of lines
fn string_or_lines<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        One(String),
        Lines(Vec<String>),
    }
    Ok(match Source::deserialize(deserializer)? {
        Source::One(s) => s,
        Source::Lines(lines) => lines.concat(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellKind,
    #[serde(default, deserialize_with = "string_or_lines")]
    pub source: String,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
}

impl Cell {
    /// A generated markdown cell carrying the full tag `{exercise}.{role}`
    pub fn markdown(tag: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            cell_type: CellKind::Markdown,
            source: source.into(),
            metadata: CellMetadata {
                tags: vec![tag.into()],
                ..CellMetadata::default()
            },
            id: None,
            outputs: None,
            execution_count: None,
        }
    }

    /// A generated code cell carrying the full tag `{exercise}.{role}`
    pub fn code(tag: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            cell_type: CellKind::Code,
            source: source.into(),
            metadata: CellMetadata {
                tags: vec![tag.into()],
                ..CellMetadata::default()
            },
            id: None,
            outputs: Some(Vec::new()),
            execution_count: None,
        }
    }

    /// The identity tag used for reconciliation
    pub fn first_tag(&self) -> Option<&str> {
        self.metadata.tags.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Value,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

impl Default for Notebook {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            metadata: json!({}),
            nbformat: 4,
            nbformat_minor: 5,
        }
    }
}

impl Notebook {
    /// Load the notebook at `path`; a missing file yields an empty notebook
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Notebook not found; starting empty");
            return Ok(Self::default());
        }
        let raw = std::fs::read(path)?;
        let nb = serde_json::from_slice(&raw)
            .map_err(|e| ForgeError::Deserialization(format!("invalid notebook: {}", e)))?;
        info!(path = %path.display(), "Loaded notebook");
        Ok(nb)
    }

    /// Write the notebook atomically. Notebook metadata is replaced with
    /// `kernelspec`, cell ids are reassigned to their index, and code cells
    /// are cleared of outputs and execution counts.
    pub fn write(&mut self, path: &Path, kernelspec: &Value) -> Result<()> {
        self.metadata = kernelspec.clone();
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            cell.id = Some(idx.to_string());
            if cell.cell_type == CellKind::Code {
                cell.outputs = Some(Vec::new());
                cell.execution_count = None;
            }
        }

        let rendered = serde_json::to_vec_pretty(&self)?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tmp.write_all(&rendered)?;
        tmp.persist(path).map_err(|e| ForgeError::Io(e.error))?;
        info!(path = %path.display(), n_cells = self.cells.len(), "Notebook written");
        Ok(())
    }
}

/// Merge freshly rendered cells into the existing ordered cell list.
///
/// Each existing cell whose first tag is a key in `fresh` is replaced, in
/// place, by the fresh cell (full replacement, never a field merge); every
/// other cell passes through unchanged. Fresh cells that matched nothing
/// are appended at the end in their map order.
pub fn merge_cells(existing: Vec<Cell>, mut fresh: IndexMap<String, Cell>) -> Vec<Cell> {
    let mut out = Vec::with_capacity(existing.len() + fresh.len());
    for cell in existing {
        let replacement = cell.first_tag().and_then(|tag| fresh.shift_remove(tag));
        match replacement {
            Some(new_cell) => {
                debug!(tag = ?new_cell.first_tag(), "Replacing generated cell in place");
                out.push(new_cell);
            }
            None => out.push(cell),
        }
    }
    for (tag, cell) in fresh {
        debug!(tag = %tag, "Appending new generated cell");
        out.push(cell);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_map(cells: Vec<Cell>) -> IndexMap<String, Cell> {
        cells
            .into_iter()
            .map(|c| (c.first_tag().unwrap().to_string(), c))
            .collect()
    }

    fn untagged(source: &str) -> Cell {
        Cell {
            cell_type: CellKind::Code,
            source: source.to_string(),
            metadata: CellMetadata::default(),
            id: None,
            outputs: Some(Vec::new()),
            execution_count: None,
        }
    }

    #[test]
    fn test_merge_replaces_in_place_and_keeps_user_cells() {
        let existing = vec![
            untagged("scratch work"),
            Cell::code("foo.solution", "old body"),
            untagged("more scratch"),
        ];
        let fresh = fresh_map(vec![Cell::code("foo.solution", "new body")]);

        let merged = merge_cells(existing, fresh);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].source, "scratch work");
        assert_eq!(merged[1].source, "new body");
        assert_eq!(merged[2].source, "more scratch");
    }

    #[test]
    fn test_merge_appends_new_tags_in_order() {
        let existing = vec![untagged("user cell")];
        let fresh = fresh_map(vec![
            Cell::markdown("foo.prompt", "prompt"),
            Cell::code("foo.solution", "solution"),
        ]);

        let merged = merge_cells(existing, fresh);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].source, "user cell");
        assert_eq!(merged[1].first_tag(), Some("foo.prompt"));
        assert_eq!(merged[2].first_tag(), Some("foo.solution"));
    }

    #[test]
    fn test_merge_ignores_unknown_tags() {
        let existing = vec![Cell::code("retired.solution", "kept as-is")];
        let merged = merge_cells(existing, IndexMap::new());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, "kept as-is");
    }

    #[test]
    fn test_merge_is_idempotent_over_unchanged_fresh_cells() {
        let fresh = || {
            fresh_map(vec![
                Cell::markdown("foo.prompt", "prompt"),
                Cell::code("foo.solution", "body"),
            ])
        };
        let first = merge_cells(vec![untagged("scratch")], fresh());
        let second = merge_cells(first.clone(), fresh());
        assert_eq!(first, second);
    }

    #[test]
    fn test_source_deserializes_from_lines() {
        let raw = r#"{
            "cell_type": "code",
            "source": ["line 1\n", "line 2"],
            "metadata": {}
        }"#;
        let cell: Cell = serde_json::from_str(raw).unwrap();
        assert_eq!(cell.source, "line 1\nline 2");
    }

    #[test]
    fn test_user_metadata_round_trips() {
        let raw = r#"{
            "cell_type": "markdown",
            "source": "notes",
            "metadata": {"collapsed": true, "tags": ["my.tag"]}
        }"#;
        let cell: Cell = serde_json::from_str(raw).unwrap();
        assert_eq!(cell.metadata.tags, vec!["my.tag"]);
        assert_eq!(cell.metadata.extra["collapsed"], Value::Bool(true));

        let round = serde_json::to_value(&cell).unwrap();
        assert_eq!(round["metadata"]["collapsed"], Value::Bool(true));
    }

    #[test]
    fn test_write_clears_outputs_and_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.ipynb");

        let mut nb = Notebook::default();
        let mut cell = Cell::code("foo.test", "assert True");
        cell.outputs = Some(vec![json!({"output_type": "stream"})]);
        cell.execution_count = Some(3);
        nb.cells.push(cell);

        nb.write(&path, &json!({"kernelspec": {"name": "python38"}}))
            .unwrap();

        let loaded = Notebook::load(&path).unwrap();
        assert_eq!(loaded.cells[0].id.as_deref(), Some("0"));
        assert_eq!(loaded.cells[0].outputs, Some(Vec::new()));
        assert_eq!(loaded.cells[0].execution_count, None);
        assert_eq!(loaded.metadata["kernelspec"]["name"], json!("python38"));
    }
}
