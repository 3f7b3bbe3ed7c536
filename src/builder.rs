//! Assignment build pipeline
//!
//! The builder owns the on-disk artifact tree and runs the linear batch
//! pipeline: load the prior config, reconcile it against the registry,
//! write the encrypted case files and preload artifacts, render the core
//! cells, and merge them into the target notebook. A failing step aborts
//! the remaining pipeline; artifacts written by earlier steps stay on disk,
//! so a failed build requires a full re-run before any artifact can be
//! trusted as fresh.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::blueprint::Blueprint;
use crate::config::{reconcile, AssignmentConfig};
use crate::error::Result;
use crate::notebook::{merge_cells, Notebook};
use crate::render::{build_core_cells, RenderOptions};

/// Locations of every artifact a build touches
#[derive(Debug, Clone)]
pub struct BuildPaths {
    pub config_path: PathBuf,
    pub notebook_path: PathBuf,
    pub keys_path: PathBuf,
    /// Where case files, preload objects, and the config land
    pub public_dir: PathBuf,
    /// Source data staged into the public directory before a build
    pub data_dir: PathBuf,
}

impl BuildPaths {
    /// The conventional layout under an assignment root directory
    pub fn rooted(root: &Path) -> Self {
        let public_dir = root.join("resource/asnlib/publicdata");
        Self {
            config_path: public_dir.join("assignment_config.yaml"),
            notebook_path: root.join("main.ipynb"),
            keys_path: root.join("keys.json"),
            public_dir,
            data_dir: root.join("data"),
        }
    }

    /// Directory holding the hidden (withheld) case files
    pub fn hidden_dir(&self) -> PathBuf {
        self.public_dir.join("encrypted")
    }

    /// Visible case file for one exercise
    pub fn visible_case_file(&self, ex_name: &str) -> PathBuf {
        self.public_dir.join(format!("tc_{}", ex_name))
    }

    /// Hidden case file for one exercise
    pub fn hidden_case_file(&self, ex_name: &str) -> PathBuf {
        self.hidden_dir().join(format!("tc_{}", ex_name))
    }
}

fn default_kernelspec() -> Value {
    json!({
        "kernelspec": {
            "display_name": "Python 3.8",
            "language": "python",
            "name": "python38",
        }
    })
}

pub struct AssignmentBuilder {
    blueprint: Blueprint,
    paths: BuildPaths,
    header: bool,
    kernelspec: Value,
}

impl AssignmentBuilder {
    /// Create a builder rooted at `paths`: scaffolds the artifact
    /// directories, stages data files, and loads or creates the keyring.
    pub fn new(paths: BuildPaths) -> Result<Self> {
        std::fs::create_dir_all(&paths.data_dir)?;
        std::fs::create_dir_all(&paths.public_dir)?;
        std::fs::create_dir_all(paths.hidden_dir())?;
        info!(public = %paths.public_dir.display(), "Build directories ready");

        stage_data_files(&paths.data_dir, &paths.public_dir)?;

        let blueprint = Blueprint::open(&paths.keys_path)?;
        Ok(Self {
            blueprint,
            paths,
            header: true,
            kernelspec: default_kernelspec(),
        })
    }

    /// Create a builder with an explicit blueprint (keyring already loaded)
    pub fn with_blueprint(paths: BuildPaths, blueprint: Blueprint) -> Result<Self> {
        std::fs::create_dir_all(&paths.data_dir)?;
        std::fs::create_dir_all(&paths.public_dir)?;
        std::fs::create_dir_all(paths.hidden_dir())?;
        stage_data_files(&paths.data_dir, &paths.public_dir)?;
        Ok(Self {
            blueprint,
            paths,
            header: true,
            kernelspec: default_kernelspec(),
        })
    }

    /// Suppress the generated header cell
    pub fn header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn kernelspec(mut self, kernelspec: Value) -> Self {
        self.kernelspec = kernelspec;
        self
    }

    pub fn paths(&self) -> &BuildPaths {
        &self.paths
    }

    /// The builder's own blueprint, for registering components directly
    pub fn blueprint_mut(&mut self) -> &mut Blueprint {
        &mut self.blueprint
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    /// Merge an independently authored blueprint into the build
    pub fn register_blueprint(&mut self, other: Blueprint) -> Result<()> {
        self.blueprint.merge(other)
    }

    /// Merge a collection of blueprints, in order
    pub fn register_blueprints(
        &mut self,
        others: impl IntoIterator<Item = Blueprint>,
    ) -> Result<()> {
        for other in others {
            self.register_blueprint(other)?;
        }
        Ok(())
    }

    /// Run the build pipeline
    pub fn build(&mut self) -> Result<AssignmentConfig> {
        info!("Starting build");
        let prior = AssignmentConfig::load(&self.paths.config_path)?;
        let config = reconcile(prior, &self.blueprint);
        config.save(&self.paths.config_path)?;

        self.write_artifacts()?;

        let opts = RenderOptions {
            header: self.header,
            config_path: self.paths.config_path.to_string_lossy().into_owned(),
        };
        let core_cells = build_core_cells(&config, &self.blueprint, &opts);

        let mut notebook = Notebook::load(&self.paths.notebook_path)?;
        notebook.cells = merge_cells(std::mem::take(&mut notebook.cells), core_cells);
        notebook.write(&self.paths.notebook_path, &self.kernelspec)?;

        info!("Build finished");
        Ok(config)
    }

    /// Write the per-exercise case files, preload objects, plugin kwargs,
    /// and util records
    fn write_artifacts(&mut self) -> Result<()> {
        let keyring = self.blueprint.keyring().clone();
        let paths = self.paths.clone();

        for (ex_name, ex) in self.blueprint.exercises_mut().iter_mut() {
            let free = ex.free;
            if let Some(test) = ex.test.as_mut() {
                if free {
                    debug!(exercise = %ex_name, "Free exercise; skipping case files");
                } else {
                    info!(exercise = %ex_name, n_cases = test.n_cases, "Writing case files");
                    test.generator.write_cases(
                        &paths.visible_case_file(ex_name),
                        test.n_cases,
                        Some(keyring.visible_key),
                    )?;
                    test.generator.write_cases(
                        &paths.hidden_case_file(ex_name),
                        test.n_cases,
                        Some(keyring.hidden_key),
                    )?;
                }
                if let Some(kwargs) = &test.plugin_kwargs {
                    let path = paths
                        .public_dir
                        .join(format!("{}_plugin_kwargs.json", ex_name));
                    write_json(&path, &Value::Object(kwargs.clone()))?;
                }
            }
            for (obj_name, value) in &ex.preload_objects {
                debug!(exercise = %ex_name, object = %obj_name, "Writing preload object");
                write_json(&paths.public_dir.join(obj_name), value)?;
            }
        }

        for (name, record) in self.blueprint.utils() {
            let artifact = json!({
                "name": record.name,
                "source": record.source,
                "docstring": record.docstring,
            });
            write_json(&paths.public_dir.join(name), &artifact)?;
        }
        Ok(())
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

/// Copy files present in `data_dir` but absent from `public_dir`
fn stage_data_files(data_dir: &Path, public_dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = public_dir.join(entry.file_name());
        if !target.exists() {
            debug!(file = ?entry.file_name(), "Staging data file into public directory");
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
