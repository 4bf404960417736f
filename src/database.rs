//! C6: resolves a task's declared database label to a concrete URI, copying
//! file-backed databases into the task scratch directory before each run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

#[derive(Debug, Clone)]
pub struct DatabaseBinding {
    pub uri: String,
    pub is_file: bool,
    pub db_type: Option<String>,
}

pub struct DatabaseBinder {
    bindings: HashMap<String, DatabaseBinding>,
    running_in_container: bool,
}

impl DatabaseBinder {
    /// Builds bindings from `config`, consulting `<LABEL>_DATABASE_URI`
    /// environment variables when running inside a container (the config
    /// file's paths are written against the host, not the container).
    pub fn new(config: &NodeConfig, running_in_container: bool) -> Self {
        let mut bindings = HashMap::new();
        for (label, (uri, db_type)) in config.databases_normalized() {
            let resolved_uri = if running_in_container {
                std::env::var(format!("{}_DATABASE_URI", label.to_uppercase()))
                    .unwrap_or(uri)
            } else {
                uri
            };
            let is_file = is_file_uri(&resolved_uri, running_in_container);
            bindings.insert(
                label,
                DatabaseBinding { uri: resolved_uri, is_file, db_type },
            );
        }
        Self { bindings, running_in_container }
    }

    pub fn get(&self, label: &str) -> NodeResult<&DatabaseBinding> {
        self.bindings
            .get(label)
            .ok_or_else(|| NodeError::DatabaseNotFound(label.to_string()))
    }

    /// Resolves the binding for `label`, copying a file database into
    /// `scratch_dir` and returning the in-scratch path as the run's URI. The
    /// canonical file on disk is left untouched.
    pub fn prepare_for_run(&self, label: &str, scratch_dir: &Path) -> NodeResult<DatabaseBinding> {
        let binding = self.get(label)?;
        if !binding.is_file {
            return Ok(binding.clone());
        }

        std::fs::create_dir_all(scratch_dir)?;
        let src = Path::new(&binding.uri);
        let file_name = src
            .file_name()
            .ok_or_else(|| NodeError::InvalidConfig(format!("database uri has no file name: {}", binding.uri)))?;
        let dst: PathBuf = scratch_dir.join(file_name);
        std::fs::copy(src, &dst)?;

        Ok(DatabaseBinding {
            uri: dst.to_string_lossy().into_owned(),
            is_file: true,
            db_type: binding.db_type.clone(),
        })
    }
}

fn is_file_uri(uri: &str, running_in_container: bool) -> bool {
    if running_in_container && !uri.starts_with("/mnt/") {
        return false;
    }
    Path::new(uri).is_file()
}
