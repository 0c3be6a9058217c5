//! Project configuration, read from `sconfig.json` at the project root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backend::{CodegenOptions, RegisterAllocatorKind},
    frontend::location::ModuleReference,
    middle::optimization::OptimizationConfig,
    CompilerOptions,
};

pub const CONFIGURATION_FILE: &str = "sconfig.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {CONFIGURATION_FILE} in `{}` or any of its parents", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in `{}`: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfiguration {
    pub source_directory: PathBuf,
    pub output_directory: PathBuf,
    /// Dotted module references, each compiled into its own program
    pub entry_points: Vec<String>,
    /// Source paths containing any of these fragments are skipped
    pub ignores: Vec<String>,
    pub optimizer: OptimizationConfig,
    pub register_allocator: RegisterAllocatorKind,
    pub tail_recursion: bool,
    pub report_cyclic_dependencies: bool,
}

impl Default for ProjectConfiguration {
    fn default() -> Self {
        Self {
            source_directory: PathBuf::from("."),
            output_directory: PathBuf::from("out"),
            entry_points: vec!["Main".to_string()],
            ignores: Vec::new(),
            optimizer: OptimizationConfig::all(),
            register_allocator: RegisterAllocatorKind::default(),
            tail_recursion: true,
            report_cyclic_dependencies: false,
        }
    }
}

impl ProjectConfiguration {
    pub fn parse(json: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the configuration from `start` or the closest parent holding
    /// one. Relative directories in it are resolved against its location.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        let path = start
            .ancestors()
            .map(|directory| directory.join(CONFIGURATION_FILE))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::NotFound(start.to_path_buf()))?;

        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut configuration = Self::parse(&json, &path)?;

        if let Some(root) = path.parent() {
            configuration.source_directory = root.join(&configuration.source_directory);
            configuration.output_directory = root.join(&configuration.output_directory);
        }

        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(configuration)
    }

    pub fn entry_modules(&self) -> Vec<ModuleReference> {
        self.entry_points
            .iter()
            .map(|entry| ModuleReference::from_dotted(entry))
            .collect()
    }

    pub fn compiler_options(&self) -> CompilerOptions {
        CompilerOptions {
            optimization: self.optimizer.clone(),
            codegen: CodegenOptions {
                register_allocator: self.register_allocator,
                emit_comments: false,
            },
            tail_recursion: self.tail_recursion,
            report_cyclic_dependencies: self.report_cyclic_dependencies,
        }
    }
}
