//! Contract between the projects list and the project payload it wraps.
//!
//! The list does not know how a project is built or what its actions do. It
//! hands a [`ProjectSpec`] to a [`ProjectLoader`] on a background thread and
//! gets back either a ready [`Project`] or a [`LoadError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::stage::ProjectState;

/// Action name used to merge parameters into a project's config and flush it.
pub const SAVE_CONFIG_ACTION: &str = "save_config";

/// Errors that can occur while constructing a project.
#[derive(Error, Debug)]
pub enum LoadError {
    /// No construction arguments were given.
    #[error("no project path was given")]
    MissingPath,

    /// The path does not exist or cannot be resolved.
    #[error("cannot resolve project path {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path is neither a directory nor an `.ioc` file.
    #[error(
        "project path '{}' should be a directory with an .ioc file or an .ioc file itself",
        .0.display()
    )]
    NotAProject(PathBuf),

    /// The directory holds no `.ioc` file.
    #[error("no .ioc file found in {}", .0.display())]
    MissingIoc(PathBuf),

    /// Any other loader specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while running a project action.
#[derive(Error, Debug)]
pub enum ActionError {
    /// The project does not implement the requested action.
    #[error("unsupported action '{0}'")]
    Unsupported(String),

    /// The arguments do not fit the action.
    #[error("invalid arguments for '{action}': {message}")]
    InvalidArguments { action: String, message: String },

    /// The project never finished loading.
    #[error("project is not initialized")]
    NotInitialized,

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other action failure.
    #[error("{0}")]
    Failed(String),
}

/// Arguments used to construct one project.
///
/// `args[0]` is the project path. `parameters` are config overrides grouped
/// by section, e.g. `{"project": {"board": "nucleo_f031k6"}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectSpec {
    pub args: Vec<String>,
    pub parameters: Map<String, Value>,
}

impl ProjectSpec {
    /// The project path, if one was given.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// A fully constructed project.
pub trait Project: Send + Sync {
    /// Canonical directory of the project.
    fn path(&self) -> &Path;

    /// Display name. Defaults to the directory name.
    fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    /// Current state, evaluated on every call.
    fn state(&self) -> ProjectState;

    /// Runs the named action. Blocking; called from a worker thread.
    fn run(&self, action: &str, args: &[Value]) -> Result<(), ActionError>;
}

/// Builds projects. Called on a blocking thread, once per list entry.
pub trait ProjectLoader: Send + Sync {
    fn load(&self, spec: &ProjectSpec) -> Result<Arc<dyn Project>, LoadError>;
}

impl<F> ProjectLoader for F
where
    F: Fn(&ProjectSpec) -> Result<Arc<dyn Project>, LoadError> + Send + Sync,
{
    fn load(&self, spec: &ProjectSpec) -> Result<Arc<dyn Project>, LoadError> {
        self(spec)
    }
}

/// Builds the `{"project": {"board": <board>}}` parameters mapping.
#[must_use]
pub fn board_parameters(board: &str) -> Map<String, Value> {
    let mut section = Map::new();
    section.insert("board".to_string(), Value::from(board));
    let mut parameters = Map::new();
    parameters.insert("project".to_string(), Value::Object(section));
    parameters
}
