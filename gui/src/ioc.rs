//! Default project loader for STM32CubeMX projects.
//!
//! A directory is a project when it holds a CubeMX `.ioc` file. The loader
//! resolves the given path (a directory or the `.ioc` file itself), and the
//! resulting [`IocProject`] reports its stage from the files on disk.
//!
//! Code generation and builds are driven by external tools and are not part
//! of this crate; the only action implemented here is
//! [`SAVE_CONFIG_ACTION`], which writes `stm32pio.ini`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::BaseDirs;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::project::{
    ActionError, LoadError, Project, ProjectLoader, ProjectSpec, SAVE_CONFIG_ACTION,
};
use crate::stage::{ProjectStage, ProjectState};
use crate::utils::locks::lock;

/// Project config file name.
pub const CONFIG_FILE_NAME: &str = "stm32pio.ini";

const PLATFORMIO_INI: &str = "platformio.ini";
const PLATFORMIO_PATCH_MARKER: &str = "[platformio]";

/// Loads [`IocProject`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct IocLoader;

impl ProjectLoader for IocLoader {
    fn load(&self, spec: &ProjectSpec) -> Result<Arc<dyn Project>, LoadError> {
        Ok(Arc::new(IocProject::open(spec)?))
    }
}

/// A CubeMX project directory.
#[derive(Debug)]
pub struct IocProject {
    path: PathBuf,
    ioc_file: String,
    config: Mutex<Map<String, Value>>,
}

impl IocProject {
    /// Resolves `spec` into a project.
    ///
    /// # Errors
    ///
    /// Returns an error if no path was given, the path does not exist, or no
    /// `.ioc` file can be found.
    pub fn open(spec: &ProjectSpec) -> Result<Self, LoadError> {
        let raw = spec.path().ok_or(LoadError::MissingPath)?;
        let expanded = expand_home(raw);
        let resolved = fs::canonicalize(&expanded).map_err(|source| LoadError::Resolve {
            path: expanded.clone(),
            source,
        })?;

        let (path, ioc_file) = if resolved.is_file() && has_ioc_extension(&resolved) {
            let name = file_name(&resolved);
            let parent = resolved
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| LoadError::NotAProject(resolved.clone()))?;
            (parent, name)
        } else if resolved.is_dir() {
            let ioc = find_ioc_file(&resolved)?;
            (resolved, ioc)
        } else {
            return Err(LoadError::NotAProject(resolved));
        };

        let mut config = cleanup(&spec.parameters);
        let mut project = take_section(&mut config, "project");
        project.insert("ioc_file".to_string(), Value::from(ioc_file.clone()));
        config.insert("project".to_string(), Value::Object(project));

        debug!(path = %path.display(), ioc = %ioc_file, "Resolved CubeMX project");

        Ok(Self {
            path,
            ioc_file,
            config: Mutex::new(config),
        })
    }

    /// Name of the `.ioc` file inside the project directory.
    #[must_use]
    pub fn ioc_file(&self) -> &str {
        &self.ioc_file
    }

    /// Snapshot of the runtime config.
    #[must_use]
    pub fn config(&self) -> Map<String, Value> {
        lock(&self.config).clone()
    }

    fn save_config(&self, args: &[Value]) -> Result<(), ActionError> {
        let overrides = match args.first() {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => cleanup(map),
            Some(other) => {
                return Err(ActionError::InvalidArguments {
                    action: SAVE_CONFIG_ACTION.to_string(),
                    message: format!("expected a parameters object, got {other}"),
                })
            }
        };

        let mut config = lock(&self.config);
        merge(&mut config, overrides);
        let rendered = render_ini(&config);
        drop(config);

        let target = self.path.join(CONFIG_FILE_NAME);
        fs::write(&target, rendered)?;
        info!(path = %target.display(), "Config has been saved");
        Ok(())
    }
}

impl Project for IocProject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> ProjectState {
        let inc_dir = self.path.join("Inc");
        let src_dir = self.path.join("Src");
        let include_dir = self.path.join("include");
        let pio_dir = self.path.join(".pio");
        let platformio_ini = self.path.join(PLATFORMIO_INI);

        let pio_initialized = platformio_ini.is_file();
        let patched = pio_initialized
            && fs::read_to_string(&platformio_ini)
                .map(|content| content.contains(PLATFORMIO_PATCH_MARKER))
                .unwrap_or(false)
            && !include_dir.is_dir();

        let mut fulfilled = Vec::new();
        let checks = [
            (ProjectStage::Empty, self.path.join(&self.ioc_file).is_file()),
            (
                ProjectStage::Initialized,
                self.path.join(CONFIG_FILE_NAME).is_file(),
            ),
            (
                ProjectStage::Generated,
                non_empty_dir(&inc_dir) && non_empty_dir(&src_dir),
            ),
            (ProjectStage::PioInitialized, pio_initialized),
            (ProjectStage::Patched, patched),
            (ProjectStage::Built, contains_firmware(&pio_dir)),
        ];
        for (stage, holds) in checks {
            if holds {
                fulfilled.push(stage);
            }
        }

        ProjectState::from_fulfilled(&fulfilled)
    }

    fn run(&self, action: &str, args: &[Value]) -> Result<(), ActionError> {
        match action {
            SAVE_CONFIG_ACTION => self.save_config(args),
            other => Err(ActionError::Unsupported(other.to_string())),
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(base_dirs) = BaseDirs::new() {
            return base_dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(raw)
}

fn has_ioc_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "ioc")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn find_ioc_file(dir: &Path) -> Result<String, LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Resolve {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_ioc_extension(path))
        .map(|path| file_name(&path))
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| LoadError::MissingIoc(dir.to_path_buf()))
}

fn non_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn contains_firmware(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.is_dir() {
            if contains_firmware(&path) {
                return true;
            }
        } else if file_name(&path).contains("firmware") {
            return true;
        }
    }
    false
}

/// Drops empty values so they never mask existing ones.
fn cleanup(parameters: &Map<String, Value>) -> Map<String, Value> {
    parameters
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Object(inner) => {
                let cleaned = cleanup(inner);
                (!cleaned.is_empty()).then(|| (key.clone(), Value::Object(cleaned)))
            }
            Value::Null => None,
            Value::String(text) if text.is_empty() => None,
            other => Some((key.clone(), other.clone())),
        })
        .collect()
}

fn take_section(config: &mut Map<String, Value>, name: &str) -> Map<String, Value> {
    match config.remove(name) {
        Some(Value::Object(section)) => section,
        _ => Map::new(),
    }
}

fn merge(config: &mut Map<String, Value>, overrides: Map<String, Value>) {
    for (name, values) in overrides {
        match values {
            Value::Object(values) => {
                let mut section = take_section(config, &name);
                section.extend(values);
                config.insert(name, Value::Object(section));
            }
            other => {
                config.insert(name, other);
            }
        }
    }
}

fn render_ini(config: &Map<String, Value>) -> String {
    let mut out = String::new();
    for (section, values) in config {
        let Value::Object(values) = values else {
            continue;
        };
        out.push_str(&format!("[{section}]\n"));
        for (key, value) in values {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("{key} = {text}\n"));
        }
        out.push('\n');
    }
    out
}
