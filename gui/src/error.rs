//! Error types for the stm32pio GUI backend.
//!
//! Each module that can fail owns a focused error enum; [`GuiError`] gathers
//! them for callers that only need a single type.
//!
//! Note that the projects list itself never returns errors: a project that
//! fails to load stays in the list in its error state, and a malformed path is
//! skipped with a diagnostic. These types surface at the edges (configuration,
//! settings storage, project loading and actions).

use thiserror::Error;

use crate::config::ConfigError;
use crate::project::{ActionError, LoadError};
use crate::settings::StoreError;

/// Errors that can occur in the GUI backend.
///
/// # Examples
///
/// ```ignore
/// use stm32pio_gui::error::GuiError;
///
/// fn open_settings(path: &Path) -> Result<Settings, GuiError> {
///     Ok(Settings::open(path)?)
/// }
/// ```
#[derive(Error, Debug)]
pub enum GuiError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Settings storage error.
    #[error("settings error: {0}")]
    Store(#[from] StoreError),

    /// Project construction failed.
    #[error("project load error: {0}")]
    Load(#[from] LoadError),

    /// Project action failed.
    #[error("project action error: {0}")]
    Action(#[from] ActionError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for GUI backend operations.
pub type Result<T> = std::result::Result<T, GuiError>;
