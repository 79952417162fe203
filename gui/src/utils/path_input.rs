//! Classification of user supplied path strings.
//!
//! Paths reach the projects list from drag-and-drop, file dialogs and the
//! command line, so they come either as `file:` URIs or as plain strings.
//!
//! # Example
//!
//! ```
//! use stm32pio_gui::utils::path_input::{classify_path_input, PathInput};
//!
//! assert_eq!(
//!     classify_path_input("file:///home/user/blink"),
//!     PathInput::Local("/home/user/blink".into())
//! );
//! assert_eq!(
//!     classify_path_input("projects/blink"),
//!     PathInput::Bare("projects/blink".to_string())
//! );
//! ```

use std::fmt;
use std::path::PathBuf;

use url::{ParseError, Url};

/// How a raw path string should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathInput {
    /// A well-formed `file:` URI, decoded to a local path.
    Local(PathBuf),
    /// A string with no URI scheme, used verbatim.
    Bare(String),
    /// Rejected input.
    Rejected(SkipReason),
}

/// Why an entry of a batch add produced no project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The entry was an empty string.
    Empty,
    /// The entry is a URI with a scheme other than `file`.
    NonLocal { scheme: String },
    /// The entry looks like a URI but cannot be parsed as one, or names a
    /// file on another host.
    Malformed { reason: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "given path is empty"),
            Self::NonLocal { scheme } => write!(f, "'{scheme}' is not a local file location"),
            Self::Malformed { reason } => write!(f, "incorrect path: {reason}"),
        }
    }
}

impl PathInput {
    /// Resolves the input into the path string handed to the projects list.
    pub fn into_path(self) -> Result<String, SkipReason> {
        match self {
            Self::Local(path) => Ok(path.to_string_lossy().into_owned()),
            Self::Bare(path) => Ok(path),
            Self::Rejected(reason) => Err(reason),
        }
    }
}

/// Classifies a raw path string.
///
/// Single letter schemes are Windows drive letters (`C:/Projects/blink`) and
/// are treated as plain paths.
#[must_use]
pub fn classify_path_input(raw: &str) -> PathInput {
    if raw.is_empty() {
        return PathInput::Rejected(SkipReason::Empty);
    }

    match Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => match url.to_file_path() {
            Ok(path) => PathInput::Local(path),
            Err(()) => PathInput::Rejected(SkipReason::Malformed {
                reason: format!("'{raw}' does not name a local file"),
            }),
        },
        Ok(url) if url.scheme().len() == 1 => PathInput::Bare(raw.to_string()),
        Ok(url) => PathInput::Rejected(SkipReason::NonLocal {
            scheme: url.scheme().to_string(),
        }),
        Err(ParseError::RelativeUrlWithoutBase) if !raw.contains("://") => {
            PathInput::Bare(raw.to_string())
        }
        Err(ParseError::RelativeUrlWithoutBase) => PathInput::Rejected(SkipReason::Malformed {
            reason: format!("'{raw}' has an invalid URI scheme"),
        }),
        Err(error) => PathInput::Rejected(SkipReason::Malformed {
            reason: error.to_string(),
        }),
    }
}
