//! Utility modules for the stm32pio GUI backend.
//!
//! # Modules
//!
//! - `locks`: Poison-tolerant lock helpers
//! - [`path_input`]: Classification of user supplied path strings

pub(crate) mod locks;
pub mod path_input;

pub use path_input::{classify_path_input, PathInput, SkipReason};
