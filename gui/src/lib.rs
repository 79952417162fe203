//! stm32pio GUI backend - projects list model.
//!
//! This crate provides the data model behind the stm32pio graphical front-end:
//! an ordered, observable list of STM32CubeMX projects whose construction runs
//! in the background, with duplicate detection and persistence of the list
//! into the application settings.
//!
//! # Overview
//!
//! Adding a path to the [`ProjectsList`] immediately appends a
//! [`ProjectListItem`] reading `"Loading..."`. The project itself is built by
//! a [`ProjectLoader`] on a blocking thread. Saves run on a single-worker
//! [`WorkerPool`], wait until nothing in the list is loading, and store the
//! paths of the projects that loaded successfully.
//!
//! # Modules
//!
//! - [`list`]: The projects list and its save routine
//! - [`item`]: One list entry with background construction and queued actions
//! - [`observer`]: Observable-list notifications
//! - [`pool`]: Bounded FIFO worker pool
//! - [`project`]: Project and loader traits
//! - [`ioc`]: Default loader for directories holding a CubeMX `.ioc` file
//! - [`stage`]: Project life-cycle stages
//! - [`settings`]: Group/array scoped settings storage
//! - [`persist`]: Layout of the stored projects array
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`utils`]: Shared utilities (path classification, lock helpers)

pub mod config;
pub mod error;
pub mod ioc;
pub mod item;
pub mod list;
pub mod observer;
pub mod persist;
pub mod pool;
pub mod project;
pub mod settings;
pub mod stage;
pub mod utils;

pub use config::{Config, ConfigError};
pub use error::{GuiError, Result};
pub use ioc::{IocLoader, IocProject};
pub use item::{ItemEvent, ItemState, ProjectId, ProjectListItem};
pub use list::{AddOptions, BatchOutcome, ProjectsList, SkippedPath};
pub use observer::{ChannelObserver, ListEvent, ListObserver, NoopObserver};
pub use pool::{JobHandle, WorkerPool};
pub use project::{ActionError, LoadError, Project, ProjectLoader, ProjectSpec};
pub use settings::{Settings, SettingsStore, SharedStore, StoreError};
pub use stage::{ProjectStage, ProjectState};
pub use utils::{classify_path_input, PathInput, SkipReason};
