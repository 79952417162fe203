//! Ordered, observable collection of projects.
//!
//! [`ProjectsList`] owns the [`ProjectListItem`]s shown by the front-end, in
//! display order. Adding a path that is already listed jumps to the existing
//! entry instead. Every change is announced through a [`ListObserver`].
//!
//! # Persistence
//!
//! [`save_in_settings`](ProjectsList::save_in_settings) queues a job on a
//! single-worker pool, so saves never overlap and run in request order. The
//! job waits until no listed project is still loading, then writes the paths
//! of the successfully constructed ones as a full replacement of the stored
//! array:
//!
//! ```text
//!  add/remove ──► save_in_settings ──► WorkerPool (1 worker, FIFO)
//!                                         │ wait: nothing is loading
//!                                         ▼
//!                                    write_project_paths ──► SettingsStore
//! ```
//!
//! The wait is a condition variable notified whenever an item resolves or is
//! removed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//!
//! use stm32pio_gui::ioc::IocLoader;
//! use stm32pio_gui::list::ProjectsList;
//! use stm32pio_gui::settings::{Settings, SharedStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store: SharedStore = Arc::new(Mutex::new(Settings::in_memory()));
//!     let list = ProjectsList::new(
//!         &tokio::runtime::Handle::current(),
//!         Arc::new(IocLoader),
//!         store,
//!     );
//!
//!     let outcome = list.add_projects_by_paths(&["file:///home/user/blink"]);
//!     if let Some(save) = outcome.save {
//!         save.wait().await;
//!     }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::item::{InitializedCallback, ProjectListItem};
use crate::observer::{ListObserver, NoopObserver};
use crate::persist::{read_project_paths, write_project_paths};
use crate::pool::{JobHandle, WorkerPool};
use crate::project::{ProjectLoader, ProjectSpec, SAVE_CONFIG_ACTION};
use crate::settings::SharedStore;
use crate::utils::locks::{lock, read, write};
use crate::utils::path_input::{classify_path_input, SkipReason};

/// Options of a single [`add_list_item`](ProjectsList::add_list_item) call.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Construction arguments. The first one is replaced by the added path.
    pub args: Vec<String>,
    /// Config overrides, e.g. `{"project": {"board": "nucleo_f031k6"}}`.
    pub parameters: Map<String, Value>,
    /// Whether the path comes from the settings restored at startup.
    pub from_startup: bool,
}

/// A batch entry that produced no project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub input: String,
    pub reason: SkipReason,
}

/// Result of [`add_projects_by_paths`](ProjectsList::add_projects_by_paths).
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Items for the accepted entries, new or already listed, in input order.
    pub added: Vec<ProjectListItem>,
    pub skipped: Vec<SkippedPath>,
    /// The save scheduled after a non-empty batch.
    pub save: Option<JobHandle>,
}

/// Wakes the save job whenever the loading state of the list may have changed.
#[derive(Debug, Default)]
struct SettleGate {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl SettleGate {
    fn bump(&self) {
        {
            let mut generation = lock(&self.generation);
            *generation = generation.wrapping_add(1);
        }
        self.changed.notify_all();
    }

    /// Blocks until `check` yields a value. `check` runs with the gate held,
    /// so a `bump` cannot slip in between a failed check and the wait.
    fn wait_until<T>(&self, mut check: impl FnMut() -> Option<T>) -> T {
        let mut generation = lock(&self.generation);
        loop {
            if let Some(value) = check() {
                return value;
            }
            generation = self
                .changed
                .wait(generation)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// The projects list.
pub struct ProjectsList {
    handle: Handle,
    loader: Arc<dyn ProjectLoader>,
    store: SharedStore,
    observer: Arc<dyn ListObserver>,
    items: Arc<RwLock<Vec<ProjectListItem>>>,
    settle: Arc<SettleGate>,
    workers: WorkerPool,
    pending_drops: Mutex<Vec<ProjectListItem>>,
    /// Held from the index check through the end notification of a change.
    mutation: Mutex<()>,
}

impl std::fmt::Debug for ProjectsList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectsList")
            .field("items", &*read(&self.items))
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl ProjectsList {
    /// Creates an empty list. Items are constructed with `loader` on
    /// `handle`'s blocking threads and saved into `store`.
    #[must_use]
    pub fn new(handle: &Handle, loader: Arc<dyn ProjectLoader>, store: SharedStore) -> Self {
        Self {
            handle: handle.clone(),
            loader,
            store,
            observer: Arc::new(NoopObserver),
            items: Arc::new(RwLock::new(Vec::new())),
            settle: Arc::new(SettleGate::default()),
            workers: WorkerPool::single(handle, "projects-list"),
            pending_drops: Mutex::new(Vec::new()),
            mutation: Mutex::new(()),
        }
    }

    /// Replaces the change observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ListObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        read(&self.items).len()
    }

    /// The item at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ProjectListItem> {
        read(&self.items).get(index).cloned()
    }

    /// Snapshot of all items in display order.
    #[must_use]
    pub fn items(&self) -> Vec<ProjectListItem> {
        read(&self.items).clone()
    }

    /// Current index of `item`, if it is still listed.
    #[must_use]
    pub fn index_of(&self, item: &ProjectListItem) -> Option<usize> {
        read(&self.items)
            .iter()
            .position(|listed| listed.ptr_eq(item))
    }

    /// Index of the first item `candidate` duplicates.
    ///
    /// An item matches when its project is the same file as `candidate`, or
    /// when its displayed name equals `candidate`. Items that are still
    /// loading only match by name, so adding the same path twice before the
    /// first one finished loading lists it twice.
    #[must_use]
    pub fn duplicate_index(&self, candidate: &str) -> Option<usize> {
        read(&self.items).iter().position(|item| {
            let same_file = item
                .project()
                .is_some_and(|project| is_same_file(project.path(), Path::new(candidate)));
            same_file || item.name() == candidate
        })
    }

    /// Adds one project, or returns the already listed one.
    ///
    /// For a duplicate, non-empty `options.parameters` are forwarded to the
    /// existing project's config and [`ListObserver::go_to_project`] is
    /// emitted. Never saves.
    pub fn add_list_item(
        &self,
        path: &str,
        options: AddOptions,
        on_initialized: Option<InitializedCallback>,
    ) -> ProjectListItem {
        self.process_deferred_deletes();

        if let Some((index, existing)) = self
            .duplicate_index(path)
            .and_then(|index| self.get(index).map(|item| (index, item)))
        {
            warn!(path, index, "This project is already in the list");
            if !options.parameters.is_empty() {
                existing.run(SAVE_CONFIG_ACTION, vec![Value::Object(options.parameters)]);
            }
            self.observer.go_to_project(index);
            return existing;
        }

        let mut args = options.args;
        match args.first_mut() {
            Some(first) => *first = path.to_string(),
            None => args.push(path.to_string()),
        }
        let spec = ProjectSpec {
            args,
            parameters: options.parameters,
        };

        let item = ProjectListItem::spawn(
            &self.handle,
            Arc::clone(&self.loader),
            spec,
            options.from_startup,
        );
        let settle = Arc::clone(&self.settle);
        item.on_initialized(move |_| settle.bump());
        if let Some(callback) = on_initialized {
            item.on_initialized(callback);
        }

        let mutation = lock(&self.mutation);
        let index = self.row_count();
        self.observer.begin_insert_rows(index, index);
        write(&self.items).push(item.clone());
        self.observer.end_insert_rows();
        drop(mutation);
        debug!(path, index, id = %item.id(), "Added project");

        item
    }

    /// Adds every accepted entry of `paths`, then saves once.
    ///
    /// Entries may be `file:` URIs or plain paths; anything else is skipped
    /// with a warning.
    pub fn add_projects_by_paths<S: AsRef<str>>(&self, paths: &[S]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if paths.is_empty() {
            warn!("No paths were given");
            return outcome;
        }

        for raw in paths {
            let raw = raw.as_ref();
            match classify_path_input(raw).into_path() {
                Ok(path) => {
                    let item = self.add_list_item(&path, AddOptions::default(), None);
                    outcome.added.push(item);
                }
                Err(reason) => {
                    warn!(input = raw, %reason, "Skipping path");
                    outcome.skipped.push(SkippedPath {
                        input: raw.to_string(),
                        reason,
                    });
                }
            }
        }

        outcome.save = Some(self.save_in_settings());
        outcome
    }

    /// Adds every project stored in the settings, marked as `from_startup`.
    pub fn restore_from_settings(&self) -> Vec<ProjectListItem> {
        let paths = read_project_paths(&mut *lock(&self.store));
        info!(count = paths.len(), "Restoring projects from Settings");
        paths
            .iter()
            .map(|path| {
                self.add_list_item(
                    path,
                    AddOptions {
                        from_startup: true,
                        ..AddOptions::default()
                    },
                    None,
                )
            })
            .collect()
    }

    /// Removes the item at `index`. Out of range indices are ignored.
    ///
    /// Returns the save scheduled when the removed item was initialized or
    /// restored at startup.
    pub fn remove_project(&self, index: usize) -> Option<JobHandle> {
        self.process_deferred_deletes();

        let mutation = lock(&self.mutation);
        if index >= self.row_count() {
            return None;
        }
        self.observer.begin_remove_rows(index, index);
        let removed = write(&self.items).remove(index);
        self.observer.end_remove_rows();
        drop(mutation);

        // A pending save may be waiting on this item.
        self.settle.bump();

        let needs_save = removed.is_initialized() || removed.from_startup();
        debug!(index, id = %removed.id(), needs_save, "Removed project");
        lock(&self.pending_drops).push(removed);

        needs_save.then(|| self.save_in_settings())
    }

    /// Releases items removed earlier. Also runs at the start of every
    /// mutation.
    pub fn process_deferred_deletes(&self) -> usize {
        let dropped = std::mem::take(&mut *lock(&self.pending_drops));
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            debug!(count, "Released removed projects");
        }
        count
    }

    /// Asks the view to focus the project at `index`.
    pub fn go_to_project(&self, index: usize) {
        self.observer.go_to_project(index);
    }

    /// Queues a save of the successfully constructed projects.
    pub fn save_in_settings(&self) -> JobHandle {
        let items = Arc::clone(&self.items);
        let settle = Arc::clone(&self.settle);
        let store = Arc::clone(&self.store);

        self.workers.start(move || {
            let snapshot = settle.wait_until(|| {
                let items = read(&items);
                (!items.iter().any(ProjectListItem::is_loading)).then(|| items.clone())
            });

            let paths: Vec<PathBuf> = snapshot
                .iter()
                .filter_map(ProjectListItem::project)
                .map(|project| project.path().to_path_buf())
                .collect();

            write_project_paths(&mut *lock(&store), &paths);
        })
    }

    /// Waits for every item to finish construction.
    pub async fn wait_initialized(&self) {
        for item in self.items() {
            item.initialized().await;
        }
    }

    /// Waits for every queued save.
    pub async fn wait_for_saves(&self) {
        self.workers.wait_for_done().await;
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
