//! Integration tests for the projects list.
//!
//! These tests drive a [`ProjectsList`] with a scripted loader (projects can
//! be held in the loading state or made to fail) and a settings store that
//! records every flushed projects array.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use stm32pio_gui::item::ProjectId;
use stm32pio_gui::list::{AddOptions, ProjectsList};
use stm32pio_gui::observer::{ChannelObserver, ListEvent};
use stm32pio_gui::persist::{read_project_paths, write_project_paths};
use stm32pio_gui::project::{
    board_parameters, ActionError, LoadError, Project, ProjectLoader, ProjectSpec,
};
use stm32pio_gui::settings::{Settings, SettingsStore, SharedStore, StoreError};
use stm32pio_gui::stage::ProjectState;
use stm32pio_gui::utils::SkipReason;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

// =============================================================================
// Test Helpers
// =============================================================================

type ActionLog = Arc<Mutex<Vec<(String, String, Vec<Value>)>>>;

struct FakeProject {
    path: PathBuf,
    actions: ActionLog,
}

impl Project for FakeProject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> ProjectState {
        ProjectState::default()
    }

    fn run(&self, action: &str, args: &[Value]) -> Result<(), ActionError> {
        self.actions
            .lock()
            .unwrap()
            .push((self.name(), action.to_string(), args.to_vec()));
        Ok(())
    }
}

/// Builds a [`FakeProject`] for every existing path. Paths whose file name
/// starts with `broken` fail, gated paths wait until released.
#[derive(Default)]
struct FakeLoader {
    gates: Mutex<HashMap<String, mpsc::Receiver<()>>>,
    actions: ActionLog,
}

impl FakeLoader {
    fn gate(&self, path: &str) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.gates.lock().unwrap().insert(path.to_string(), rx);
        tx
    }
}

impl ProjectLoader for FakeLoader {
    fn load(&self, spec: &ProjectSpec) -> Result<Arc<dyn Project>, LoadError> {
        let raw = spec.path().ok_or(LoadError::MissingPath)?;

        let gate = self.gates.lock().unwrap().remove(raw);
        if let Some(gate) = gate {
            gate.recv().ok();
        }

        let path = fs::canonicalize(raw).map_err(|source| LoadError::Resolve {
            path: PathBuf::from(raw),
            source,
        })?;
        let broken = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("broken"));
        if broken {
            return Err(LoadError::Other(format!("{raw} is broken")));
        }

        Ok(Arc::new(FakeProject {
            path,
            actions: Arc::clone(&self.actions),
        }))
    }
}

/// Settings store that records the projects array on every flush.
struct RecordingStore {
    inner: Settings,
    writes: Arc<Mutex<Vec<Vec<String>>>>,
}

impl SettingsStore for RecordingStore {
    fn begin_group(&mut self, prefix: &str) {
        self.inner.begin_group(prefix);
    }

    fn end_group(&mut self) {
        self.inner.end_group();
    }

    fn remove(&mut self, key: &str) {
        self.inner.remove(key);
    }

    fn begin_write_array(&mut self, prefix: &str) {
        self.inner.begin_write_array(prefix);
    }

    fn begin_read_array(&mut self, prefix: &str) -> usize {
        self.inner.begin_read_array(prefix)
    }

    fn set_array_index(&mut self, index: usize) {
        self.inner.set_array_index(index);
    }

    fn set_value(&mut self, key: &str, value: Value) {
        self.inner.set_value(key, value);
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.inner.value(key)
    }

    fn end_array(&mut self) {
        self.inner.end_array();
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        let saved = read_project_paths(&mut self.inner);
        self.writes.lock().unwrap().push(saved);
        Ok(())
    }
}

struct Harness {
    list: ProjectsList,
    loader: Arc<FakeLoader>,
    store: Arc<Mutex<RecordingStore>>,
    writes: Arc<Mutex<Vec<Vec<String>>>>,
    events: UnboundedReceiver<ListEvent>,
    root: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(Settings::in_memory())
    }

    fn with_settings(inner: Settings) -> Self {
        let loader = Arc::new(FakeLoader::default());
        let writes = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(Mutex::new(RecordingStore {
            inner,
            writes: Arc::clone(&writes),
        }));
        let shared: SharedStore = store.clone();
        let (observer, events) = ChannelObserver::new();

        let list = ProjectsList::new(&Handle::current(), loader.clone(), shared)
            .with_observer(Arc::new(observer));

        Self {
            list,
            loader,
            store,
            writes,
            events,
            root: tempfile::tempdir().expect("temp dir"),
        }
    }

    /// Creates a project directory and returns its path.
    fn project(&self, name: &str) -> String {
        let path = self.root.path().join(name);
        fs::create_dir_all(&path).expect("create project dir");
        path.to_string_lossy().into_owned()
    }

    fn canonical(&self, name: &str) -> String {
        fs::canonicalize(self.root.path().join(name))
            .expect("canonical path")
            .to_string_lossy()
            .into_owned()
    }

    fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().unwrap().clone()
    }

    fn drain_events(&mut self) -> Vec<ListEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

// =============================================================================
// Dedup
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn adding_the_same_path_twice_keeps_one_item_and_navigates() {
    let mut harness = Harness::new();
    let alpha = harness.project("alpha");

    let first = harness.list.add_list_item(&alpha, AddOptions::default(), None);
    assert!(first.initialized().await);

    let second = harness
        .list
        .add_list_item(&format!("{alpha}/."), AddOptions::default(), None);

    assert_eq!(harness.list.row_count(), 1);
    assert_eq!(first.id(), second.id());
    assert_eq!(
        harness.drain_events(),
        vec![
            ListEvent::BeginInsertRows { first: 0, last: 0 },
            ListEvent::EndInsertRows,
            ListEvent::GoToProject { index: 0 },
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_index_matches_failed_items_by_name() {
    let harness = Harness::new();
    let broken = harness.project("broken-one");

    let item = harness.list.add_list_item(&broken, AddOptions::default(), None);
    assert!(!item.initialized().await);

    assert_eq!(harness.list.duplicate_index(&broken), Some(0));
    assert_eq!(harness.list.duplicate_index("/somewhere/else"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_with_parameters_forwards_them_to_the_project() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");

    let item = harness.list.add_list_item(&alpha, AddOptions::default(), None);
    assert!(item.initialized().await);

    harness.list.add_list_item(
        &alpha,
        AddOptions {
            parameters: board_parameters("nucleo_f031k6"),
            ..AddOptions::default()
        },
        None,
    );
    item.wait_for_actions().await;

    let actions = harness.loader.actions.lock().unwrap().clone();
    assert_eq!(
        actions,
        vec![(
            "alpha".to_string(),
            "save_config".to_string(),
            vec![json!({"project": {"board": "nucleo_f031k6"}})]
        )]
    );
}

/// While the first add is still loading its name is the sentinel, so the
/// same path string is not recognized and gets listed again.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_path_added_while_loading_is_listed_twice() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let gate = harness.loader.gate(&alpha);

    harness.list.add_list_item(&alpha, AddOptions::default(), None);
    harness.list.add_list_item(&alpha, AddOptions::default(), None);
    gate.send(()).unwrap();

    assert_eq!(harness.list.row_count(), 2);
    harness.list.wait_initialized().await;
}

// =============================================================================
// Ordering and Access
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn items_keep_insertion_order() {
    let harness = Harness::new();
    let names = ["one", "two", "three", "four", "five"];

    let added: Vec<_> = names
        .iter()
        .map(|name| {
            let path = harness.project(name);
            harness.list.add_list_item(&path, AddOptions::default(), None)
        })
        .collect();
    harness.list.wait_initialized().await;

    for (index, item) in added.iter().enumerate() {
        let listed = harness.list.get(index).expect("listed");
        assert_eq!(listed.id(), item.id());
        assert_eq!(listed.name(), names[index]);
    }
    assert!(harness.list.get(names.len()).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn on_initialized_callback_receives_the_item_id() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let (tx, rx) = mpsc::channel();

    let item = harness.list.add_list_item(
        &alpha,
        AddOptions::default(),
        Some(Box::new(move |id: ProjectId| tx.send(id).unwrap())),
    );

    let id = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("callback fired");
    assert_eq!(id, item.id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_callback_still_lets_the_list_settle() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");

    let item = harness.list.add_list_item(
        &alpha,
        AddOptions::default(),
        Some(Box::new(|_: ProjectId| panic!("callback bug"))),
    );
    let action = item.run("save_config", Vec::new());

    tokio::time::timeout(Duration::from_secs(5), harness.list.wait_initialized())
        .await
        .expect("list should settle");
    assert!(item.is_initialized());
    assert!(tokio::time::timeout(Duration::from_secs(5), action.wait())
        .await
        .expect("queued action should run"));
    assert!(tokio::time::timeout(Duration::from_secs(5), harness.list.save_in_settings().wait())
        .await
        .expect("save should not hang"));
    assert_eq!(harness.writes(), vec![vec![harness.canonical("alpha")]]);
}

// =============================================================================
// Saving
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_waits_until_nothing_is_loading() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let beta = harness.project("beta");
    let gate = harness.loader.gate(&beta);

    harness.list.add_list_item(&alpha, AddOptions::default(), None);
    harness.list.add_list_item(&beta, AddOptions::default(), None);
    harness.list.save_in_settings();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.writes().is_empty(), "save must wait for beta");

    gate.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), harness.list.wait_for_saves())
        .await
        .expect("save should finish once beta resolved");

    assert_eq!(
        harness.writes(),
        vec![vec![harness.canonical("alpha"), harness.canonical("beta")]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_skips_failed_projects() {
    let harness = Harness::new();
    for name in ["alpha", "broken-beta", "gamma"] {
        let path = harness.project(name);
        harness.list.add_list_item(&path, AddOptions::default(), None);
    }

    assert!(harness.list.save_in_settings().wait().await);

    assert_eq!(
        harness.writes(),
        vec![vec![harness.canonical("alpha"), harness.canonical("gamma")]]
    );
    assert_eq!(harness.list.row_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_a_loading_item_unblocks_a_pending_save() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let beta = harness.project("beta");
    let _gate = harness.loader.gate(&beta);

    harness.list.add_list_item(&alpha, AddOptions::default(), None);
    harness.list.add_list_item(&beta, AddOptions::default(), None);
    let save = harness.list.save_in_settings();

    assert!(harness.list.remove_project(1).is_none());

    assert!(tokio::time::timeout(Duration::from_secs(5), save.wait())
        .await
        .expect("save should not wait for a removed item"));
    assert_eq!(harness.writes(), vec![vec![harness.canonical("alpha")]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_saves_are_applied_in_order() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let beta = harness.project("beta");

    harness.list.add_list_item(&alpha, AddOptions::default(), None);
    let first = harness.list.save_in_settings();
    harness.list.add_list_item(&beta, AddOptions::default(), None);
    let second = harness.list.save_in_settings();

    assert!(first.wait().await);
    assert!(second.wait().await);

    let writes = harness.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(
        writes.last().unwrap(),
        &vec![harness.canonical("alpha"), harness.canonical("beta")]
    );

    let stored = read_project_paths(&mut harness.store.lock().unwrap().inner);
    assert_eq!(stored, *writes.last().unwrap());
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_an_unsaved_item_does_not_save() {
    let mut harness = Harness::new();
    let broken = harness.project("broken-one");

    let item = harness.list.add_list_item(&broken, AddOptions::default(), None);
    assert!(!item.initialized().await);

    assert!(harness.list.remove_project(0).is_none());
    harness.list.wait_for_saves().await;

    assert!(harness.writes().is_empty());
    assert_eq!(harness.list.row_count(), 0);
    assert_eq!(
        harness.drain_events(),
        vec![
            ListEvent::BeginInsertRows { first: 0, last: 0 },
            ListEvent::EndInsertRows,
            ListEvent::BeginRemoveRows { first: 0, last: 0 },
            ListEvent::EndRemoveRows,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_a_startup_item_saves_once() {
    let harness = Harness::new();
    let broken = harness.project("broken-restored");

    let item = harness.list.add_list_item(
        &broken,
        AddOptions {
            from_startup: true,
            ..AddOptions::default()
        },
        None,
    );
    assert!(!item.initialized().await);

    let save = harness.list.remove_project(0).expect("save scheduled");
    assert!(save.wait().await);
    harness.list.wait_for_saves().await;

    assert_eq!(harness.writes(), vec![Vec::<String>::new()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_an_initialized_item_saves_the_rest() {
    let harness = Harness::new();
    for name in ["alpha", "beta"] {
        let path = harness.project(name);
        harness.list.add_list_item(&path, AddOptions::default(), None);
    }
    harness.list.wait_initialized().await;

    let save = harness.list.remove_project(0).expect("save scheduled");
    assert!(save.wait().await);

    assert_eq!(harness.writes(), vec![vec![harness.canonical("beta")]]);
    assert_eq!(harness.list.process_deferred_deletes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_removals_of_the_last_row_notify_once() {
    let mut harness = Harness::new();
    let broken = harness.project("broken-shared");
    let item = harness.list.add_list_item(&broken, AddOptions::default(), None);
    assert!(!item.initialized().await);
    harness.drain_events();

    let list = &harness.list;
    let barrier = &Barrier::new(4);
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(move || {
                barrier.wait();
                assert!(list.remove_project(0).is_none());
            });
        }
    });

    assert_eq!(harness.list.row_count(), 0);
    assert_eq!(
        harness.drain_events(),
        vec![
            ListEvent::BeginRemoveRows { first: 0, last: 0 },
            ListEvent::EndRemoveRows,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_out_of_range_emits_nothing() {
    let mut harness = Harness::new();

    assert!(harness.list.remove_project(0).is_none());
    assert!(harness.drain_events().is_empty());
}

// =============================================================================
// Batch Add
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_add_saves_once() {
    let harness = Harness::new();
    let paths: Vec<String> = ["p1", "p2", "p3"]
        .iter()
        .map(|name| harness.project(name))
        .collect();

    let outcome = harness.list.add_projects_by_paths(&paths);
    assert_eq!(outcome.added.len(), 3);
    assert!(outcome.skipped.is_empty());

    assert!(outcome.save.expect("save scheduled").wait().await);
    harness.list.wait_for_saves().await;

    assert_eq!(
        harness.writes(),
        vec![vec![
            harness.canonical("p1"),
            harness.canonical("p2"),
            harness.canonical("p3")
        ]]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_add_decodes_file_uris() {
    let harness = Harness::new();
    let alpha = harness.project("alpha");
    let uri = url::Url::from_file_path(&alpha).expect("absolute path").to_string();

    let outcome = harness.list.add_projects_by_paths(&[uri]);
    assert_eq!(outcome.added.len(), 1);
    assert!(outcome.added[0].initialized().await);
    assert_eq!(outcome.added[0].name(), "alpha");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_batch_entries_are_skipped() {
    let harness = Harness::new();

    let outcome = harness
        .list
        .add_projects_by_paths(&["", "not a real scheme://x", "https://example.com/p"]);

    assert!(outcome.added.is_empty());
    assert_eq!(harness.list.row_count(), 0);
    assert_eq!(outcome.skipped.len(), 3);
    assert_eq!(outcome.skipped[0].reason, SkipReason::Empty);
    assert!(matches!(
        outcome.skipped[1].reason,
        SkipReason::Malformed { .. }
    ));
    assert_eq!(
        outcome.skipped[2].reason,
        SkipReason::NonLocal {
            scheme: "https".to_string()
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_batch_adds_and_saves_nothing() {
    let harness = Harness::new();
    let paths: [&str; 0] = [];

    let outcome = harness.list.add_projects_by_paths(&paths);
    harness.list.wait_for_saves().await;

    assert!(outcome.save.is_none());
    assert!(harness.writes().is_empty());
}

// =============================================================================
// Restore
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restored_items_come_from_settings() {
    let root = tempfile::tempdir().expect("temp dir");
    let alpha = root.path().join("alpha");
    fs::create_dir(&alpha).unwrap();

    let mut settings = Settings::in_memory();
    write_project_paths(&mut settings, &[alpha.clone(), root.path().join("gone")]);

    let harness = Harness::with_settings(settings);
    let restored = harness.list.restore_from_settings();
    harness.list.wait_initialized().await;

    assert_eq!(restored.len(), 2);
    assert!(restored.iter().all(|item| item.from_startup()));
    assert!(restored[0].is_initialized());
    assert!(!restored[1].is_initialized());
    assert!(harness.writes().is_empty(), "restoring never saves");
}
