//! One entry of the projects list.
//!
//! A [`ProjectListItem`] is cheap to create: it immediately reads
//! `"Loading..."` while the actual project is constructed on a blocking
//! thread. Construction resolves exactly once, either into a ready
//! [`Project`] or into an error state that keeps the entry visible.
//!
//! Completion is observable three ways:
//!
//! - callbacks registered with [`on_initialized`](ProjectListItem::on_initialized),
//!   which run immediately if the item has already resolved
//! - [`initialized`](ProjectListItem::initialized), an awaitable
//! - [`ItemEvent::Initialized`] on the [`subscribe`](ProjectListItem::subscribe) channel
//!
//! Actions submitted through [`run`](ProjectListItem::run) are queued on the
//! item's own single-worker pool. They wait for construction first, run one at
//! a time, and a failed action drops the rest of the queue.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::pool::{JobHandle, WorkerPool};
use crate::project::{ActionError, LoadError, Project, ProjectLoader, ProjectSpec};
use crate::stage::ProjectState;
use crate::utils::locks::lock;

/// Name and stage shown while a project is being constructed.
pub const LOADING_NAME: &str = "Loading...";

/// Stage shown for a project that failed to construct.
pub const INIT_ERROR_STAGE: &str = "Initializing error";

/// Name shown for a failed project that was given no path.
pub const UNDEFINED_NAME: &str = "Undefined";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identifier of one list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notifications emitted by a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// Construction finished.
    Initialized { success: bool },
    /// An action began executing.
    ActionStarted { action: String },
    /// An action finished.
    ActionDone { action: String, success: bool },
}

/// What the front-end should render for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Loading,
    InitError,
    Project(ProjectState),
}

/// Callback invoked once construction has resolved.
pub type InitializedCallback = Box<dyn FnOnce(ProjectId) + Send + 'static>;

#[derive(Clone)]
enum Status {
    Loading,
    Failed { error: String },
    Ready(Arc<dyn Project>),
}

struct ItemShared {
    id: ProjectId,
    from_startup: bool,
    args: Vec<String>,
    status: Mutex<Status>,
    /// `None` once construction resolved and callbacks were drained.
    callbacks: Mutex<Option<Vec<InitializedCallback>>>,
    resolved: watch::Sender<bool>,
    events: broadcast::Sender<ItemEvent>,
    actions: WorkerPool,
    action_running: AtomicBool,
}

impl ItemShared {
    fn status(&self) -> Status {
        lock(&self.status).clone()
    }

    fn resolve(&self, outcome: Result<Arc<dyn Project>, LoadError>) {
        let success = match outcome {
            Ok(project) => {
                info!(path = %project.path().display(), "Project initialized");
                *lock(&self.status) = Status::Ready(project);
                true
            }
            Err(e) => {
                warn!(error = %e, "Project failed to initialize");
                *lock(&self.status) = Status::Failed {
                    error: e.to_string(),
                };
                false
            }
        };

        let callbacks = lock(&self.callbacks).take().unwrap_or_default();
        for callback in callbacks {
            fire(callback, self.id);
        }

        // Queued actions wake on `resolved`; the event must already be out.
        let _ = self.events.send(ItemEvent::Initialized { success });
        self.resolved.send_replace(true);
    }

    fn wait_resolved_blocking(&self) {
        let mut resolved = self.resolved.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = futures::executor::block_on(resolved.wait_for(|done| *done));
    }

    fn run_action(&self, action: &str, args: &[Value]) {
        self.wait_resolved_blocking();

        let result = match self.status() {
            Status::Ready(project) => {
                self.action_running.store(true, Ordering::Release);
                let _ = self.events.send(ItemEvent::ActionStarted {
                    action: action.to_string(),
                });
                let result = project.run(action, args);
                self.action_running.store(false, Ordering::Release);
                result
            }
            Status::Loading | Status::Failed { .. } => Err(ActionError::NotInitialized),
        };

        let success = match result {
            Ok(()) => {
                debug!(action, "Action finished");
                true
            }
            Err(e) => {
                warn!(action, error = %e, "Action failed");
                let dropped = self.actions.clear();
                if dropped > 0 {
                    debug!(action, dropped, "Dropped queued actions after failure");
                }
                false
            }
        };

        let _ = self.events.send(ItemEvent::ActionDone {
            action: action.to_string(),
            success,
        });
    }
}

/// Runs one completion callback. A panicking callback is logged and does not
/// keep the item from resolving.
fn fire(callback: InitializedCallback, id: ProjectId) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(id))).is_err() {
        error!(%id, "on_initialized callback panicked");
    }
}

/// Handle to one list entry. Clones refer to the same entry.
#[derive(Clone)]
pub struct ProjectListItem {
    shared: Arc<ItemShared>,
}

impl fmt::Debug for ProjectListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectListItem")
            .field("id", &self.shared.id)
            .field("name", &self.name())
            .field("from_startup", &self.shared.from_startup)
            .finish()
    }
}

impl ProjectListItem {
    /// Creates an item and starts constructing its project on `handle`.
    #[must_use]
    pub fn spawn(
        handle: &Handle,
        loader: Arc<dyn ProjectLoader>,
        spec: ProjectSpec,
        from_startup: bool,
    ) -> Self {
        let id = ProjectId::new();
        let (resolved, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(ItemShared {
            id,
            from_startup,
            args: spec.args.clone(),
            status: Mutex::new(Status::Loading),
            callbacks: Mutex::new(Some(Vec::new())),
            resolved,
            events,
            actions: WorkerPool::single(handle, format!("project-{id}")),
            action_running: AtomicBool::new(false),
        });

        let span = info_span!("project", %id, path = spec.path().unwrap_or_default());
        let worker = Arc::clone(&shared);
        handle.spawn_blocking(move || {
            let _entered = span.enter();
            debug!(from_startup, "Constructing project");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&spec)))
                .unwrap_or_else(|_| Err(LoadError::Other("project loader panicked".to_string())));
            worker.resolve(outcome);
        });

        Self { shared }
    }

    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.shared.id
    }

    /// Whether the entry was restored from the settings at startup.
    #[must_use]
    pub fn from_startup(&self) -> bool {
        self.shared.from_startup
    }

    /// Display name. See [`LOADING_NAME`] and [`UNDEFINED_NAME`].
    #[must_use]
    pub fn name(&self) -> String {
        match self.shared.status() {
            Status::Loading => LOADING_NAME.to_string(),
            Status::Failed { .. } => self
                .shared
                .args
                .first()
                .cloned()
                .unwrap_or_else(|| UNDEFINED_NAME.to_string()),
            Status::Ready(project) => project.name(),
        }
    }

    /// The constructed project, if construction succeeded.
    #[must_use]
    pub fn project(&self) -> Option<Arc<dyn Project>> {
        match self.shared.status() {
            Status::Ready(project) => Some(project),
            Status::Loading | Status::Failed { .. } => None,
        }
    }

    /// The construction error, if construction failed.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        match self.shared.status() {
            Status::Failed { error } => Some(error),
            Status::Loading | Status::Ready(_) => None,
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.shared.status(), Status::Loading)
    }

    /// Whether construction succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(self.shared.status(), Status::Ready(_))
    }

    /// Human readable stage.
    #[must_use]
    pub fn stage(&self) -> String {
        match self.shared.status() {
            Status::Loading => LOADING_NAME.to_string(),
            Status::Failed { .. } => INIT_ERROR_STAGE.to_string(),
            Status::Ready(project) => project.state().current_stage().to_string(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ItemState {
        match self.shared.status() {
            Status::Loading => ItemState::Loading,
            Status::Failed { .. } => ItemState::InitError,
            Status::Ready(project) => ItemState::Project(project.state()),
        }
    }

    /// Whether an action is executing right now.
    #[must_use]
    pub fn action_running(&self) -> bool {
        self.shared.action_running.load(Ordering::Acquire)
    }

    /// Registers `callback` to run once construction resolves. Runs it right
    /// away, on the calling thread, if that already happened.
    pub fn on_initialized<F>(&self, callback: F)
    where
        F: FnOnce(ProjectId) + Send + 'static,
    {
        let mut callbacks = lock(&self.shared.callbacks);
        if let Some(pending) = callbacks.as_mut() {
            pending.push(Box::new(callback));
            return;
        }
        drop(callbacks);
        fire(Box::new(callback), self.shared.id);
    }

    /// Waits for construction and returns whether it succeeded.
    pub async fn initialized(&self) -> bool {
        let mut resolved = self.shared.resolved.subscribe();
        let _ = resolved.wait_for(|done| *done).await;
        self.is_initialized()
    }

    /// Subscribes to this item's events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.shared.events.subscribe()
    }

    /// Queues `action` behind the item's earlier actions.
    ///
    /// The action waits for construction. If construction failed the action
    /// fails with [`ActionError::NotInitialized`]. The handle resolves to
    /// `false` only when the job was dropped from the queue before it started.
    pub fn run(&self, action: impl Into<String>, args: Vec<Value>) -> JobHandle {
        let action = action.into();
        let shared = Arc::clone(&self.shared);
        let span = info_span!("project", id = %shared.id, action = %action);
        self.shared.actions.start(move || {
            let _entered = span.enter();
            shared.run_action(&action, &args);
        })
    }

    /// Waits until every queued action has finished.
    pub async fn wait_for_actions(&self) {
        self.shared.actions.wait_for_done().await;
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
