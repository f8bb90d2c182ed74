//! Scoped tracing: a tree of segments tied to the executing logical task,
//! propagated across cooperative suspension via task-local storage.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static CURRENT: Scope;
}

/// One enter/exit event recorded for a finished scope.
#[derive(Debug, Clone)]
pub struct ScopeEvent {
    pub uid: String,
    pub parent_uid: Option<String>,
    pub name: String,
    pub correlation_ids: Vec<String>,
    pub attributes: HashMap<String, String>,
    pub wall_start: SystemTime,
    pub monotonic_elapsed: Duration,
    pub error: Option<String>,
}

/// A single node in the scope tree. Cloning a `Scope` clones its
/// identity and accumulated data up to that point, but each clone's
/// `branch` independently extends the tree — scopes never merge.
#[derive(Debug, Clone)]
pub struct Scope {
    uid: String,
    parent_uid: Option<String>,
    name: String,
    correlation_ids: Vec<String>,
    attributes: HashMap<String, String>,
    wall_start: SystemTime,
    monotonic_start: Instant,
}

impl Scope {
    /// Create a new root scope. Most callers should prefer `branch` off an
    /// ambient current scope; this is for establishing the very first one.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            parent_uid: None,
            name: name.into(),
            correlation_ids: Vec::new(),
            attributes: HashMap::new(),
            wall_start: SystemTime::now(),
            monotonic_start: Instant::now(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn correlation_ids(&self) -> &[String] {
        &self.correlation_ids
    }

    /// Add a correlation id inherited by every future child of this scope.
    pub fn add_correlation_id(&mut self, id: impl Into<String>) {
        self.correlation_ids.push(id.into());
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Open a child scope carrying this scope's correlation ids forward.
    pub fn branch(&self, name: impl Into<String>, id: Option<String>, attrs: HashMap<String, String>) -> Self {
        Self {
            uid: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            parent_uid: Some(self.uid.clone()),
            name: name.into(),
            correlation_ids: self.correlation_ids.clone(),
            attributes: attrs,
            wall_start: SystemTime::now(),
            monotonic_start: Instant::now(),
        }
    }

    fn finish(&self, error: Option<String>) -> ScopeEvent {
        ScopeEvent {
            uid: self.uid.clone(),
            parent_uid: self.parent_uid.clone(),
            name: self.name.clone(),
            correlation_ids: self.correlation_ids.clone(),
            attributes: self.attributes.clone(),
            wall_start: self.wall_start,
            monotonic_elapsed: self.monotonic_start.elapsed(),
            error,
        }
    }

    /// The scope installed as "current" for the executing task, if any.
    /// Cooperative suspension (`.await`) does not clear task-local
    /// storage, so this observes the same scope before and after a yield.
    pub fn current() -> Option<Scope> {
        CURRENT.try_with(|s| s.clone()).ok()
    }

    /// Run `fut` with `self` installed as the current scope for its task.
    pub async fn scope<F, T>(self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        CURRENT.scope(self, fut).await
    }
}

/// RAII-ish accumulator that turns a finished `Scope` into a `ScopeEvent`
/// on demand; kept separate from `Scope` so `perform` can attach an error
/// without needing `&mut` access to the ambient copy.
pub struct ScopeGuard {
    scope: Scope,
}

impl ScopeGuard {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn finish(&self, error: Option<String>) -> ScopeEvent {
        self.scope.finish(error)
    }
}

/// Run `f` within a branch of the current (or a fresh root) scope,
/// recording and re-raising any error it returns, and always emitting a
/// finish event regardless of outcome.
pub async fn perform<F, Fut, T, E>(name: impl Into<String>, f: F) -> (Result<T, E>, ScopeEvent)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let parent = Scope::current().unwrap_or_else(|| Scope::root("root"));
    let child = parent.branch(name, None, HashMap::new());
    let guard = ScopeGuard::new(child.clone());
    let result = child.scope(f()).await;
    let event = match &result {
        Ok(_) => guard.finish(None),
        Err(e) => guard.finish(Some(e.to_string())),
    };
    (result, event)
}
