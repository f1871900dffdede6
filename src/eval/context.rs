use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::action::execute_actions;
use super::error::{EvalError, ExecutionLog};
use super::path::{PathSegment, TemplatePath};
use super::template::Action;
use super::value::{Value, ValueMap};
use crate::generate::{GenerateInputs, generate_response};
use crate::handler::RequestHandler;
use crate::hooks::Hooks;
use crate::request::GenericRequest;
use crate::response::{GenericResponse, PaginationType};
use crate::{InternalResult, Secrets};

/// Key of the current-value slot.
pub const CURRENT: &str = "";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Attempted to access value \"{key}\" but that value was never set")]
    MissingValue { key: String },
    #[error("The value saved under the key \"{key}\" is still resolving")]
    PendingValue { key: String },
    #[error(
        "The value saved under the key \"{key}\" was changed before the original value (which was pending) finished resolving"
    )]
    StaleWrite { key: String },
    #[error("Pending value task failed: {0}")]
    Task(String),
}

/// Read-only description of the request handler a query runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerInfo {
    pub id: String,
    pub display_name: String,
    pub pagination_type: PaginationType,
}

/// Everything a root context is built from.
#[derive(Clone, Debug, Default)]
pub struct ContextInputs {
    pub request: GenericRequest,
    pub secrets: Arc<Secrets>,
    pub handler: Option<HandlerInfo>,
    pub source_id: String,
    pub pagination_type: PaginationType,
    pub page_fetch_limit_reached: Option<bool>,
    pub cache_network_requests: bool,
    pub hooks: Arc<Hooks>,
}

/// State shared by every context of one query. Never mutated after creation,
/// apart from the append-only execution log.
#[derive(Debug)]
pub struct SharedContext {
    inputs: ContextInputs,
    log: ExecutionLog,
}

/// Progress of a value stored with [`ExecutionContext::set_future`].
#[derive(Clone, Debug)]
enum Settlement {
    Pending,
    Resolved(Value),
    Failed,
}

#[derive(Clone, Debug)]
enum Slot {
    Ready(Value),
    /// Shared with every fork taken while the value was still resolving.
    Pending(watch::Receiver<Settlement>),
}

/// Waits for a pending slot. `None` if the write failed.
async fn settled(mut receiver: watch::Receiver<Settlement>) -> Option<Value> {
    match receiver
        .wait_for(|settlement| !matches!(settlement, Settlement::Pending))
        .await
    {
        Ok(settlement) => match &*settlement {
            Settlement::Resolved(value) => Some(value.clone()),
            _ => None,
        },
        Err(_) => None,
    }
}

#[derive(Clone, Debug)]
struct Entry {
    generation: u64,
    slot: Slot,
}

/// Per-branch key/value store. Every write takes a fresh generation so a
/// pending write can tell whether it has been superseded.
#[derive(Debug, Default)]
struct DataStore {
    entries: DashMap<String, Entry>,
    generation: AtomicU64,
}

impl DataStore {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn write(&self, key: &str, slot: Slot) -> u64 {
        let generation = self.next_generation();
        self.entries
            .insert(key.to_string(), Entry { generation, slot });
        generation
    }

    fn copy(&self) -> Self {
        let entries = DashMap::new();
        for entry in self.entries.iter() {
            entries.insert(entry.key().clone(), entry.value().clone());
        }
        Self {
            entries,
            generation: AtomicU64::new(self.generation.load(Ordering::SeqCst)),
        }
    }

    fn from_map(data: ValueMap) -> Self {
        let store = Self::default();
        for (key, value) in data {
            store.write(&key, Slot::Ready(value));
        }
        store
    }

    /// Applies a resolved pending value only if `generation` is still current.
    fn resolve(&self, key: &str, generation: u64, value: Value) -> Result<(), ContextError> {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.generation == generation => {
                entry.slot = Slot::Ready(value);
                Ok(())
            }
            _ => Err(ContextError::StaleWrite {
                key: key.to_string(),
            }),
        }
    }

    fn pending(&self) -> Vec<(String, u64, watch::Receiver<Settlement>)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.value().slot {
                Slot::Pending(receiver) => {
                    Some((entry.key().clone(), entry.value().generation, receiver.clone()))
                }
                Slot::Ready(_) => None,
            })
            .collect()
    }

    /// Replaces a pending slot with its outcome, unless the key was written
    /// again in the meantime. A failed write leaves the key unset.
    fn settle(&self, key: &str, generation: u64, value: Option<Value>) {
        match value {
            Some(value) => {
                if let Some(mut entry) = self.entries.get_mut(key) {
                    if entry.generation == generation {
                        entry.slot = Slot::Ready(value);
                    }
                }
            }
            None => {
                self.entries
                    .remove_if(key, |_, entry| entry.generation == generation);
            }
        }
    }
}

/// Options for [`ExecutionContext::fork`].
#[derive(Clone, Debug, Default)]
pub struct ForkOptions {
    pub path: Option<TemplatePath>,
    pub append_to_path: Vec<PathSegment>,
    pub data: Option<ValueMap>,
}

impl ForkOptions {
    pub fn at(path: TemplatePath) -> Self {
        Self {
            path: Some(path),
            ..Default::default()
        }
    }

    pub fn append(mut self, segment: impl Into<PathSegment>) -> Self {
        self.append_to_path.push(segment.into());
        self
    }

    pub fn with_data(mut self, data: ValueMap) -> Self {
        self.data = Some(data);
        self
    }
}

type PendingTask = JoinHandle<Result<(), EvalError>>;

/// 実行コンテキスト
///
/// Per-branch scope handed to every action. Cloning the struct gives another
/// handle to the *same* branch; [`fork`](Self::fork) gives a new branch with an
/// independent copy of the data store, so sibling branches never observe each
/// other's writes.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<SharedContext>,
    store: Arc<DataStore>,
    path: TemplatePath,
    results: Arc<Mutex<Vec<Option<Value>>>>,
    pending: Arc<Mutex<Vec<PendingTask>>>,
    children: Arc<Mutex<Vec<ExecutionContext>>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .store
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        f.debug_struct("ExecutionContext")
            .field("path", &self.path.to_string())
            .field("keys", &keys)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutionContext {
    /// Creates the root context of a query.
    pub fn new(inputs: ContextInputs) -> Self {
        Self {
            shared: Arc::new(SharedContext {
                inputs,
                log: ExecutionLog::new(),
            }),
            store: Arc::new(DataStore::default()),
            path: TemplatePath::root(),
            results: Arc::default(),
            pending: Arc::default(),
            children: Arc::default(),
        }
    }

    /// Reads `key`; use [`CURRENT`] (`""`) for the current value.
    pub fn get(&self, key: &str) -> Result<Value, ContextError> {
        match self.store.entries.get(key).map(|entry| entry.slot.clone()) {
            Some(Slot::Ready(value)) => Ok(value),
            Some(Slot::Pending(receiver)) => match &*receiver.borrow() {
                Settlement::Resolved(value) => Ok(value.clone()),
                Settlement::Pending => Err(ContextError::PendingValue {
                    key: key.to_string(),
                }),
                Settlement::Failed => Err(ContextError::MissingValue {
                    key: key.to_string(),
                }),
            },
            None => Err(ContextError::MissingValue {
                key: key.to_string(),
            }),
        }
    }

    /// Like [`get`](Self::get), but waits for a value that is still resolving,
    /// including one inherited from the branch this one was forked from.
    pub async fn get_resolved(&self, key: &str) -> Result<Value, ContextError> {
        let entry = self
            .store
            .entries
            .get(key)
            .map(|entry| (entry.generation, entry.slot.clone()));
        match entry {
            Some((_, Slot::Ready(value))) => Ok(value),
            Some((generation, Slot::Pending(receiver))) => {
                let value = settled(receiver).await;
                self.store.settle(key, generation, value.clone());
                value.ok_or_else(|| ContextError::MissingValue {
                    key: key.to_string(),
                })
            }
            None => Err(ContextError::MissingValue {
                key: key.to_string(),
            }),
        }
    }

    /// Shorthand for `get("")`.
    pub fn current(&self) -> Result<Value, ContextError> {
        self.get(CURRENT)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.store.write(key, Slot::Ready(value.into()));
        self
    }

    /// Stores a value that is still being computed.
    ///
    /// The future runs on the tokio runtime straight away. When it completes the
    /// result is stored under `key` only if nothing else was written to `key` in
    /// the meantime; otherwise the task fails with [`ContextError::StaleWrite`],
    /// surfaced by [`wait_for_pending`](Self::wait_for_pending).
    pub fn set_future<F>(&self, key: &str, future: F) -> &Self
    where
        F: Future<Output = Result<Value, EvalError>> + Send + 'static,
    {
        let (sender, receiver) = watch::channel(Settlement::Pending);
        let generation = self.store.write(key, Slot::Pending(receiver));
        let store = self.store.clone();
        let key = key.to_string();
        let task = tokio::spawn(async move {
            let value = match future.await {
                Ok(value) => value,
                Err(error) => {
                    sender.send_replace(Settlement::Failed);
                    return Err(error);
                }
            };
            sender.send_replace(Settlement::Resolved(value.clone()));
            store.resolve(&key, generation, value)?;
            Ok(())
        });
        lock(&self.pending).push(task);
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.entries.contains_key(key)
    }

    /// Snapshot of every settled value in this branch.
    pub fn get_all(&self) -> ValueMap {
        let mut all: Vec<(String, Value)> = self
            .store
            .entries
            .iter()
            .filter_map(|entry| match &entry.value().slot {
                Slot::Ready(value) => Some((entry.key().clone(), value.clone())),
                Slot::Pending(_) => None,
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().collect()
    }

    /// Appends to this branch's result history. `None` records "no result".
    pub fn record_result(&self, result: Option<Value>) {
        lock(&self.results).push(result);
    }

    pub fn last_result(&self) -> Option<Value> {
        lock(&self.results).last().cloned().flatten()
    }

    pub fn result_history(&self) -> Vec<Option<Value>> {
        lock(&self.results).clone()
    }

    /// Waits until every value stored with [`set_future`](Self::set_future) in
    /// this branch has settled, then settles any pending values the branch
    /// inherited when it was forked. Returns the first failure of this branch's
    /// own writes, after all have settled.
    #[tracing::instrument(skip(self), fields(path = %self.path), level = "debug")]
    pub async fn wait_for_pending(&self) -> Result<(), EvalError> {
        let mut first_error = None;
        loop {
            let tasks: Vec<PendingTask> = lock(&self.pending).drain(..).collect();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(ContextError::Task(join_error.to_string()).into()),
                };
                if let Err(error) = outcome {
                    first_error.get_or_insert(error);
                }
            }
        }
        for (key, generation, receiver) in self.store.pending() {
            let value = settled(receiver).await;
            self.store.settle(&key, generation, value);
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Creates an isolated child branch registered as a descendant of this one.
    pub fn fork(&self, options: ForkOptions) -> ExecutionContext {
        let store = match options.data {
            Some(data) => DataStore::from_map(data),
            None => self.store.copy(),
        };
        let path = options
            .path
            .unwrap_or_else(|| self.path.clone())
            .join(&options.append_to_path);
        let child = ExecutionContext {
            shared: self.shared.clone(),
            store: Arc::new(store),
            path,
            results: Arc::default(),
            pending: Arc::default(),
            children: Arc::default(),
        };
        lock(&self.children).push(child.clone());
        child
    }

    /// Every context forked from this one, directly or transitively.
    pub fn descendants(&self) -> Vec<ExecutionContext> {
        let children: Vec<ExecutionContext> = lock(&self.children).clone();
        children
            .into_iter()
            .flat_map(|child| {
                let mut nested = vec![child.clone()];
                nested.extend(child.descendants());
                nested
            })
            .collect()
    }

    /// Runs `actions` one after another, each on a fresh fork of the previous
    /// step's context, and returns the last context. Errors are attributed to
    /// this context's path annotated with the failing step. Pending writes of
    /// this branch are settled first, so a stale or failed write fails the chain.
    pub async fn chain(
        &self,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<ExecutionContext, EvalError> {
        let actions: Vec<Action> = actions.into_iter().collect();
        debug!(path = %self.path, steps = actions.len(), "running chain");
        // every step starts from settled values
        self.wait_for_pending().await?;
        execute_actions(&actions, self.clone(), self.path.clone())
            .await
            .map_err(EvalError::from)
    }

    /// Runs another request handler to completion from inside an action.
    ///
    /// An empty `source` defaults to the current query's source and an empty
    /// `query_type` to the handler id.
    pub async fn load_request(
        &self,
        handler: Arc<RequestHandler>,
        mut request: GenericRequest,
        secrets: Secrets,
    ) -> InternalResult<GenericResponse> {
        if request.source.is_empty() {
            request.source = self.shared.inputs.source_id.clone();
        }
        if request.query_type.is_empty() {
            request.query_type = handler.id.clone();
        }
        let inputs = GenerateInputs {
            source_id: request.source.clone(),
            handler,
            request,
            secrets: Arc::new(secrets),
            page_fetch_limit_reached: None,
            cache_network_requests: self.shared.inputs.cache_network_requests,
            hooks: self.shared.inputs.hooks.clone(),
        };
        Box::pin(generate_response(inputs)).await
    }

    /// Runs the named hook chain with `input`.
    pub async fn run_hook(&self, name: &str, input: Value) -> Result<Value, EvalError> {
        self.shared.inputs.hooks.execute(name, input).await
    }

    pub fn hooks(&self) -> Arc<Hooks> {
        self.shared.inputs.hooks.clone()
    }

    /// Copy of the query's request.
    pub fn request(&self) -> GenericRequest {
        self.shared.inputs.request.clone()
    }

    pub fn request_value(&self) -> Value {
        self.shared.inputs.request.to_value()
    }

    /// Exposes a single secret. Returns `None` if the secret was not provided.
    pub fn secret(&self, name: &str) -> Option<String> {
        self.shared
            .inputs
            .secrets
            .get(name)
            .map(|secret| secret.expose_secret().to_string())
    }

    pub fn secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.inputs.secrets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn request_handler(&self) -> Option<HandlerInfo> {
        self.shared.inputs.handler.clone()
    }

    pub fn source_id(&self) -> &str {
        &self.shared.inputs.source_id
    }

    pub fn pagination_type(&self) -> PaginationType {
        self.shared.inputs.pagination_type
    }

    /// Whether this page is the last one the query's page budget allows.
    /// `None` for handlers without pagination.
    pub fn page_fetch_limit_reached(&self) -> Option<bool> {
        self.shared.inputs.page_fetch_limit_reached
    }

    pub fn cache_network_requests(&self) -> bool {
        self.shared.inputs.cache_network_requests
    }

    pub fn path(&self) -> &TemplatePath {
        &self.path
    }

    pub fn execution_log(&self) -> &ExecutionLog {
        &self.shared.log
    }

    /// The exclusion marker; return it from an action to drop the field.
    pub fn exclude_field(&self) -> Value {
        Value::Exclude
    }
}
