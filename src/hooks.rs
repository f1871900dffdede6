use core::fmt;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::eval::error::EvalError;
use crate::eval::value::Value;

/// Hook chain run around every URL load.
pub const LOAD_URL: &str = "loadUrl";

/// One link of a hook chain. A hook may transform the input, call `next` to
/// run the rest of the chain, and transform its output; or answer on its own
/// without calling `next`.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, input: Value, next: Next) -> Result<Value, EvalError>;
}

/// The remainder of a hook chain.
pub struct Next {
    remaining: Vec<Arc<dyn Hook>>,
}

impl Next {
    pub fn run(mut self, input: Value) -> BoxFuture<'static, Result<Value, EvalError>> {
        Box::pin(async move {
            if self.remaining.is_empty() {
                return Ok(input);
            }
            let hook = self.remaining.remove(0);
            hook.call(input, self).await
        })
    }
}

struct FnHook<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Hook for FnHook<F, Fut>
where
    F: Fn(Value, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EvalError>> + Send,
{
    async fn call(&self, input: Value, next: Next) -> Result<Value, EvalError> {
        (self.f)(input, next).await
    }
}

/// Wraps a closure as a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Arc<dyn Hook>
where
    F: Fn(Value, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, EvalError>> + Send + 'static,
{
    Arc::new(FnHook {
        f,
        _marker: PhantomData,
    })
}

/// Named, ordered hook chains shared by every context of a query.
#[derive(Clone, Default)]
pub struct Hooks {
    chains: HashMap<String, Vec<Arc<dyn Hook>>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chains: Vec<(&String, usize)> = self
            .chains
            .iter()
            .map(|(name, chain)| (name, chain.len()))
            .collect();
        chains.sort();
        f.debug_struct("Hooks").field("chains", &chains).finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to the end of the chain called `name`.
    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> &mut Self {
        self.chains.entry(name.into()).or_default().push(hook);
        self
    }

    pub fn with(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        self.register(name, hook);
        self
    }

    pub fn len(&self, name: &str) -> usize {
        self.chains.get(name).map_or(0, Vec::len)
    }

    /// Runs the chain called `name`. An empty or unknown chain returns `input`.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value, EvalError> {
        let remaining = self.chains.get(name).cloned().unwrap_or_default();
        Next { remaining }.run(input).await
    }
}
