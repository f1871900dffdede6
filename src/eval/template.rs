//! Declarative response templates.
//!
//! A [`Template`] describes the shape of a response: scalars are copied
//! verbatim, [`Action`]s compute a value from the [`ExecutionContext`], and
//! object/list templates nest further templates. Object templates may carry
//! three directives that are never emitted as fields:
//!
//! - `setup` runs before anything else in the object and its context is seen by
//!   every field
//! - `include` returns a map merged into the object output
//! - `array_map` fans the object out over a collection (list elements only)

use core::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::context::ExecutionContext;
use super::error::EvalError;
use super::path::{PathSegment, TemplatePath};
use super::value::Value;

pub type ActionFuture = BoxFuture<'static, Result<ActionOutput, EvalError>>;
type ActionFn = dyn Fn(ExecutionContext) -> ActionFuture + Send + Sync;

/// What an action hands back to the evaluator.
#[derive(Debug)]
pub enum ActionOutput {
    /// Recorded as the branch result and written to the current-value slot.
    Value(Value),
    /// Like `Value`, but selections are kept as handles instead of rendered to text.
    Raw(Value),
    /// The action threaded a context forward (see `ExecutionContext::chain`).
    Context(ExecutionContext),
    /// Nothing to record; the current-value slot is left untouched.
    Undefined,
}

impl From<Value> for ActionOutput {
    fn from(value: Value) -> Self {
        ActionOutput::Value(value)
    }
}

impl From<Option<Value>> for ActionOutput {
    fn from(value: Option<Value>) -> Self {
        value.map(ActionOutput::Value).unwrap_or(ActionOutput::Undefined)
    }
}

impl From<ExecutionContext> for ActionOutput {
    fn from(context: ExecutionContext) -> Self {
        ActionOutput::Context(context)
    }
}

impl From<()> for ActionOutput {
    fn from(_: ()) -> Self {
        ActionOutput::Undefined
    }
}

impl From<i64> for ActionOutput {
    fn from(i: i64) -> Self {
        ActionOutput::Value(Value::Integer(i))
    }
}

impl From<f64> for ActionOutput {
    fn from(f: f64) -> Self {
        ActionOutput::Value(Value::Float(f))
    }
}

impl From<bool> for ActionOutput {
    fn from(b: bool) -> Self {
        ActionOutput::Value(Value::Boolean(b))
    }
}

impl From<&str> for ActionOutput {
    fn from(s: &str) -> Self {
        ActionOutput::Value(Value::from(s))
    }
}

impl From<String> for ActionOutput {
    fn from(s: String) -> Self {
        ActionOutput::Value(Value::String(s))
    }
}

/// Asynchronous unit of work run against a forked context.
#[derive(Clone)]
pub struct Action {
    func: Arc<ActionFn>,
}

impl Action {
    pub fn new<F, Fut, T>(f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, EvalError>> + Send + 'static,
        T: Into<ActionOutput>,
    {
        Self {
            func: Arc::new(move |context| {
                let fut = f(context);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
        }
    }

    pub fn call(&self, context: ExecutionContext) -> ActionFuture {
        (self.func)(context)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action(..)")
    }
}

/// Shorthand for [`Action::new`].
pub fn action<F, Fut, T>(f: F) -> Action
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, EvalError>> + Send + 'static,
    T: Into<ActionOutput>,
{
    Action::new(f)
}

#[derive(Clone, Debug)]
pub enum Template {
    Scalar(Value),
    Action(Action),
    Object(ObjectTemplate),
    List(Vec<Template>),
}

impl Template {
    pub fn scalar(value: impl Into<Value>) -> Self {
        Template::Scalar(value.into())
    }

    pub fn object() -> ObjectTemplate {
        ObjectTemplate::new()
    }

    pub fn list(items: impl IntoIterator<Item = Template>) -> Self {
        Template::List(items.into_iter().collect())
    }

    /// Finds the first object template carrying `array_map` outside a list
    /// element position.
    pub(crate) fn find_misplaced_array_map(&self, path: &TemplatePath) -> Option<TemplatePath> {
        match self {
            Template::Scalar(_) | Template::Action(_) => None,
            Template::Object(object) => {
                if object.array_map.is_some() {
                    return Some(path.clone());
                }
                object.find_misplaced_array_map_in_fields(path)
            }
            Template::List(items) => items.iter().enumerate().find_map(|(index, item)| {
                let item_path = path.child(index);
                match item {
                    Template::Object(object) => {
                        object.find_misplaced_array_map_in_fields(&item_path)
                    }
                    other => other.find_misplaced_array_map(&item_path),
                }
            }),
        }
    }
}

impl From<Value> for Template {
    fn from(value: Value) -> Self {
        Template::Scalar(value)
    }
}

impl From<&str> for Template {
    fn from(s: &str) -> Self {
        Template::Scalar(Value::from(s))
    }
}

impl From<i64> for Template {
    fn from(i: i64) -> Self {
        Template::Scalar(Value::Integer(i))
    }
}

impl From<bool> for Template {
    fn from(b: bool) -> Self {
        Template::Scalar(Value::Boolean(b))
    }
}

impl From<Action> for Template {
    fn from(action: Action) -> Self {
        Template::Action(action)
    }
}

impl From<ObjectTemplate> for Template {
    fn from(object: ObjectTemplate) -> Self {
        Template::Object(object)
    }
}

impl From<Vec<Template>> for Template {
    fn from(items: Vec<Template>) -> Self {
        Template::List(items)
    }
}

/// Object template: ordered fields plus optional directives.
#[derive(Clone, Debug, Default)]
pub struct ObjectTemplate {
    pub(crate) setup: Option<Action>,
    pub(crate) include: Option<Action>,
    pub(crate) array_map: Option<Action>,
    pub(crate) fields: IndexMap<String, Template>,
}

impl ObjectTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(mut self, action: Action) -> Self {
        self.setup = Some(action);
        self
    }

    pub fn include(mut self, action: Action) -> Self {
        self.include = Some(action);
        self
    }

    pub fn array_map(mut self, action: Action) -> Self {
        self.array_map = Some(action);
        self
    }

    /// Adds a field. A key starting with `__` is emitted with one leading
    /// underscore removed.
    pub fn field(mut self, key: impl Into<String>, template: impl Into<Template>) -> Self {
        self.fields.insert(key.into(), template.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Template)> {
        self.fields.iter()
    }

    pub fn has_array_map(&self) -> bool {
        self.array_map.is_some()
    }

    fn find_misplaced_array_map_in_fields(&self, path: &TemplatePath) -> Option<TemplatePath> {
        self.fields.iter().find_map(|(key, template)| {
            template.find_misplaced_array_map(&path.child(output_key(key)))
        })
    }
}

/// Output key for a template field: `__setup` becomes `_setup`.
pub(crate) fn output_key(key: &str) -> String {
    match key.strip_prefix("__") {
        Some(rest) => format!("_{}", rest),
        None => key.to_string(),
    }
}

pub(crate) fn directive_path(path: &TemplatePath, directive: &str) -> TemplatePath {
    path.child(PathSegment::Key(format!("_{}", directive)))
}
