//! Template Evaluation System
//!
//! Turns a declarative response [`Template`](template::Template) into a concrete
//! [`Value`](value::Value) by running its actions against a tree of
//! [`ExecutionContext`](context::ExecutionContext)s.
//!
//! # Core Components
//!
//! ## Evaluator
//! Walks the template recursively. Object fields and list elements are
//! evaluated concurrently on isolated forks of the context; `setup` runs first,
//! `include` is merged before the fields, `array_map` fans a list element out
//! over a collection.
//!
//! ## Action Execution
//! Runs a single action on its own fork, records its result and waits for any
//! pending writes it made before handing the fork back.
//!
//! ## Execution Context
//! Per-branch data store, result history and pending-write bookkeeping, plus a
//! read-only view of the query (request, secrets, handler, page budget, hooks).
//!
//! ## Errors
//! Every failure is wrapped once into a
//! [`ConstructorExecutionError`](error::ConstructorExecutionError) carrying the
//! failing path and the execution log, rendered with `describe()`.

pub mod action;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod path;
pub mod template;
pub mod value;

pub use context::{CURRENT, ContextError, ContextInputs, ExecutionContext, ForkOptions, HandlerInfo};
pub use error::{ConstructorExecutionError, EvalError, EvalResult, ExecutionLog};
pub use evaluator::{Evaluator, evaluate};
pub use path::{PathSegment, TemplatePath};
pub use template::{Action, ActionOutput, ObjectTemplate, Template, action};
pub use value::{Selectable, Value, ValueMap};
