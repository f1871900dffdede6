//! # Template Execution Errors
//!
//! Failures inside a template are reported as a [`ConstructorExecutionError`]:
//! the path of the branch that failed, the underlying [`EvalError`], a snapshot
//! of the query's execution log and the context that was active at the time.
//!
//! Errors are wrapped exactly once, at the branch where they happen. When a
//! wrapped error travels back up through enclosing branches (or through an
//! action that called `ExecutionContext::chain`) it is passed along unchanged.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use super::context::{ContextError, ExecutionContext};
use super::path::{PathSegment, TemplatePath};

pub type EvalResult<T> = Result<T, ConstructorExecutionError>;

type BoxError = Box<dyn StdError + Send + Sync>;

const LOG_TAIL: usize = 20;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("array_map must return either a list or a selection but returned {found}")]
    InvalidArrayMapSource { found: String },

    #[error("array_map can only be used on an object template that is a list element")]
    ArrayMapOutsideList,

    #[error("include must return a map but returned {found}")]
    InvalidInclude { found: String },

    #[error("{message}")]
    Action {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Nested request failed: {0}")]
    Request(#[source] Box<crate::Error>),

    /// Already wrapped further down the tree; passed through as is.
    #[error(transparent)]
    Nested(Box<ConstructorExecutionError>),
}

impl EvalError {
    pub fn action<S: Into<String>>(message: S) -> Self {
        EvalError::Action {
            message: message.into(),
            source: None,
        }
    }

    pub fn action_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: StdError + Send + Sync + 'static,
    {
        EvalError::Action {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<ConstructorExecutionError> for EvalError {
    fn from(error: ConstructorExecutionError) -> Self {
        EvalError::Nested(Box::new(error))
    }
}

impl From<crate::Error> for EvalError {
    fn from(error: crate::Error) -> Self {
        EvalError::Request(Box::new(error))
    }
}

/// Ordered "entered branch" entries for one query, owned by its root context.
#[derive(Clone, Debug, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entered(&self, path: &TemplatePath) {
        debug!(%path, "executing action");
        self.lock().push(format!("Executing action for {}", path));
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConstructorExecutionError {
    message: String,
    path: TemplatePath,
    #[source]
    cause: Option<Box<EvalError>>,
    log: Vec<String>,
    context: ExecutionContext,
}

impl ConstructorExecutionError {
    pub fn new(cause: EvalError, context: ExecutionContext, path: TemplatePath) -> Self {
        Self {
            message: cause.to_string(),
            log: context.execution_log().entries(),
            path,
            cause: Some(Box::new(cause)),
            context,
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = message.into();
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn path(&self) -> &TemplatePath {
        &self.path
    }

    pub fn cause(&self) -> Option<&EvalError> {
        self.cause.as_deref()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Context of the branch that failed.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Tree-shaped report of where the failure happened, for terminal display.
    ///
    /// ```text
    /// boom
    ///   Error occurred at: $.a.b
    ///
    ///   $
    ///   └── a
    ///       └── b  <-- failed here
    ///
    ///   Caused by:
    ///     0: boom
    /// ```
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.message);
        let _ = writeln!(out, "  Error occurred at: {}", self.path);
        let _ = writeln!(out);
        let _ = writeln!(out, "  $");
        let segments = self.path.segments();
        for (depth, segment) in segments.iter().enumerate() {
            let label = match segment {
                PathSegment::Key(key) => key.clone(),
                PathSegment::Index(index) => format!("[{}]", index),
            };
            let indent = "    ".repeat(depth);
            let _ = write!(out, "  {}└── {}", indent, label);
            if depth + 1 == segments.len() {
                let _ = write!(out, "  <-- failed here");
                if let Some(step) = self.path.chain_step() {
                    let _ = write!(out, " (chain step {})", step);
                }
            }
            let _ = writeln!(out);
        }

        let mut causes = Vec::new();
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(error) = current {
            causes.push(error.to_string());
            current = error.source();
        }
        causes.dedup();
        if !causes.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "  Caused by:");
            for (i, cause) in causes.iter().enumerate() {
                let _ = writeln!(out, "    {}: {}", i, cause);
            }
        }

        if !self.log.is_empty() {
            let _ = writeln!(out);
            let skipped = self.log.len().saturating_sub(LOG_TAIL);
            if skipped > 0 {
                let _ = writeln!(
                    out,
                    "  Execution log (last {} of {} entries):",
                    LOG_TAIL,
                    self.log.len()
                );
            } else {
                let _ = writeln!(out, "  Execution log:");
            }
            for entry in &self.log[skipped..] {
                let _ = writeln!(out, "    {}", entry);
            }
        }
        out
    }
}

/// Wraps `error` at `path` unless it was already wrapped deeper in the tree.
pub(crate) fn wrap_error(
    error: EvalError,
    context: &ExecutionContext,
    path: &TemplatePath,
) -> ConstructorExecutionError {
    match error {
        EvalError::Nested(inner) => *inner,
        other => ConstructorExecutionError::new(other, context.clone(), path.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::ContextInputs;

    #[test]
    fn test_wrap_does_not_double_wrap() {
        let context = ExecutionContext::new(ContextInputs::default());
        let inner_path = TemplatePath::root().child("a").child("b");
        let inner = wrap_error(EvalError::action("boom"), &context, &inner_path);

        let outer = wrap_error(EvalError::from(inner), &context, &TemplatePath::root());
        assert_eq!(outer.path().to_string(), "$.a.b");
        assert_eq!(outer.message(), "boom");
        assert!(matches!(outer.cause(), Some(EvalError::Action { .. })));
    }

    #[test]
    fn test_describe_renders_tree_and_cause() {
        let context = ExecutionContext::new(ContextInputs::default());
        let path = TemplatePath::root().child("media").child(2).child("url");
        context.execution_log().entered(&path);
        let error = wrap_error(
            EvalError::action_with_source(
                "could not load media",
                std::io::Error::other("connection reset"),
            ),
            &context,
            &path,
        );

        let report = error.describe();
        assert!(report.starts_with("could not load media\n"));
        assert!(report.contains("Error occurred at: $.media[2].url"));
        assert!(report.contains("└── media"));
        assert!(report.contains("    └── [2]"));
        assert!(report.contains("└── url  <-- failed here"));
        assert!(report.contains("1: connection reset"));
        assert!(report.contains("Executing action for $.media[2].url"));
    }

    #[test]
    fn test_describe_marks_chain_step() {
        let context = ExecutionContext::new(ContextInputs::default());
        let path = TemplatePath::root().child("title").with_chain_step(2);
        let error = wrap_error(EvalError::action("bad step"), &context, &path);
        let report = error.describe();
        assert!(report.contains("Error occurred at: $.title — (chain step 2)"));
        assert!(report.contains("<-- failed here (chain step 2)"));
    }
}
