use super::context::{CURRENT, ExecutionContext, ForkOptions};
use super::error::{EvalResult, wrap_error};
use super::path::TemplatePath;
use super::template::{Action, ActionOutput};
use super::value::Value;

/// Outcome of a single leaf action.
#[derive(Debug)]
pub struct Completed {
    /// The branch the action ran in (or the context it handed back).
    pub context: ExecutionContext,
    /// What the action produced. `None` when it returned nothing; for an
    /// action that handed a context back, that context's current value.
    pub value: Option<Value>,
    /// The action asked for its value to be kept as is.
    pub raw: bool,
}

/// Runs `action` on an isolated fork of `context` scoped to `path`.
///
/// The action's value is recorded as the branch result and, unless undefined,
/// written to the current-value slot of the fork. Values the action stored with
/// `set_future` have settled by the time this returns. Failures are wrapped at
/// `path` unless they were already wrapped deeper down.
#[tracing::instrument(skip(action, context, path), fields(path = %path), level = "debug")]
pub async fn execute_action(
    action: &Action,
    context: &ExecutionContext,
    path: TemplatePath,
) -> EvalResult<Completed> {
    context.execution_log().entered(&path);
    let forked = context.fork(ForkOptions::at(path.clone()));

    let output = action
        .call(forked.clone())
        .await
        .map_err(|e| wrap_error(e, &forked, &path))?;

    let (result_context, value, raw) = match output {
        ActionOutput::Value(value) => {
            forked.record_result(Some(value.clone()));
            forked.set(CURRENT, value.clone());
            (forked.clone(), Some(value), false)
        }
        ActionOutput::Raw(value) => {
            forked.record_result(Some(value.clone()));
            forked.set(CURRENT, value.clone());
            (forked.clone(), Some(value), true)
        }
        ActionOutput::Context(returned) => {
            returned.record_result(None);
            let current = returned.current().ok();
            (returned, current, false)
        }
        ActionOutput::Undefined => {
            forked.record_result(None);
            (forked.clone(), None, false)
        }
    };

    // writes made on the fork count even when another context was handed back
    forked
        .wait_for_pending()
        .await
        .map_err(|e| wrap_error(e, &forked, &path))?;
    result_context
        .wait_for_pending()
        .await
        .map_err(|e| wrap_error(e, &result_context, &path))?;

    Ok(Completed {
        context: result_context,
        value,
        raw,
    })
}

/// Runs `actions` in order, each step on the context the previous one produced.
/// Step `n` (1-based) is reported as `<path> — (chain step n)`.
pub async fn execute_actions(
    actions: &[Action],
    context: ExecutionContext,
    path: TemplatePath,
) -> EvalResult<ExecutionContext> {
    let mut current = context;
    for (index, action) in actions.iter().enumerate() {
        let completed = execute_action(action, &current, path.with_chain_step(index + 1)).await?;
        current = completed.context;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::{ContextError, ContextInputs};
    use crate::eval::error::EvalError;
    use crate::eval::template::action;
    use pretty_assertions::assert_eq;

    fn root() -> ExecutionContext {
        ExecutionContext::new(ContextInputs::default())
    }

    #[tokio::test]
    async fn test_action_value_lands_in_current_slot() {
        let context = root();
        let completed = execute_action(
            &action(|_| async { Ok(Value::from("hello")) }),
            &context,
            TemplatePath::root().child("title"),
        )
        .await
        .unwrap();

        assert_eq!(completed.context.current().unwrap(), Value::from("hello"));
        assert_eq!(completed.context.last_result(), Some(Value::from("hello")));
        assert_eq!(completed.context.path().to_string(), "$.title");
        assert_eq!(completed.value, Some(Value::from("hello")));
        assert!(!completed.raw);
        // the caller never sees the fork's writes
        assert!(!context.has(CURRENT));
    }

    #[tokio::test]
    async fn test_undefined_leaves_current_untouched() {
        let context = root();
        context.set(CURRENT, 7);
        let completed = execute_action(
            &action(|ctx: ExecutionContext| async move {
                ctx.set("side", 1);
                Ok(())
            }),
            &context,
            TemplatePath::root(),
        )
        .await
        .unwrap();

        assert_eq!(completed.value, None);
        assert_eq!(completed.context.current().unwrap(), Value::from(7));
        assert_eq!(completed.context.get("side").unwrap(), Value::from(1));
        assert_eq!(completed.context.result_history(), vec![None]);
    }

    #[tokio::test]
    async fn test_pending_writes_settle_before_returning() {
        let completed = execute_action(
            &action(|ctx: ExecutionContext| async move {
                ctx.set_future("later", async { Ok(Value::from(42)) });
                Ok(())
            }),
            &root(),
            TemplatePath::root(),
        )
        .await
        .unwrap();
        assert_eq!(completed.context.get("later").unwrap(), Value::from(42));
    }

    #[tokio::test]
    async fn test_failure_is_wrapped_with_path_and_log() {
        let error = execute_action(
            &action(|_| async { Err::<(), _>(EvalError::action("boom")) }),
            &root(),
            TemplatePath::root().child("a").child("b"),
        )
        .await
        .unwrap_err();
        assert_eq!(error.path().to_string(), "$.a.b");
        assert_eq!(error.message(), "boom");
        assert_eq!(error.log(), ["Executing action for $.a.b"]);
    }

    #[tokio::test]
    async fn test_stale_write_surfaces_when_context_is_handed_back() {
        let error = execute_action(
            &action(|ctx: ExecutionContext| async move {
                ctx.set_future("k", async {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(Value::from(1))
                });
                ctx.set("k", 5);
                Ok(ctx.fork(ForkOptions::default()))
            }),
            &root(),
            TemplatePath::root().child("title"),
        )
        .await
        .unwrap_err();
        assert_eq!(error.path().to_string(), "$.title");
        assert!(matches!(
            error.cause(),
            Some(EvalError::Context(ContextError::StaleWrite { key })) if key == "k"
        ));
    }

    #[tokio::test]
    async fn test_chain_reads_value_written_with_set_future() {
        let completed = execute_action(
            &action(|ctx: ExecutionContext| async move {
                ctx.set_future("k", async {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok(Value::from("done"))
                });
                ctx.chain([action(|step: ExecutionContext| async move { Ok(step.get("k")?) })])
                    .await
            }),
            &root(),
            TemplatePath::root().child("title"),
        )
        .await
        .unwrap();
        assert_eq!(completed.value, Some(Value::from("done")));
    }
}
