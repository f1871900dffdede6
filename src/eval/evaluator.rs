use async_recursion::async_recursion;
use futures::future::try_join_all;
use tracing::debug;

use super::action::{Completed, execute_action};
use super::context::{CURRENT, ContextInputs, ExecutionContext, ForkOptions};
use super::error::{ConstructorExecutionError, EvalError, EvalResult, wrap_error};
use super::path::TemplatePath;
use super::template::{Action, ObjectTemplate, Template, directive_path, output_key};
use super::value::{Value, ValueMap};

/// Recursive template interpreter.
///
/// Sibling fields of an object and sibling list elements run concurrently on
/// the current task, each on its own fork of the context. Only `setup` is
/// ordered: it completes before anything else in its object. The first failure
/// wins; the results of siblings still in flight are discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Top level entry point
    #[tracing::instrument(skip_all, fields(path = %context.path()), level = "debug")]
    pub async fn evaluate(&self, template: &Template, context: &ExecutionContext) -> EvalResult<Value> {
        if let Some(path) = template.find_misplaced_array_map(context.path()) {
            return Err(wrap_error(EvalError::ArrayMapOutsideList, context, &path));
        }
        self.eval_template(template, context, context.path().clone())
            .await
    }

    #[async_recursion]
    async fn eval_template(
        &self,
        template: &Template,
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Value> {
        match template {
            Template::Scalar(value) => Ok(value.clone()),
            Template::Action(action) => self.eval_leaf(action, context, path).await,
            Template::Object(object) => self.eval_object(object, context, path).await,
            Template::List(items) => self.eval_list(items, context, path).await,
        }
    }

    /// Evaluates a nested field or element on its own branch.
    async fn eval_branch(
        &self,
        template: &Template,
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Value> {
        match template {
            Template::Scalar(value) => Ok(value.clone()),
            // execute_action forks on its own
            Template::Action(action) => self.eval_leaf(action, context, path).await,
            nested => {
                let branch = context.fork(ForkOptions::at(path.clone()));
                self.eval_template(nested, &branch, path).await
            }
        }
    }

    async fn eval_leaf(
        &self,
        action: &Action,
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Value> {
        let Completed { value, raw, .. } = execute_action(action, context, path).await?;
        Ok(match value {
            Some(Value::Selection(selection)) if !raw => Value::String(selection.text()),
            Some(value) => value,
            None => Value::Null,
        })
    }

    async fn eval_object(
        &self,
        object: &ObjectTemplate,
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Value> {
        let mut object_context = context.clone();
        let mut setup_wrote_current = false;
        if let Some(setup) = &object.setup {
            let completed = execute_action(setup, context, directive_path(&path, "setup")).await?;
            setup_wrote_current = completed.value.is_some();
            object_context = completed.context;
        }

        let mut output = ValueMap::new();
        if let Some(include) = &object.include {
            let include_path = directive_path(&path, "include");
            let completed = execute_action(include, &object_context, include_path.clone()).await?;
            let included = match completed.value {
                Some(Value::Map(map)) => map,
                other => {
                    let found = other.as_ref().map_or("undefined", Value::type_name);
                    return Err(wrap_error(
                        EvalError::InvalidInclude {
                            found: found.to_string(),
                        },
                        &completed.context,
                        &include_path,
                    ));
                }
            };

            let merged = object_context.fork(ForkOptions::at(path.clone()));
            for (key, value) in &included {
                // the current-value slot belongs to setup
                if key == CURRENT && setup_wrote_current {
                    continue;
                }
                merged.set(key, value.clone());
            }
            object_context = merged;
            output.extend(included.into_iter().filter(|(key, _)| key != CURRENT));
        }

        let fields = object.fields.iter().map(|(key, template)| {
            let key = output_key(key);
            let field_path = path.child(key.clone());
            let object_context = &object_context;
            async move {
                let value = self.eval_branch(template, object_context, field_path).await?;
                Ok::<_, ConstructorExecutionError>((key, value))
            }
        });

        for (key, value) in try_join_all(fields).await? {
            if value.is_exclude() {
                output.shift_remove(&key);
            } else {
                output.insert(key, value);
            }
        }
        Ok(Value::Map(output))
    }

    async fn eval_list(
        &self,
        items: &[Template],
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Value> {
        let elements = items.iter().enumerate().map(|(index, item)| {
            let item_path = path.child(index);
            async move {
                match item {
                    Template::Object(object) if object.has_array_map() => {
                        self.eval_array_map(object, context, item_path).await
                    }
                    other => Ok(vec![self.eval_branch(other, context, item_path).await?]),
                }
            }
        });

        let values = try_join_all(elements)
            .await?
            .into_iter()
            .flatten()
            .filter(|value| !value.is_exclude())
            .collect();
        Ok(Value::List(values))
    }

    /// Fans `object` out over the collection its `array_map` action returns.
    async fn eval_array_map(
        &self,
        object: &ObjectTemplate,
        context: &ExecutionContext,
        path: TemplatePath,
    ) -> EvalResult<Vec<Value>> {
        let Some(array_map) = &object.array_map else {
            return Ok(vec![self.eval_object(object, context, path).await?]);
        };
        let source_path = directive_path(&path, "array_map");
        let completed = execute_action(array_map, context, source_path.clone()).await?;
        let source = match completed.value {
            Some(Value::List(items)) => items,
            Some(Value::Selection(selection)) => selection
                .selected_nodes()
                .into_iter()
                .map(Value::Selection)
                .collect(),
            other => {
                let found = other.as_ref().map_or("undefined", Value::type_name);
                return Err(wrap_error(
                    EvalError::InvalidArrayMapSource {
                        found: found.to_string(),
                    },
                    &completed.context,
                    &source_path,
                ));
            }
        };
        debug!(%path, elements = source.len(), "array_map fan-out");

        let rest = ObjectTemplate {
            array_map: None,
            ..object.clone()
        };
        let source_context = &completed.context;
        let rest = &rest;
        let elements = source.into_iter().enumerate().map(|(index, element)| {
            let element_path = path.child(index);
            async move {
                let branch = source_context.fork(ForkOptions::at(element_path.clone()));
                branch.set(CURRENT, element);
                self.eval_object(rest, &branch, element_path).await
            }
        });
        try_join_all(elements).await
    }
}

/// Evaluates `template` against a fresh root context built from `inputs`.
pub async fn evaluate(template: &Template, inputs: ContextInputs) -> EvalResult<Value> {
    let context = ExecutionContext::new(inputs);
    Evaluator::new().evaluate(template, &context).await
}
