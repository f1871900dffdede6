use core::fmt;
use std::sync::Arc;

use secrecy::ExposeSecret;
use serde_json::Map;

use crate::Secrets;
use crate::eval::context::HandlerInfo;
use crate::eval::template::Template;
use crate::eval::value::{Value, ValueMap};
use crate::pagination::PaginationError;
use crate::request::GenericRequest;
use crate::response::PaginationType;
use crate::validation::{AcceptAll, ResponseValidator, ValidationError, ValidationIssue};

pub type RequestMatcher = Arc<dyn Fn(&GenericRequest) -> bool + Send + Sync>;

/// How a handler answers a family of requests: the template to evaluate and
/// the validator its output must pass.
#[derive(Clone)]
pub struct ResponseDetails {
    pub request_matcher: Option<RequestMatcher>,
    pub validator: Arc<dyn ResponseValidator>,
    pub template: Template,
}

impl fmt::Debug for ResponseDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseDetails")
            .field("has_request_matcher", &self.request_matcher.is_some())
            .field("template", &self.template)
            .finish()
    }
}

impl ResponseDetails {
    pub fn new(template: impl Into<Template>) -> Self {
        Self {
            request_matcher: None,
            validator: Arc::new(AcceptAll),
            template: template.into(),
        }
    }

    pub fn with_validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_request_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&GenericRequest) -> bool + Send + Sync + 'static,
    {
        self.request_matcher = Some(Arc::new(matcher));
        self
    }
}

/// A secret a handler needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub required: bool,
}

/// One query type offered by a source.
#[derive(Clone, Debug)]
pub struct RequestHandler {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub pagination_type: PaginationType,
    pub request_defaults: Map<String, serde_json::Value>,
    pub secrets: Vec<SecretSpec>,
    pub responses: Vec<ResponseDetails>,
}

impl RequestHandler {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            pagination_type: PaginationType::None,
            request_defaults: Map::new(),
            secrets: vec![],
            responses: vec![],
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn pagination(mut self, pagination_type: PaginationType) -> Self {
        self.pagination_type = pagination_type;
        self
    }

    pub fn request_default(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.request_defaults.insert(key.into(), value.into());
        self
    }

    pub fn secret(mut self, name: impl Into<String>, required: bool) -> Self {
        self.secrets.push(SecretSpec {
            name: name.into(),
            required,
        });
        self
    }

    pub fn response(mut self, details: ResponseDetails) -> Self {
        self.responses.push(details);
        self
    }

    pub fn info(&self) -> HandlerInfo {
        HandlerInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            pagination_type: self.pagination_type,
        }
    }

    pub fn request_with_defaults(&self, request: &GenericRequest) -> GenericRequest {
        request.with_defaults(&self.request_defaults)
    }

    /// Picks the response for `request`: the first entry whose matcher accepts
    /// it, otherwise the last entry without a matcher.
    pub fn response_details_for(&self, request: &GenericRequest) -> Result<&ResponseDetails, PaginationError> {
        let mut fallback = None;
        for details in &self.responses {
            match &details.request_matcher {
                Some(matcher) if matcher(request) => return Ok(details),
                Some(_) => {}
                None => fallback = Some(details),
            }
        }
        fallback.ok_or_else(|| PaginationError::NoMatchingResponse(self.id.clone()))
    }

    /// Checks that every required secret is present.
    pub fn validate_secrets(&self, secrets: &Secrets) -> Result<(), ValidationError> {
        let issues: Vec<_> = self
            .secrets
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| {
                secrets
                    .get(&spec.name)
                    .is_none_or(|secret| secret.expose_secret().is_empty())
            })
            .map(|spec| ValidationIssue::new(format!("$.{}", spec.name), "Required"))
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "Secrets for the request handler \"{}\" are invalid (provided: {})",
                self.id,
                self.provided_secrets(secrets)
            ))
            .with_issues(issues))
        }
    }

    /// Names of the declared secrets that were provided, for diagnostics.
    pub fn provided_secrets(&self, secrets: &Secrets) -> Value {
        let provided: ValueMap = self
            .secrets
            .iter()
            .map(|spec| (spec.name.clone(), Value::Boolean(secrets.contains_key(&spec.name))))
            .collect();
        Value::Map(provided)
    }
}

/// A media source and the request handlers it offers.
#[derive(Clone, Debug)]
pub struct Source {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub request_handlers: Vec<Arc<RequestHandler>>,
}

impl Source {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: String::new(),
            request_handlers: vec![],
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn handler(mut self, handler: RequestHandler) -> Self {
        self.request_handlers.push(Arc::new(handler));
        self
    }

    pub fn request_handler(&self, query_type: &str) -> Result<Arc<RequestHandler>, PaginationError> {
        self.request_handlers
            .iter()
            .find(|handler| handler.id == query_type)
            .cloned()
            .ok_or_else(|| PaginationError::UnknownRequestHandler {
                source_id: self.id.clone(),
                query_type: query_type.to_string(),
            })
    }
}

/// A bundle of sources loaded together.
#[derive(Clone, Debug, Default)]
pub struct Plugin {
    pub sources: Vec<Source>,
}

impl Plugin {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
        }
    }
}
