//! Response validation.
//!
//! Schema checking itself lives outside this crate behind [`ResponseValidator`].
//! What is checked here is the contract every handler's output must honour
//! before its own validator sees it.

use core::fmt;

use crate::eval::value::Value;
use crate::pagination::PaginationError;
use crate::response::PaginationType;

/// One problem found in a validated value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Where the problem is, e.g. `$.media[0].url`.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for issue in &self.issues {
            write!(f, "\n  - {}: {}", issue.path, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            issues: vec![],
        }
    }

    pub fn with_issue(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.issues.push(ValidationIssue::new(path, message));
        self
    }

    pub fn with_issues(mut self, issues: impl IntoIterator<Item = ValidationIssue>) -> Self {
        self.issues.extend(issues);
        self
    }

    /// Replaces the headline, keeping the issues.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// External validator boundary: passes or reports path-addressed issues.
#[mockall::automock]
pub trait ResponseValidator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

/// Accepts every value.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl ResponseValidator for AcceptAll {
    fn validate(&self, _value: &Value) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Adapts a closure into a [`ResponseValidator`].
pub struct ValidatorFn<F>(pub F);

impl<F> ResponseValidator for ValidatorFn<F>
where
    F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        (self.0)(value)
    }
}

/// Checks the shape every response shares: a `media` list whose items belong
/// to the queried source, and a `request` echoing the request that produced it.
#[derive(Clone, Debug)]
pub struct GenericResponseValidator {
    request: Value,
    source_id: String,
}

impl GenericResponseValidator {
    pub fn new(request: Value, source_id: impl Into<String>) -> Self {
        Self {
            request,
            source_id: source_id.into(),
        }
    }

    fn media_issues(&self, media: Option<&Value>) -> Vec<ValidationIssue> {
        let Some(media) = media else {
            return vec![ValidationIssue::new("$.media", "Required")];
        };
        let Some(items) = media.as_list() else {
            return vec![ValidationIssue::new(
                "$.media",
                format!("Expected array, received {}", media.type_name()),
            )];
        };
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_exclude())
            .filter_map(|(index, item)| {
                let path = format!("$.media[{}]", index);
                if item.as_map().is_none() {
                    return Some(ValidationIssue::new(
                        path,
                        format!("Expected object, received {}", item.type_name()),
                    ));
                }
                match item.get("mediaFinderSource") {
                    Some(source) if source.as_str() != Some(self.source_id.as_str()) => {
                        Some(ValidationIssue::new(
                            format!("{}.mediaFinderSource", path),
                            format!(
                                "Request was for source {} but media number {} has source set to {}",
                                self.source_id, index, source
                            ),
                        ))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    fn request_issues(&self, request: Option<&Value>) -> Vec<ValidationIssue> {
        match request {
            None => vec![ValidationIssue::new("$.request", "Required")],
            Some(request) if request.as_map().is_none() => vec![ValidationIssue::new(
                "$.request",
                format!("Expected object, received {}", request.type_name()),
            )],
            Some(request) if request.to_json() != self.request.to_json() => {
                vec![ValidationIssue::new(
                    "$.request",
                    format!(
                        "Does not match the request the page was generated for (expected {}, received {})",
                        self.request, request
                    ),
                )]
            }
            Some(_) => vec![],
        }
    }
}

impl ResponseValidator for GenericResponseValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if value.as_map().is_none() {
            return Err(ValidationError::new("Response is invalid").with_issue(
                "$",
                format!("Expected object, received {}", value.type_name()),
            ));
        }
        let mut issues = self.media_issues(value.get("media"));
        issues.extend(self.request_issues(value.get("request")));
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new("Response is invalid").with_issues(issues))
        }
    }
}

/// What a page must look like for the handler's pagination type.
#[derive(Clone, Debug)]
pub struct PaginationContract<'a> {
    pub handler_id: &'a str,
    pub source_id: &'a str,
    pub pagination_type: PaginationType,
    pub page_fetch_limit_reached: Option<bool>,
}

impl PaginationContract<'_> {
    pub fn check(&self, response: &Value) -> Result<(), PaginationError> {
        let page = response.get("page").filter(|page| !page.is_null());
        let page = match (self.pagination_type, page) {
            (PaginationType::None, None) => return Ok(()),
            (PaginationType::None, Some(_)) => {
                return Err(self.violation("Handler does not paginate but the response has a page"));
            }
            (pagination_type, None) => {
                return Err(self.violation(format!(
                    "Request was for a {} page but response has no page",
                    pagination_type
                )));
            }
            (_, Some(page)) => page,
        };

        let declared = page.get("paginationType").and_then(Value::as_str);
        if declared != Some(self.pagination_type.to_string().as_str()) {
            return Err(self.violation(format!(
                "Request was for a {} page but response page type was {}",
                self.pagination_type,
                declared.unwrap_or("undefined")
            )));
        }

        match self.pagination_type {
            PaginationType::Offset => {
                if page.get("pageNumber").and_then(Value::as_i64).is_none() {
                    return Err(self.violation("Offset page is missing an integer pageNumber"));
                }
            }
            PaginationType::Cursor => {
                for key in ["cursor", "nextCursor"] {
                    match page.get(key) {
                        Some(Value::String(_) | Value::Integer(_) | Value::Null) => {}
                        Some(other) => {
                            return Err(self.violation(format!(
                                "Cursor page field {} must be a string, integer or null but was {}",
                                key,
                                other.type_name()
                            )));
                        }
                        None => {
                            return Err(self.violation(format!("Cursor page is missing {}", key)));
                        }
                    }
                }
            }
            PaginationType::None => {}
        }

        let reported = page.get("pageFetchLimitReached").and_then(Value::as_bool);
        if reported != self.page_fetch_limit_reached {
            return Err(self.violation(format!(
                "pageFetchLimitReached was {:?} but should be {:?}",
                reported, self.page_fetch_limit_reached
            )));
        }
        Ok(())
    }

    fn violation(&self, message: impl Into<String>) -> PaginationError {
        PaginationError::ContractViolation {
            handler: self.handler_id.to_string(),
            source_id: self.source_id.to_string(),
            message: message.into(),
        }
    }
}
