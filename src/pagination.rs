//! Pagination driver.
//!
//! A [`Query`] walks a handler's pages by evaluating its template once per
//! page, deriving the next request from the page it just produced:
//!
//! - `offset`: `pageNumber = page.pageNumber + 1`
//! - `cursor`: `cursor = page.nextCursor`
//! - `none`: a single page
//!
//! Iteration stops at a page reporting `isLastPage`, or once
//! `fetch_count_limit` pages have been fetched.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use strum::Display;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::InternalResult;
use crate::config::QueryOptions;
use crate::generate::{GenerateInputs, generate_response};
use crate::handler::{RequestHandler, Source};
use crate::hooks::Hooks;
use crate::request::GenericRequest;
use crate::response::{GenericResponse, PaginationType};
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error(
        "The response returned from the request handler \"{handler}\" of the source \"{source_id}\" broke the pagination contract: {message}"
    )]
    ContractViolation {
        handler: String,
        source_id: String,
        message: String,
    },
    #[error(
        "Attempted to query an unknown source \"{0}\". If it is provided by a plugin please make sure that plugin is loaded first"
    )]
    UnknownSource(String),
    #[error("Source \"{source_id}\" has no request handler for query type \"{query_type}\"")]
    UnknownRequestHandler {
        source_id: String,
        query_type: String,
    },
    #[error("Could not find a response matching the request for request handler \"{0}\"")]
    NoMatchingResponse(String),
    #[error("{0}")]
    InvalidSecrets(ValidationError),
    #[error("Request is invalid: {0}")]
    InvalidRequest(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum DriverState {
    #[default]
    Idle,
    Fetching,
    Yielded,
    Exhausted,
    LimitReached,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DriverState::Exhausted | DriverState::LimitReached)
    }
}

/// Pull-based iteration over the pages of one request.
#[derive(Debug)]
pub struct Query {
    query_id: Uuid,
    sources: Arc<HashMap<String, Arc<Source>>>,
    request: GenericRequest,
    options: QueryOptions,
    hooks: Arc<Hooks>,
    state: DriverState,
    fetched_count: usize,
}

impl Query {
    pub(crate) fn new(
        sources: Arc<HashMap<String, Arc<Source>>>,
        request: GenericRequest,
        options: QueryOptions,
        hooks: Arc<Hooks>,
    ) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            sources,
            request,
            options,
            hooks,
            state: DriverState::Idle,
            fetched_count: 0,
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Copy of the request the next page will be fetched with.
    pub fn request(&self) -> GenericRequest {
        self.request.clone()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn fetched_count(&self) -> usize {
        self.fetched_count
    }

    pub fn source(&self) -> Result<Arc<Source>, PaginationError> {
        self.sources
            .get(&self.request.source)
            .cloned()
            .ok_or_else(|| PaginationError::UnknownSource(self.request.source.clone()))
    }

    pub fn request_handler(&self) -> Result<Arc<RequestHandler>, PaginationError> {
        self.source()?.request_handler(&self.request.query_type)
    }

    pub fn request_with_defaults(&self) -> Result<GenericRequest, PaginationError> {
        Ok(self.request_handler()?.request_with_defaults(&self.request))
    }

    /// Replaces the request. Iteration restarts from the new request.
    pub fn set_request(&mut self, request: GenericRequest) {
        self.request = request;
        self.rewind();
    }

    /// Replaces the options. Iteration restarts.
    pub fn set_options(&mut self, options: QueryOptions) {
        self.options = options;
        self.rewind();
    }

    pub fn rewind(&mut self) {
        debug!(query_id = %self.query_id, "rewinding query");
        self.state = DriverState::Idle;
        self.fetched_count = 0;
    }

    /// Fetches the next page, or `None` once the query is exhausted or has hit
    /// its page budget. A failed page ends the query.
    #[tracing::instrument(
        skip(self),
        fields(query_id = %self.query_id, source = %self.request.source, query_type = %self.request.query_type),
        level = "debug"
    )]
    pub async fn next(&mut self) -> InternalResult<Option<GenericResponse>> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        match self.fetch_page().await {
            Ok(page) => Ok(page),
            Err(error) => {
                self.state = DriverState::Exhausted;
                Err(error)
            }
        }
    }

    async fn fetch_page(&mut self) -> InternalResult<Option<GenericResponse>> {
        if self.request.source.is_empty() || self.request.query_type.is_empty() {
            return Err(PaginationError::InvalidRequest(
                "source and queryType are required".to_string(),
            )
            .into());
        }
        let source = self.source()?;
        let handler = source.request_handler(&self.request.query_type)?;
        if self.state == DriverState::Idle {
            handler.validate_secrets(&self.options.secrets).map_err(|error| {
                warn!(handler = %handler.id, "{}", error.message);
                PaginationError::InvalidSecrets(error)
            })?;
        }

        let limit = self.options.fetch_count_limit;
        if self.fetched_count >= limit {
            self.state = DriverState::LimitReached;
            return Ok(None);
        }

        self.state = DriverState::Fetching;
        self.fetched_count += 1;
        let page_fetch_limit_reached = match handler.pagination_type {
            PaginationType::None => None,
            _ => Some(self.fetched_count == limit),
        };
        debug!(page = self.fetched_count, limit, "fetching page");

        let response = generate_response(GenerateInputs {
            source_id: source.id.clone(),
            handler: handler.clone(),
            request: self.request.clone(),
            secrets: self.options.secrets.clone(),
            page_fetch_limit_reached,
            cache_network_requests: self.options.cache_network_requests,
            hooks: self.hooks.clone(),
        })
        .await?;

        match (handler.pagination_type, &response.page) {
            (PaginationType::Offset, Some(page)) => {
                if let Some(page_number) = page.page_number {
                    self.request.page_number = Some(page_number + 1);
                }
            }
            (PaginationType::Cursor, Some(page)) => {
                self.request.cursor = page.next_cursor.clone();
            }
            _ => {}
        }

        self.state = if handler.pagination_type == PaginationType::None || response.is_last_page() {
            DriverState::Exhausted
        } else if self.fetched_count >= limit {
            info!(limit, "page fetch limit reached");
            DriverState::LimitReached
        } else {
            DriverState::Yielded
        };
        Ok(Some(response))
    }

    /// The remaining pages as a stream. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = InternalResult<GenericResponse>> {
        futures::stream::unfold(Some(self), |query| async move {
            let Some(mut query) = query else {
                return None;
            };
            match query.next().await {
                Ok(Some(response)) => Some((Ok(response), Some(query))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}
