use std::sync::Arc;

use tracing::{debug, error};

use crate::eval::context::ContextInputs;
use crate::eval::evaluate;
use crate::eval::value::Value;
use crate::handler::{RequestHandler, ResponseDetails};
use crate::hooks::Hooks;
use crate::request::GenericRequest;
use crate::response::GenericResponse;
use crate::validation::{GenericResponseValidator, PaginationContract, ResponseValidator};
use crate::{Error, InternalResult, Secrets};

/// Everything needed to produce one page.
#[derive(Clone, Debug)]
pub struct GenerateInputs {
    pub source_id: String,
    pub handler: Arc<RequestHandler>,
    pub request: GenericRequest,
    pub secrets: Arc<Secrets>,
    pub page_fetch_limit_reached: Option<bool>,
    pub cache_network_requests: bool,
    pub hooks: Arc<Hooks>,
}

/// Produces one validated page: applies the handler's request defaults,
/// evaluates the matching response template and validates the result.
#[tracing::instrument(
    skip_all,
    fields(source = %inputs.source_id, handler = %inputs.handler.id),
    level = "debug"
)]
pub async fn generate_response(inputs: GenerateInputs) -> InternalResult<GenericResponse> {
    let handler = inputs.handler;
    let request = handler.request_with_defaults(&inputs.request);
    let details = handler.response_details_for(&request)?;

    let context_inputs = ContextInputs {
        request: request.clone(),
        secrets: inputs.secrets,
        handler: Some(handler.info()),
        source_id: inputs.source_id.clone(),
        pagination_type: handler.pagination_type,
        page_fetch_limit_reached: inputs.page_fetch_limit_reached,
        cache_network_requests: inputs.cache_network_requests,
        hooks: inputs.hooks,
    };
    let body = evaluate(&details.template, context_inputs)
        .await
        .inspect_err(|e| error!("{}", e.describe()))?;

    validate_response(
        &body,
        &handler,
        details,
        &inputs.source_id,
        &request,
        inputs.page_fetch_limit_reached,
    )?;
    debug!("page generated");

    GenericResponse::from_value(body)
        .map_err(|e| Error::internal(format!("Failed to read validated response: {}", e)))
}

fn validate_response(
    body: &Value,
    handler: &RequestHandler,
    details: &ResponseDetails,
    source_id: &str,
    request: &GenericRequest,
    page_fetch_limit_reached: Option<bool>,
) -> InternalResult<()> {
    let message = format!(
        "The response returned from the request handler \"{}\" of the source \"{}\" is invalid",
        handler.id, source_id
    );
    let report = |e: crate::validation::ValidationError| {
        let e = e.with_message(message.clone());
        error!("{}", e);
        e
    };

    GenericResponseValidator::new(request.to_value(), source_id)
        .validate(body)
        .map_err(report)?;
    PaginationContract {
        handler_id: &handler.id,
        source_id,
        pagination_type: handler.pagination_type,
        page_fetch_limit_reached,
    }
    .check(body)?;
    details.validator.validate(body).map_err(report)?;
    Ok(())
}
