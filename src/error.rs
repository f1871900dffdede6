use thiserror::Error;

use crate::eval::context::ContextError;
use crate::eval::error::ConstructorExecutionError;
use crate::pagination::PaginationError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    // template evaluation
    #[error("{0}")]
    Execution(#[from] ConstructorExecutionError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Pagination error: {0}")]
    Pagination(#[from] PaginationError),
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
