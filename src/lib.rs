//! # media-finder
//!
//! Declarative media search. A [`Source`] offers [`RequestHandler`]s whose
//! responses are described as [`Template`]s: nested maps and lists whose
//! leaves are either constants or asynchronous [`Action`]s. Evaluating a
//! template against a request produces one page of media; a [`Query`]
//! pages through a handler until it reports its last page or the page
//! budget runs out.
//!
//! ```no_run
//! use media_finder::{GenericRequest, MediaFinder, QueryOptions};
//!
//! # async fn run(finder: MediaFinder) -> media_finder::InternalResult<()> {
//! let mut query = finder.query(GenericRequest::new("example", "search"), QueryOptions::default());
//! while let Some(page) = query.next().await? {
//!     println!("{} media", page.media.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod eval;
pub mod finder;
pub mod generate;
pub mod handler;
pub mod helpers;
pub mod hooks;
pub mod pagination;
pub mod request;
pub mod response;
pub mod validation;

// Re-exports
pub use config::{FinderConfig, QueryOptions, Secrets};
pub use error::*;
pub use eval::{
    Action, ActionOutput, ConstructorExecutionError, EvalError, ExecutionContext, ObjectTemplate,
    Template, TemplatePath, Value, ValueMap, action, evaluate,
};
pub use finder::MediaFinder;
pub use handler::{Plugin, RequestHandler, ResponseDetails, Source};
pub use hooks::{Hook, Hooks, hook};
pub use pagination::{DriverState, PaginationError, Query};
pub use request::{Cursor, GenericRequest};
pub use response::{GenericResponse, Page, PaginationType};
pub use validation::{ResponseValidator, ValidationError, ValidationIssue};
