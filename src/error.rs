//! Error types.
//!
//! Two kinds of failure exist and they never mix:
//!
//! - [`Error`] is raised while the registry is being assembled. It means the
//!   application is misconfigured and the process should not start serving.
//! - [`Failure`] is the terminal outcome of one request. Each variant maps to
//!   exactly one HTTP status via [`Failure::status`].
//!
//! Application code signals a classified failure from inside a handler by
//! returning a [`Rejection`] (directly or anywhere in its error's source
//! chain). Any other handler error is an unclassified server error.

use std::error::Error as StdError;

use http::StatusCode;
use thiserror::Error;

use crate::method::Method;
use crate::security::{AuthFailure, Challenge};

/// Boxed error used at the handler and provider seams.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Startup-time configuration error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path template `{template}`: {reason}")]
    Template { template: String, reason: String },

    #[error("invalid media type `{value}`: {reason}")]
    MediaType { value: String, reason: String },

    #[error("invalid HTTP method token `{0}`")]
    Method(String),

    #[error("duplicate route {method} {template}")]
    DuplicateRoute { method: Method, template: String },

    #[error("route {route}: {reason}")]
    Binding { route: String, reason: String },

    #[error("route {route}: no context registered for `{type_name}`")]
    MissingContext { route: String, type_name: &'static str },
}

/// Terminal per-request failure.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("not found: {0}")]
    NoRouteMatch(String),

    #[error("not acceptable: no producible type satisfies `{accept}`")]
    NotAcceptable { accept: String },

    #[error("unsupported media type `{content_type}`")]
    UnsupportedMediaType { content_type: String },

    #[error("authentication required")]
    Unauthenticated { challenges: Vec<Challenge> },

    #[error("forbidden: {reason}")]
    Forbidden { reason: String, challenges: Vec<Challenge> },

    #[error("bad request: {reason}")]
    BadRequest {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("handler failed: {0}")]
    Invocation(#[source] BoxError),
}

impl Failure {
    pub(crate) fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest { reason: reason.into(), source: None }
    }

    /// The HTTP status the boundary should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoRouteMatch(_)             => StatusCode::NOT_FOUND,
            Self::NotAcceptable { .. }        => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Unauthenticated { .. }      => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. }            => StatusCode::FORBIDDEN,
            Self::BadRequest { .. }           => StatusCode::BAD_REQUEST,
            Self::Configuration(_)            => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Invocation(_)               => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Authentication challenges attached to a security failure, if any.
    pub fn challenges(&self) -> &[Challenge] {
        match self {
            Self::Unauthenticated { challenges } | Self::Forbidden { challenges, .. } => challenges,
            _ => &[],
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// Classifies an error returned by a handler.
    ///
    /// The source chain is searched for a [`Rejection`]; the first one found
    /// decides the failure kind. Anything else is wrapped as
    /// [`Failure::Invocation`].
    pub(crate) fn from_handler(err: BoxError) -> Self {
        let mut rejection = None;
        let mut cause: Option<&(dyn StdError + 'static)> = Some(&*err);
        while let Some(e) = cause {
            if let Some(r) = e.downcast_ref::<Rejection>() {
                rejection = Some(r);
                break;
            }
            cause = e.source();
        }

        match rejection {
            Some(Rejection::NotFound(msg))             => Self::NoRouteMatch(msg.clone()),
            Some(Rejection::BadRequest(msg))           => Self::bad_request(msg.clone()),
            Some(Rejection::NotAcceptable(msg))        => Self::NotAcceptable { accept: msg.clone() },
            Some(Rejection::UnsupportedMediaType(msg)) => Self::UnsupportedMediaType { content_type: msg.clone() },
            Some(Rejection::Unauthenticated(challenges)) => Self::Unauthenticated { challenges: challenges.clone() },
            Some(Rejection::Forbidden(msg)) => Self::Forbidden { reason: msg.clone(), challenges: Vec::new() },
            None => Self::Invocation(err),
        }
    }
}

impl From<AuthFailure> for Failure {
    fn from(e: AuthFailure) -> Self {
        match e {
            AuthFailure::NotAuthenticated { challenges } => Self::Unauthenticated { challenges },
            AuthFailure::Forbidden { reason, challenges } => Self::Forbidden { reason, challenges },
        }
    }
}

/// A classified failure raised by application code inside a handler.
///
/// ```rust
/// use tenon::Rejection;
///
/// fn lookup(id: u64) -> Result<String, Rejection> {
///     Err(Rejection::NotFound(format!("user {id}")))
/// }
/// # assert!(lookup(1).is_err());
/// ```
#[derive(Debug, Clone, Error)]
pub enum Rejection {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("authentication required")]
    Unauthenticated(Vec<Challenge>),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("repository lookup failed")]
    struct Wrapped(#[source] Rejection);

    #[test]
    fn rejection_is_reclassified() {
        let f = Failure::from_handler(Box::new(Rejection::BadRequest("id".into())));
        assert_eq!(f.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn nested_rejection_is_found_in_source_chain() {
        let f = Failure::from_handler(Box::new(Wrapped(Rejection::NotFound("user 9".into()))));
        assert!(matches!(f, Failure::NoRouteMatch(ref m) if m == "user 9"));
    }

    #[test]
    fn unknown_error_is_server_error() {
        let err: BoxError = "disk on fire".into();
        let f = Failure::from_handler(err);
        assert!(matches!(f, Failure::Invocation(_)));
        assert!(f.is_server_error());
    }

    #[test]
    fn auth_failures_keep_challenges() {
        let f: Failure = AuthFailure::NotAuthenticated {
            challenges: vec![Challenge::new(None, "admin")],
        }
        .into();
        assert_eq!(f.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(f.challenges().len(), 1);
    }
}
