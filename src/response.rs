//! Turning dispatch results into HTTP responses.
//!
//! A successful [`Outcome`] is serialized by the first registered
//! [`BodyWriter`](crate::BodyWriter) that accepts the entity's type and the
//! negotiated media type. A [`Failure`] becomes a short `text/plain` body
//! with the failure's status; server-class failures only show the reason
//! phrase so internal errors never reach the client.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use http::StatusCode;
use http_body_util::Full;
use tracing::warn;

use crate::dispatcher::Outcome;
use crate::error::Failure;
use crate::providers::Providers;

/// The response type produced at the boundary.
pub type Response = http::Response<Full<Bytes>>;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Serializes an outcome. A missing writer or a failing one becomes a 500.
pub fn render(outcome: Outcome, providers: &Providers) -> Response {
    let route = outcome.route.clone();
    match write(outcome, providers) {
        Ok(res) => res,
        Err(f) => {
            warn!(%route, error = %f, "response could not be written");
            failure(&f)
        }
    }
}

fn write(outcome: Outcome, providers: &Providers) -> Result<Response, Failure> {
    let Outcome { entity, media, .. } = outcome;
    let Some(value) = entity.value() else {
        return Ok(status_only(StatusCode::NO_CONTENT));
    };

    let writer = providers.writer_for(entity.type_id(), &media).ok_or_else(|| {
        Failure::Configuration(format!("no body writer for `{}` as `{media}`", entity.type_name()))
    })?;

    let mut headers = HeaderMap::new();
    let body = writer.write_to(value, &media, &mut headers).map_err(Failure::Invocation)?;

    if !headers.contains_key(CONTENT_TYPE) {
        let content_type = if media.specificity() == 2 { media.to_string() } else { FALLBACK_CONTENT_TYPE.to_owned() };
        let value = HeaderValue::try_from(content_type)
            .map_err(|e| Failure::Configuration(format!("unusable content type `{media}`: {e}")))?;
        headers.insert(CONTENT_TYPE, value);
    }

    let mut res = http::Response::new(Full::new(body));
    *res.headers_mut() = headers;
    Ok(res)
}

/// Renders a failure with its status and any authentication challenges,
/// one `WWW-Authenticate` header per challenge.
pub fn failure(f: &Failure) -> Response {
    let status = f.status();
    let body = if f.is_server_error() {
        status.canonical_reason().unwrap_or_default().to_owned()
    } else {
        f.to_string()
    };

    let mut builder = http::Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8");
    for challenge in f.challenges() {
        builder = builder.header(WWW_AUTHENTICATE, challenge.to_string());
    }

    builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR))
}

fn status_only(status: StatusCode) -> Response {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}
