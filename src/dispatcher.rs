//! Per-request dispatch.
//!
//! # The state machine
//!
//! ```text
//! Received → MethodFiltered → PathMatched → ContentNegotiated
//!          → Authorized → ArgumentsResolved → Invoked → Completed
//! ```
//!
//! Every arrow is one component call and the first failing one ends the
//! request with its [`Failure`]. Nothing is retried.
//!
//! When no candidate fully matches, the dispatcher still knows how far the
//! best one got: no path match at all is [`Failure::NoRouteMatch`], a
//! candidate that accepted the body but could not satisfy `Accept` is
//! [`Failure::NotAcceptable`], and anything else is
//! [`Failure::UnsupportedMediaType`].
//!
//! # Cancellation
//!
//! A dispatch is an ordinary future. Dropping it (client gone, timeout)
//! drops the request body and any partially read buffer with it; the shared
//! registry is never touched.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body as HttpBody;
use hyper::service::Service;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{BoxError, Error, Failure};
use crate::handler::Entity;
use crate::manifest::{Match, Matched, RequestMedia, ResourceManifest};
use crate::media::MediaRange;
use crate::params::{self, Binding, Sources};
use crate::providers::{ContextLookup, Providers};
use crate::registry::Registry;
use crate::request::Request;
use crate::response;

/// The successful result of one dispatch.
#[derive(Debug)]
pub struct Outcome {
    /// What the handler returned.
    pub entity: Entity,
    /// The negotiated response type.
    pub media: MediaRange,
    /// Name of the operation that handled the request.
    pub route: String,
}

/// Routes requests to the registered operations.
///
/// Cheap to clone; every clone shares the same frozen registry.
///
/// ```rust
/// use tenon::{Args, BoxError, Config, Contexts, Dispatcher, Method, Providers, Registry, Request, ResourceManifest};
///
/// async fn hello(_: Args) -> Result<&'static str, BoxError> { Ok("hi") }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Registry::new()
///     .register(ResourceManifest::builder(Method::Get, "/").produces("text/plain").handler(hello).build()?)?;
/// let dispatcher = Dispatcher::new(registry, Providers::with_defaults(), Contexts::new(), Config::default())?;
///
/// let outcome = dispatcher.dispatch(Request::builder().uri("/").build()).await?;
/// assert_eq!(outcome.media.essence(), "text/plain");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    providers: Providers,
    contexts: Arc<dyn ContextLookup>,
    config: Config,
}

impl Dispatcher {
    /// Freezes the registry.
    ///
    /// Fails if an operation binds a context type nobody registered.
    pub fn new(
        registry: Registry,
        providers: Providers,
        contexts: impl ContextLookup + 'static,
        config: Config,
    ) -> Result<Self, Error> {
        for manifest in registry.iter() {
            for param in manifest.params() {
                if let Binding::Context { type_id, type_name } = param.binding() {
                    if contexts.lookup(*type_id).is_none() {
                        return Err(Error::MissingContext { route: manifest.to_string(), type_name: *type_name });
                    }
                }
            }
        }

        debug!(routes = registry.len(), "dispatcher ready");
        Ok(Self { inner: Arc::new(Inner { registry, providers, contexts: Arc::new(contexts), config }) })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn providers(&self) -> &Providers {
        &self.inner.providers
    }

    /// Runs one request through the state machine.
    pub async fn dispatch(&self, request: Request) -> Result<Outcome, Failure> {
        let method = request.method().to_owned();
        let path = request.path().to_owned();

        let result = self.run(request).await;
        match &result {
            Ok(outcome) => debug!(%method, %path, route = %outcome.route, "completed"),
            Err(failure) if failure.is_server_error() => {
                warn!(%method, %path, status = %failure.status(), error = %failure, "request failed");
            }
            Err(failure) => debug!(%method, %path, status = %failure.status(), error = %failure, "request rejected"),
        }
        result
    }

    async fn run(&self, mut request: Request) -> Result<Outcome, Failure> {
        let inner = &*self.inner;

        let candidates = inner.registry.candidates_for_token(request.method());
        debug!(candidates = candidates.len(), "method filtered");

        let media = RequestMedia::from_request(&request, &inner.config);
        let (manifest, matched) = select(candidates, &request, &media)?;
        debug!(route = manifest.name(), content_type = %matched.produced.media, "content negotiated");

        manifest.security().authorize(request.security())?;
        debug!(policy = ?manifest.security(), "authorized");

        let Matched { vars, produced, request_media } = matched;
        let sources = Sources {
            vars: &vars,
            body_media: &request_media,
            providers: &inner.providers,
            contexts: &*inner.contexts,
            body_limit: inner.config.body_limit(),
        };
        let args = params::resolve(manifest.params(), &mut request, sources).await?;
        debug!(args = args.len(), "arguments resolved");

        let entity = manifest.invoke(args).await?;
        debug!(entity = entity.type_name(), "invoked");

        Ok(Outcome { entity, media: produced.media, route: manifest.name().to_owned() })
    }

    /// Dispatches an `http::Request` and renders the result, success or not.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self.dispatch(Request::from_http(req)).await {
            Ok(outcome) => response::render(outcome, &self.inner.providers),
            Err(failure) => response::failure(&failure),
        }
    }
}

/// Picks the best fully matching manifest, or the most specific failure.
fn select<'a>(
    candidates: &'a [ResourceManifest],
    request: &Request,
    media: &RequestMedia,
) -> Result<(&'a ResourceManifest, Matched), Failure> {
    let mut best: Option<(&ResourceManifest, Matched)> = None;
    let mut path_matched = false;
    let mut consumes_passed = false;

    for manifest in candidates {
        match manifest.matches(request, media) {
            Match::MethodMiss | Match::PathMiss => {}
            Match::ConsumesRejected => path_matched = true,
            Match::ProducesRejected => {
                path_matched = true;
                consumes_passed = true;
            }
            Match::Matched(found) => {
                // Strictly greater: the earlier registration keeps a tie.
                if best.as_ref().is_none_or(|(_, b)| found.produced.score > b.produced.score) {
                    best = Some((manifest, found));
                }
            }
        }
    }

    if let Some(best) = best {
        return Ok(best);
    }
    if !path_matched {
        return Err(Failure::NoRouteMatch(format!("{} {}", request.method(), request.path())));
    }
    if consumes_passed {
        return Err(Failure::NotAcceptable { accept: media.accept_display() });
    }
    Err(Failure::UnsupportedMediaType {
        content_type: request
            .headers()
            .get(http::header::CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default(),
    })
}

impl<B> Service<http::Request<B>> for Dispatcher
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Args;
    use crate::method::Method;
    use crate::params::Param;
    use crate::providers::Contexts;

    async fn name(_: Args) -> Result<&'static str, BoxError> {
        Ok("x")
    }

    #[test]
    fn unregistered_context_fails_at_build() {
        struct Pool;
        let registry = Registry::new()
            .register(
                ResourceManifest::builder(Method::Get, "/")
                    .param(Param::context::<Pool>())
                    .handler(name)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let err = Dispatcher::new(registry, Providers::new(), Contexts::new(), Config::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingContext { .. }));
    }

    #[tokio::test]
    async fn higher_produces_score_wins_over_registration_order() {
        let wild = ResourceManifest::builder(Method::Get, "/r").produces("text/*").name("wild").handler(name);
        let exact = ResourceManifest::builder(Method::Get, "/r").produces("text/plain").name("exact").handler(name);
        let registry = Registry::new()
            .register(wild.build().unwrap())
            .unwrap()
            .register(exact.build().unwrap())
            .unwrap();
        let d = Dispatcher::new(registry, Providers::with_defaults(), Contexts::new(), Config::default()).unwrap();

        let req = Request::builder().uri("/r").header("accept", "text/plain").build();
        assert_eq!(d.dispatch(req).await.unwrap().route, "exact");
    }

    #[tokio::test]
    async fn service_renders_failures() {
        let d = Dispatcher::new(Registry::new(), Providers::new(), Contexts::new(), Config::default()).unwrap();
        let req = http::Request::builder().uri("/nothing").body(Full::new(Bytes::new())).unwrap();
        let res = d.call(req).await.unwrap();
        assert_eq!(res.status(), http::StatusCode::NOT_FOUND);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn dispatch_runs_on_its_own_task() {
        async fn echo(mut args: Args) -> Result<String, BoxError> {
            let body: String = args.take_body(2)?;
            Ok(format!("{}:{}:{body}", args.get::<&str>(0)?, args.get::<Option<&str>>(1)?.unwrap_or("-")))
        }
        let registry = Registry::new()
            .register(
                ResourceManifest::builder(Method::Post, "/echo/{id}")
                    .consumes("text/plain")
                    .param(Param::path("id"))
                    .param(Param::query("tag"))
                    .param(Param::body::<String>())
                    .handler(echo)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let d = Dispatcher::new(registry, Providers::with_defaults(), Contexts::new(), Config::default()).unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/echo/7?tag=t")
            .header("content-type", "text/plain")
            .body("hi")
            .build();
        assert_send(&d.dispatch(Request::builder().build()));

        let task = tokio::spawn(async move { d.dispatch(req).await });
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.entity.downcast_ref::<String>().map(String::as_str), Some("7:t:hi"));
    }
}
