//! Resource manifests: the unit the dispatcher routes to.
//!
//! A [`ResourceManifest`] binds one HTTP method and one path template to a
//! handler, together with the media types it consumes and produces, its
//! resolved [`SecurityPolicy`] and its parameter list. Manifests are
//! immutable once built.
//!
//! Operations are usually grouped into a [`Resource`], whose base path,
//! security policy and media types act as defaults for every operation that
//! does not declare its own:
//!
//! ```rust
//! use tenon::{Args, BoxError, Method, Param, Resource, ResourceManifest, SecurityPolicy};
//!
//! async fn get_user(args: Args) -> Result<String, BoxError> {
//!     Ok(format!(r#"{{"id":"{}"}}"#, args.get::<&str>(0)?))
//! }
//!
//! let users = Resource::new("UserService")
//!     .path("/users")
//!     .produces("application/json")
//!     .security(SecurityPolicy::roles_allowed(["user"]))
//!     .operation(
//!         ResourceManifest::builder(Method::Get, "/{id}")
//!             .name("get")
//!             .param(Param::path("id"))
//!             .handler(get_user),
//!     );
//! let manifests = users.build().unwrap();
//! assert_eq!(manifests[0].template(), "/users/{id}");
//! ```

use std::fmt;

use http::header::{ACCEPT, CONTENT_TYPE};

use crate::config::Config;
use crate::error::{Error, Failure};
use crate::handler::{Args, BoxedHandler, Entity, Handler};
use crate::media::{MediaRange, Negotiated, negotiate_scored};
use crate::method::Method;
use crate::params::{Binding, Param};
use crate::path::{PathPattern, PathVars};
use crate::request::Request;
use crate::security::SecurityPolicy;

/// A bound operation.
pub struct ResourceManifest {
    method: Method,
    pattern: PathPattern,
    consumes: Vec<MediaRange>,
    produces: Vec<MediaRange>,
    security: SecurityPolicy,
    params: Vec<Param>,
    name: String,
    handler: BoxedHandler,
}

impl ResourceManifest {
    pub fn builder(method: Method, template: &str) -> ManifestBuilder {
        ManifestBuilder {
            method,
            template: template.to_owned(),
            consumes: Vec::new(),
            produces: Vec::new(),
            security: None,
            params: Vec::new(),
            name: None,
            handler: None,
        }
    }

    pub fn method(&self) -> &Method { &self.method }

    pub fn template(&self) -> &str { self.pattern.template() }

    pub fn pattern(&self) -> &PathPattern { &self.pattern }

    /// Declared consumable types; empty means any.
    pub fn consumes(&self) -> &[MediaRange] { &self.consumes }

    /// Declared producible types, in preference order; empty means any.
    pub fn produces(&self) -> &[MediaRange] { &self.produces }

    pub fn security(&self) -> &SecurityPolicy { &self.security }

    pub fn params(&self) -> &[Param] { &self.params }

    /// Handler name used in logs, e.g. `UserService::get`.
    pub fn name(&self) -> &str { &self.name }

    /// Runs the predicate chain against one request.
    ///
    /// Checks run cheapest first: method, path, consumes, produces. The
    /// returned [`Match`] records where the chain stopped.
    pub fn matches(&self, request: &Request, media: &RequestMedia) -> Match {
        if !self.method.matches_token(request.method()) {
            return Match::MethodMiss;
        }
        let Some(vars) = self.pattern.matches(request.path()) else {
            return Match::PathMiss;
        };

        let body_media = match media.content_type() {
            _ if self.consumes.is_empty() => media.content_type().cloned().unwrap_or_else(MediaRange::any),
            Some(content_type) if negotiate_scored(&self.consumes, std::slice::from_ref(content_type)).is_some() => {
                content_type.clone()
            }
            _ => return Match::ConsumesRejected,
        };

        let produced = if self.produces.is_empty() {
            negotiate_scored(std::slice::from_ref(&MediaRange::any()), media.accept())
        } else {
            negotiate_scored(&self.produces, media.accept())
        };
        let Some(produced) = produced else {
            return Match::ProducesRejected;
        };

        Match::Matched(Matched { vars, produced, request_media: body_media })
    }

    /// Calls the handler. A handler error is classified into a [`Failure`].
    pub async fn invoke(&self, args: Args) -> Result<Entity, Failure> {
        self.handler.call(args).await.map_err(Failure::from_handler)
    }

    /// Two manifests that would always match the same requests.
    pub(crate) fn conflicts_with(&self, other: &Self) -> bool {
        self.method == other.method
            && self.pattern.signature() == other.pattern.signature()
            && self.consumes == other.consumes
            && self.produces == other.produces
    }
}

impl fmt::Debug for ResourceManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManifest")
            .field("method", &self.method)
            .field("template", &self.pattern.template())
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .field("security", &self.security)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ResourceManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

/// Media facts of one request, parsed once and shared by every candidate.
#[derive(Clone, Debug)]
pub struct RequestMedia {
    content_type: Option<MediaRange>,
    accept: Vec<MediaRange>,
}

impl RequestMedia {
    /// A missing `Content-Type` becomes the configured default. A malformed
    /// or non-text one matches only routes that consume anything. A missing
    /// or blank `Accept` becomes `*/*`; malformed or non-text `Accept`
    /// entries are dropped, and a header with none left accepts nothing.
    pub fn from_request(request: &Request, config: &Config) -> Self {
        let headers = request.headers();
        let content_type = match headers.get(CONTENT_TYPE) {
            Some(value) => value.to_str().ok().and_then(|v| MediaRange::parse(v).ok()),
            None => Some(config.default_content_type().clone()),
        };

        let present: Vec<_> = headers
            .get_all(ACCEPT)
            .iter()
            .filter(|v| !v.as_bytes().trim_ascii().is_empty())
            .collect();
        let accept = if present.is_empty() {
            vec![MediaRange::any()]
        } else {
            MediaRange::parse_header(present.iter().filter_map(|v| v.to_str().ok()))
        };

        Self { content_type, accept }
    }

    pub fn content_type(&self) -> Option<&MediaRange> {
        self.content_type.as_ref()
    }

    pub fn accept(&self) -> &[MediaRange] {
        &self.accept
    }

    /// The raw `Accept` ranges, for diagnostics.
    pub(crate) fn accept_display(&self) -> String {
        self.accept.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    }
}

/// How far a request got through [`ResourceManifest::matches`].
#[derive(Debug)]
pub enum Match {
    MethodMiss,
    PathMiss,
    ConsumesRejected,
    ProducesRejected,
    Matched(Matched),
}

/// A full match.
#[derive(Debug)]
pub struct Matched {
    pub vars: PathVars,
    /// The negotiated response type and its score.
    pub produced: Negotiated,
    /// The request's actual media type, handed to body readers. `*/*` when
    /// the route consumes anything and the header could not be read.
    pub request_media: MediaRange,
}

// ── Builders ──────────────────────────────────────────────────────────────────

/// Builder for one [`ResourceManifest`].
pub struct ManifestBuilder {
    method: Method,
    template: String,
    consumes: Vec<String>,
    produces: Vec<String>,
    security: Option<SecurityPolicy>,
    params: Vec<Param>,
    name: Option<String>,
    handler: Option<(BoxedHandler, &'static str)>,
}

impl ManifestBuilder {
    /// Adds consumable types. A value may hold several, comma-separated.
    pub fn consumes(mut self, media: &str) -> Self {
        self.consumes.push(media.to_owned());
        self
    }

    /// Adds producible types, most preferred first.
    pub fn produces(mut self, media: &str) -> Self {
        self.produces.push(media.to_owned());
        self
    }

    /// Overrides the resource-level policy.
    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.security = Some(policy);
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some((handler.into_boxed_handler(), std::any::type_name::<H>()));
        self
    }

    /// Builds a standalone manifest.
    pub fn build(self) -> Result<ResourceManifest, Error> {
        self.build_in(&ResourceDefaults::default())
    }

    fn build_in(self, defaults: &ResourceDefaults) -> Result<ResourceManifest, Error> {
        let template = join(&defaults.path, &self.template);
        let route = format!("{} {template}", self.method);
        let binding = |reason: String| Error::Binding { route: route.clone(), reason };

        let pattern = PathPattern::compile(&template)?;
        let consumes = declared(&self.consumes, &defaults.consumes)?;
        let produces = declared(&self.produces, &defaults.produces)?;
        let security = SecurityPolicy::resolve(self.security.as_ref(), defaults.security.as_ref());

        let (handler, type_name) = self.handler.ok_or_else(|| binding("no handler".to_owned()))?;

        if self.params.iter().filter(|p| p.is_body()).count() > 1 {
            return Err(binding("more than one body parameter".to_owned()));
        }
        for param in &self.params {
            if let Binding::Path(name) = param.binding() {
                if !pattern.has_variable(name) {
                    return Err(binding(format!("path parameter `{name}` is not in the template")));
                }
            }
            param.validate().map_err(binding)?;
        }

        let op = self.name.unwrap_or_else(|| short_name(type_name).to_owned());
        let name = match &defaults.name {
            Some(resource) => format!("{resource}::{op}"),
            None => op,
        };

        Ok(ResourceManifest {
            method: self.method,
            pattern,
            consumes,
            produces,
            security,
            params: self.params,
            name,
            handler,
        })
    }
}

#[derive(Default)]
struct ResourceDefaults {
    name: Option<String>,
    path: String,
    consumes: Vec<String>,
    produces: Vec<String>,
    security: Option<SecurityPolicy>,
}

/// A group of operations sharing a base path and defaults.
pub struct Resource {
    defaults: ResourceDefaults,
    operations: Vec<ManifestBuilder>,
}

impl Resource {
    pub fn new(name: &str) -> Self {
        Self {
            defaults: ResourceDefaults { name: Some(name.to_owned()), ..ResourceDefaults::default() },
            operations: Vec::new(),
        }
    }

    /// Base path prefixed to every operation's template.
    pub fn path(mut self, base: &str) -> Self {
        self.defaults.path = base.to_owned();
        self
    }

    /// Policy for operations that declare none.
    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.defaults.security = Some(policy);
        self
    }

    /// Consumable types for operations that declare none.
    pub fn consumes(mut self, media: &str) -> Self {
        self.defaults.consumes.push(media.to_owned());
        self
    }

    /// Producible types for operations that declare none.
    pub fn produces(mut self, media: &str) -> Self {
        self.defaults.produces.push(media.to_owned());
        self
    }

    pub fn operation(mut self, op: ManifestBuilder) -> Self {
        self.operations.push(op);
        self
    }

    /// Builds every operation, in declaration order.
    pub fn build(self) -> Result<Vec<ResourceManifest>, Error> {
        let defaults = self.defaults;
        self.operations.into_iter().map(|op| op.build_in(&defaults)).collect()
    }
}

/// Operation-level media types replace the resource's, never merge.
fn declared(own: &[String], inherited: &[String]) -> Result<Vec<MediaRange>, Error> {
    if own.is_empty() {
        MediaRange::parse_declared(inherited)
    } else {
        MediaRange::parse_declared(own)
    }
}

fn join(base: &str, template: &str) -> String {
    let base = base.trim_end_matches('/');
    let template = template.trim_start_matches('/');
    match (base.is_empty(), template.is_empty()) {
        (true, _) => format!("/{template}"),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{template}"),
    }
}

/// `demo::users::get_user` → `get_user`.
fn short_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}
