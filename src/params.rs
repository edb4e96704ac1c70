//! Parameter binding.
//!
//! Each operation declares an ordered list of [`Param`]s. At request time the
//! resolver turns them into an [`Args`] list, one [`Arg`] per parameter:
//!
//! | binding  | source                                   | absent            |
//! |----------|------------------------------------------|-------------------|
//! | path     | variable bound by the path template      | route defect, 404 |
//! | query    | decoded query string                     | default or `Null` |
//! | matrix   | `;k=v` on the last path segment          | default or `Null` |
//! | header   | request header, case-insensitive         | default or `Null` |
//! | cookie   | `Cookie` header                          | default or `Null` |
//! | context  | registered [`Contexts`](crate::Contexts) | checked at build  |
//! | body     | request body through a [`BodyReader`]    | reader decides    |
//!
//! List parameters collect every occurrence and are empty rather than
//! `Null` when absent.

use std::any::{Any, TypeId, type_name};
use std::fmt;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::debug;

use crate::error::{BoxError, Failure};
use crate::handler::{Arg, Args};
use crate::media::MediaRange;
use crate::path::PathVars;
use crate::providers::{BodyReader, BodyValue, ContextLookup, Providers};
use crate::request::Request;

/// The scalar type a textual parameter is converted to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scalar {
    #[default]
    Str,
    I64,
    U64,
    F64,
    Bool,
}

impl Scalar {
    fn name(self) -> &'static str {
        match self {
            Self::Str  => "string",
            Self::I64  => "i64",
            Self::U64  => "u64",
            Self::F64  => "f64",
            Self::Bool => "bool",
        }
    }

    fn convert(self, raw: &str) -> Result<Arg, BoxError> {
        Ok(match self {
            Self::Str  => Arg::Str(raw.to_owned()),
            Self::I64  => Arg::Int(raw.trim().parse()?),
            Self::U64  => Arg::UInt(raw.trim().parse()?),
            Self::F64  => Arg::Float(raw.trim().parse()?),
            Self::Bool => Arg::Bool(parse_bool(raw.trim())?),
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool, BoxError> {
    if raw.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("`{raw}` is neither true nor false").into())
    }
}

/// Where a parameter's value comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Path(String),
    Query(String),
    Matrix(String),
    Header(String),
    Cookie(String),
    Context { type_id: TypeId, type_name: &'static str },
    Body { type_id: TypeId, type_name: &'static str },
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(n)   => write!(f, "path parameter `{n}`"),
            Self::Query(n)  => write!(f, "query parameter `{n}`"),
            Self::Matrix(n) => write!(f, "matrix parameter `{n}`"),
            Self::Header(n) => write!(f, "header `{n}`"),
            Self::Cookie(n) => write!(f, "cookie `{n}`"),
            Self::Context { type_name, .. } => write!(f, "context `{type_name}`"),
            Self::Body { type_name, .. }    => write!(f, "body `{type_name}`"),
        }
    }
}

/// A declared handler parameter.
///
/// ```rust
/// use tenon::{Param, Scalar};
///
/// let params = [
///     Param::path("id").of(Scalar::U64),
///     Param::query("tag").list(),
///     Param::query("limit").of(Scalar::U64).default("20"),
///     Param::body::<String>(),
/// ];
/// # let _ = params;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    binding: Binding,
    scalar: Scalar,
    list: bool,
    default: Option<String>,
}

impl Param {
    fn named(binding: Binding) -> Self {
        Self { binding, scalar: Scalar::Str, list: false, default: None }
    }

    pub fn path(name: &str) -> Self {
        Self::named(Binding::Path(name.to_owned()))
    }

    pub fn query(name: &str) -> Self {
        Self::named(Binding::Query(name.to_owned()))
    }

    pub fn matrix(name: &str) -> Self {
        Self::named(Binding::Matrix(name.to_owned()))
    }

    pub fn header(name: &str) -> Self {
        Self::named(Binding::Header(name.to_ascii_lowercase()))
    }

    pub fn cookie(name: &str) -> Self {
        Self::named(Binding::Cookie(name.to_owned()))
    }

    /// A shared object looked up by type in the registered contexts.
    pub fn context<T: Any + Send + Sync>() -> Self {
        Self::named(Binding::Context { type_id: TypeId::of::<T>(), type_name: type_name::<T>() })
    }

    /// The request body, read into a `T` by a registered [`BodyReader`].
    pub fn body<T: Any + Send>() -> Self {
        Self::named(Binding::Body { type_id: TypeId::of::<T>(), type_name: type_name::<T>() })
    }

    /// Converts the textual value to `scalar`. Strings by default.
    pub fn of(mut self, scalar: Scalar) -> Self {
        self.scalar = scalar;
        self
    }

    /// Collects every occurrence into an [`Arg::List`].
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Used when the value is absent.
    pub fn default(mut self, value: &str) -> Self {
        self.default = Some(value.to_owned());
        self
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn is_body(&self) -> bool {
        matches!(self.binding, Binding::Body { .. })
    }

    /// Checks the declaration itself: the default must convert, and
    /// context and body parameters take no textual options.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if matches!(self.binding, Binding::Context { .. } | Binding::Body { .. })
            && (self.default.is_some() || self.list || self.scalar != Scalar::Str)
        {
            return Err(format!("{} cannot have a default, list or scalar type", self.binding));
        }
        if let Some(default) = &self.default {
            self.scalar
                .convert(default)
                .map_err(|e| format!("default for {} is not a valid {}: {e}", self.binding, self.scalar.name()))?;
        }
        Ok(())
    }

    fn convert<'r>(&self, mut values: impl Iterator<Item = &'r str>) -> Result<Arg, Failure> {
        let convert_one = |raw: &str| {
            self.scalar.convert(raw).map_err(|e| Failure::BadRequest {
                reason: format!("{}: `{raw}` is not a valid {}", self.binding, self.scalar.name()),
                source: Some(e),
            })
        };

        if self.list {
            let mut items: Vec<Arg> = values.map(convert_one).collect::<Result<_, _>>()?;
            if items.is_empty() {
                if let Some(default) = &self.default {
                    items.push(convert_one(default)?);
                }
            }
            return Ok(Arg::List(items));
        }

        match values.next().or(self.default.as_deref()) {
            Some(raw) => convert_one(raw),
            None => Ok(Arg::Null),
        }
    }
}

/// Everything the resolver reads besides the request itself.
pub(crate) struct Sources<'a> {
    pub vars: &'a PathVars,
    pub body_media: &'a MediaRange,
    pub providers: &'a Providers,
    pub contexts: &'a dyn ContextLookup,
    pub body_limit: usize,
}

/// Resolves every parameter in order. The first failure ends resolution.
pub(crate) async fn resolve(params: &[Param], request: &mut Request, src: Sources<'_>) -> Result<Args, Failure> {
    let mut args = Vec::with_capacity(params.len());

    for param in params {
        let arg = match &param.binding {
            Binding::Body { type_id, type_name } => {
                let reader = src.providers.reader_for(*type_id, src.body_media).ok_or_else(|| {
                    Failure::Configuration(format!("no body reader for `{type_name}` as `{}`", src.body_media))
                })?;
                let value = read_body(reader, *type_id, type_name, request, &src).await?;
                Arg::Body(value)
            }
            _ => resolve_plain(param, request, &src)?,
        };
        args.push(arg);
    }

    Ok(Args::new(args))
}

/// Every binding that needs no I/O.
fn resolve_plain(param: &Param, request: &Request, src: &Sources<'_>) -> Result<Arg, Failure> {
    match &param.binding {
        Binding::Path(name) => {
            let raw = src
                .vars
                .get(name)
                .ok_or_else(|| Failure::NoRouteMatch(format!("path variable `{name}` is not bound")))?;
            param.convert(std::iter::once(raw))
        }
        Binding::Query(name)  => param.convert(request.query_all(name)),
        Binding::Matrix(name) => param.convert(request.matrix_all(name)),
        Binding::Header(name) => param.convert(request.header_all(name)),
        Binding::Cookie(name) => param.convert(request.cookie(name).into_iter()),
        Binding::Context { type_id, type_name } => src
            .contexts
            .lookup(*type_id)
            .map(Arg::Context)
            .ok_or_else(|| Failure::Configuration(format!("no context registered for `{type_name}`"))),
        Binding::Body { type_name, .. } => {
            Err(Failure::Configuration(format!("body parameter `{type_name}` needs the request stream")))
        }
    }
}

async fn read_body(
    reader: &dyn BodyReader,
    type_id: TypeId,
    type_name: &str,
    request: &mut Request,
    src: &Sources<'_>,
) -> Result<BodyValue, Failure> {
    let bytes = collect_limited(request, src.body_limit).await?;
    debug!(bytes = bytes.len(), media = %src.body_media, "read request body");

    reader
        .read_from(type_id, src.body_media, request.headers(), bytes)
        .map_err(|e| Failure::BadRequest {
            reason: format!("malformed `{}` body for `{type_name}`", src.body_media),
            source: Some(e),
        })
}

async fn collect_limited(request: &mut Request, limit: usize) -> Result<Bytes, Failure> {
    let body = request.take_body();
    match Limited::new(body, limit).boxed_unsync().collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            Err(Failure::bad_request(format!("request body exceeds {limit} bytes")))
        }
        Err(e) => Err(Failure::BadRequest { reason: "failed to read request body".to_owned(), source: Some(e) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathPattern;
    use crate::providers::Contexts;

    struct Fixture {
        vars: PathVars,
        media: MediaRange,
        providers: Providers,
        contexts: Contexts,
    }

    impl Fixture {
        fn new(template: &str, path: &str) -> Self {
            Self {
                vars: PathPattern::compile(template).unwrap().matches(path).unwrap(),
                media: MediaRange::text_plain(),
                providers: Providers::with_defaults(),
                contexts: Contexts::new(),
            }
        }

        fn sources(&self) -> Sources<'_> {
            Sources {
                vars: &self.vars,
                body_media: &self.media,
                providers: &self.providers,
                contexts: &self.contexts,
                body_limit: 16,
            }
        }
    }

    #[test]
    fn resolution_future_is_send() {
        fn assert_send<T: Send>(_: T) {}
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().build();
        let params = [Param::query("q"), Param::header("x-id"), Param::body::<String>()];
        assert_send(resolve(&params, &mut req, fx.sources()));
    }

    #[tokio::test]
    async fn path_and_query_bindings() {
        let fx = Fixture::new("/users/{id}", "/users/42");
        let mut req = Request::builder().uri("/users/42?page=3&tag=a&tag=b").build();
        let params = [
            Param::path("id"),
            Param::query("page").of(Scalar::U64),
            Param::query("tag").list(),
            Param::query("missing"),
        ];
        let args = resolve(&params, &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.get::<&str>(0), Ok("42"));
        assert_eq!(args.get::<u64>(1), Ok(3));
        assert_eq!(args.get::<&[Arg]>(2).unwrap().len(), 2);
        assert_eq!(args.get::<Option<&str>>(3), Ok(None));
    }

    #[tokio::test]
    async fn defaults_fill_absent_values() {
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().build();
        let params = [
            Param::query("limit").of(Scalar::I64).default("20"),
            Param::header("x-verbose").of(Scalar::Bool).default("false"),
            Param::matrix("year").list().default("2016"),
        ];
        let args = resolve(&params, &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.get::<i64>(0), Ok(20));
        assert_eq!(args.get::<bool>(1), Ok(false));
        assert_eq!(args.get::<&[Arg]>(2).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conversion_failure_is_bad_request_tagged_with_source() {
        let fx = Fixture::new("/users/{id}", "/users/abc");
        let mut req = Request::builder().uri("/users/abc").build();
        let err = resolve(&[Param::path("id").of(Scalar::U64)], &mut req, fx.sources()).await.unwrap_err();
        let Failure::BadRequest { reason, source } = err else {
            panic!("expected BadRequest, got {err:?}");
        };
        assert!(reason.starts_with("path parameter `id`"), "{reason}");
        assert!(source.is_some());
    }

    #[tokio::test]
    async fn unbound_path_variable_is_not_found() {
        let fx = Fixture::new("/users", "/users");
        let mut req = Request::builder().uri("/users").build();
        let err = resolve(&[Param::path("id")], &mut req, fx.sources()).await.unwrap_err();
        assert!(matches!(err, Failure::NoRouteMatch(_)));
    }

    #[tokio::test]
    async fn header_and_cookie_bindings() {
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder()
            .header("X-Request-Id", "r-1")
            .header("cookie", "session=abc")
            .build();
        let params = [Param::header("x-request-id"), Param::cookie("session")];
        let args = resolve(&params, &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.get::<&str>(0), Ok("r-1"));
        assert_eq!(args.get::<&str>(1), Ok("abc"));
    }

    #[tokio::test]
    async fn body_is_read_by_a_registered_reader() {
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().body("hello").build();
        let mut args = resolve(&[Param::body::<String>()], &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.take_body::<String>(0).unwrap(), "hello");
    }

    #[tokio::test]
    async fn empty_body_still_reaches_the_reader() {
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().build();
        let mut args = resolve(&[Param::body::<String>()], &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.take_body::<String>(0).unwrap(), "");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().body("far more than sixteen bytes").build();
        let err = resolve(&[Param::body::<String>()], &mut req, fx.sources()).await.unwrap_err();
        assert!(matches!(err, Failure::BadRequest { .. }));
    }

    #[tokio::test]
    async fn missing_reader_is_configuration_error() {
        struct Unreadable;
        let fx = Fixture::new("/", "/");
        let mut req = Request::builder().body("x").build();
        let err = resolve(&[Param::body::<Unreadable>()], &mut req, fx.sources()).await.unwrap_err();
        assert!(matches!(err, Failure::Configuration(_)));
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn context_binding() {
        struct Db(u8);
        let mut fx = Fixture::new("/", "/");
        fx.contexts = Contexts::new().insert(Db(3));
        let mut req = Request::builder().build();
        let args = resolve(&[Param::context::<Db>()], &mut req, fx.sources()).await.unwrap();
        assert_eq!(args.context::<Db>(0).unwrap().0, 3);
    }

    #[test]
    fn invalid_default_is_rejected_at_declaration() {
        assert!(Param::query("n").of(Scalar::U64).default("-1").validate().is_err());
        assert!(Param::body::<String>().default("x").validate().is_err());
        assert!(Param::query("n").of(Scalar::F64).default("1.5").validate().is_ok());
    }
}
