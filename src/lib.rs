//! # tenon
//!
//! The resource dispatch core of a REST framework: URI templates, media type
//! negotiation, role-based access policies and handler argument binding.
//!
//! ## The contract
//!
//! tenon decides *which* operation handles a request and *what* it is called
//! with. It does not accept connections, terminate TLS or discover handlers
//! by scanning code. A transport hands it requests; an application hands it
//! an explicit registration table.
//!
//! Per request it:
//!
//! - filters operations by method and [path template](PathPattern)
//! - negotiates `Content-Type` against `consumes` and `Accept` against
//!   `produces` ([`negotiate`])
//! - checks the operation's [`SecurityPolicy`]
//! - resolves handler arguments from path, query, matrix, header, cookie,
//!   context and body ([`Param`])
//! - invokes the handler and classifies its failure ([`Failure`])
//!
//! The registry is built once at startup and only read afterwards, so
//! requests share it without locks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tenon::{Args, BoxError, Config, Contexts, Dispatcher, Method, Param, Providers, Registry,
//!             Request, Resource, ResourceManifest, SecurityPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = Resource::new("UserService")
//!         .path("/users")
//!         .produces("application/json")
//!         .operation(
//!             ResourceManifest::builder(Method::Get, "/{id}")
//!                 .name("get")
//!                 .param(Param::path("id"))
//!                 .handler(get_user),
//!         )
//!         .operation(
//!             ResourceManifest::builder(Method::Delete, "/{id}")
//!                 .name("delete")
//!                 .security(SecurityPolicy::roles_allowed(["admin"]))
//!                 .param(Param::path("id"))
//!                 .handler(delete_user),
//!         );
//!
//!     let registry = Registry::new().mount(users)?;
//!     let dispatcher = Dispatcher::new(registry, Providers::with_defaults(), Contexts::new(), Config::default())?;
//!
//!     let req = Request::builder().uri("/users/42").header("accept", "application/json").build();
//!     let outcome = dispatcher.dispatch(req).await?;
//!     assert_eq!(outcome.route, "UserService::get");
//!     Ok(())
//! }
//!
//! async fn get_user(args: Args) -> Result<String, BoxError> {
//!     let id: &str = args.get(0)?;
//!     Ok(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn delete_user(_args: Args) -> Result<(), BoxError> {
//!     Ok(())
//! }
//! ```
//!
//! `Dispatcher` also implements hyper's `Service`, so it can be handed
//! straight to a hyper connection; see `demos/basic.rs`.

mod config;
mod dispatcher;
mod error;
mod handler;
mod manifest;
mod media;
mod method;
mod params;
mod path;
mod registry;
mod request;

pub mod providers;
pub mod response;
pub mod security;

pub use config::Config;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{BoxError, Error, Failure, Rejection};
pub use handler::{Arg, ArgError, Args, Entity, FromArg, Handler, IntoEntity};
pub use manifest::{ManifestBuilder, Match, Matched, RequestMedia, Resource, ResourceManifest};
pub use media::{MediaRange, Negotiated, negotiate, negotiate_scored};
pub use method::Method;
pub use params::{Binding, Param, Scalar};
pub use path::{PathPattern, PathVars};
pub use providers::{BodyReader, BodyWriter, ContextLookup, Contexts, Providers};
pub use registry::Registry;
pub use request::{Body, Request, RequestBuilder};
pub use security::SecurityPolicy;
