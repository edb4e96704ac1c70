//! Minimal tenon example: a user resource served over hyper.
//!
//! Run with:
//!   RUST_LOG=tenon=debug,info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42 -H 'accept: application/json'
//!   curl -i http://localhost:3000/users/42 -H 'accept: text/html'        # 406
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: text/plain' -d 'alice'
//!   curl -i -X DELETE http://localhost:3000/users/42                     # 401
//!   curl -i -X DELETE http://localhost:3000/users/42 -H 'x-user: root'   # 204

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tenon::security::{Authenticated, SecurityContext};
use tenon::{
    Args, BoxError, Config, Contexts, Dispatcher, Method, Param, Providers, Registry, Rejection, Resource,
    ResourceManifest, Scalar, SecurityPolicy,
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Users {
    names: Mutex<HashMap<u64, String>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let users = Resource::new("UserService")
        .path("/users")
        .produces("application/json")
        .operation(
            ResourceManifest::builder(Method::Get, "/{id:[0-9]+}")
                .name("get")
                .param(Param::path("id").of(Scalar::U64))
                .param(Param::context::<Users>())
                .handler(get_user),
        )
        .operation(
            ResourceManifest::builder(Method::Post, "")
                .name("create")
                .consumes("text/plain")
                .param(Param::body::<String>())
                .param(Param::context::<Users>())
                .handler(create_user),
        )
        .operation(
            ResourceManifest::builder(Method::Delete, "/{id:[0-9]+}")
                .name("delete")
                .security(SecurityPolicy::roles_allowed(["admin"]))
                .param(Param::path("id").of(Scalar::U64))
                .param(Param::context::<Users>())
                .handler(delete_user),
        );

    let registry = Registry::new().mount(users)?;
    let contexts = Contexts::new().insert(Users::default());
    let dispatcher = Dispatcher::new(registry, Providers::with_defaults(), contexts, Config::default())?;

    let addr: SocketAddr = "0.0.0.0:3000".parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tenon demo listening");

    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let dispatcher = dispatcher.clone();
                tasks.spawn(async move {
                    // Stand-in for a real authentication layer.
                    let svc = service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
                        let dispatcher = dispatcher.clone();
                        let user = req.headers().get("x-user").and_then(|v| v.to_str().ok()).map(str::to_owned);
                        if let Some(user) = user {
                            let ctx: Arc<dyn SecurityContext> =
                                Arc::new(Authenticated::new(user).role("admin").scheme("Basic"));
                            req.extensions_mut().insert(ctx);
                        }
                        async move { Ok::<_, std::convert::Infallible>(dispatcher.handle(req).await) }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        error!(%peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
    info!("tenon demo stopped");
    Ok(())
}

// GET /users/{id}
async fn get_user(args: Args) -> Result<String, BoxError> {
    let id: u64 = args.get(0)?;
    let users = args.context::<Users>(1)?;
    let names = users.names.lock().map_err(|_| "user table poisoned")?;
    let name = names.get(&id).ok_or_else(|| Rejection::NotFound(format!("user {id}")))?;
    Ok(format!(r#"{{"id":{id},"name":"{name}"}}"#))
}

// POST /users
async fn create_user(mut args: Args) -> Result<String, BoxError> {
    let name: String = args.take_body(0)?;
    if name.trim().is_empty() {
        return Err(Rejection::BadRequest("name must not be empty".into()).into());
    }
    let users = args.context::<Users>(1)?;
    let mut names = users.names.lock().map_err(|_| "user table poisoned")?;
    let id = names.keys().max().copied().unwrap_or(0) + 1;
    names.insert(id, name.trim().to_owned());
    Ok(format!(r#"{{"id":{id}}}"#))
}

// DELETE /users/{id}
async fn delete_user(args: Args) -> Result<(), BoxError> {
    let id: u64 = args.get(0)?;
    let users = args.context::<Users>(1)?;
    let mut names = users.names.lock().map_err(|_| "user table poisoned")?;
    names.remove(&id).map(drop).ok_or_else(|| Rejection::NotFound(format!("user {id}")).into())
}

/// Resolves on SIGTERM or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
