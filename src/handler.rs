//! Handler trait, argument list and type erasure.
//!
//! # How handlers are stored
//!
//! A registry holds handlers of many different closure and `fn` types side by
//! side, so each one is erased behind `dyn ErasedHandler`:
//!
//! ```text
//! async fn get_user(args: Args) -> Result<String, BoxError> { … }
//!        ↓ ResourceManifest::builder(..).handler(get_user)
//! get_user.into_boxed_handler()                    ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_user))                    ← stored as BoxedHandler
//!        ↓
//! handler.call(args)  at request time              ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_user(args).await.map(IntoEntity::into_entity) })
//! ```
//!
//! Shared service state is captured by the closure (usually as an `Arc`), so
//! there is no separate "instance" to bind.
//!
//! # Arguments
//!
//! The resolver hands the handler an [`Args`]: one [`Arg`] per declared
//! parameter, in declaration order. Typed access goes through [`FromArg`]:
//!
//! ```rust
//! use tenon::{Args, BoxError};
//!
//! async fn list_posts(args: Args) -> Result<String, BoxError> {
//!     let user: &str = args.get(0)?;
//!     let page: Option<u64> = args.get(1)?;
//!     Ok(format!("{user} page {}", page.unwrap_or(1)))
//! }
//! ```

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::error::BoxError;

// ── Internal types ────────────────────────────────────────────────────────────

/// A type-erased handler future.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<Entity, BoxError>> + Send + 'static>>;

#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, args: Args) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid operation handler.
///
/// Satisfied automatically by any `Fn(Args) -> impl Future<Output =
/// Result<R, E>>` where `R: IntoEntity` and `E: Into<BoxError>`. Sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R, E> private::Sealed for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoEntity,
    E: Into<BoxError>,
{
}

impl<F, Fut, R, E> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoEntity,
    E: Into<BoxError>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoEntity,
    E: Into<BoxError>,
{
    fn call(&self, args: Args) -> BoxFuture {
        let fut = (self.0)(args);
        Box::pin(async move { fut.await.map(IntoEntity::into_entity).map_err(Into::<BoxError>::into) })
    }
}

// ── Entities ──────────────────────────────────────────────────────────────────

/// A handler's return value, kept opaque until a body writer serializes it.
pub struct Entity {
    value: Option<Box<dyn Any + Send>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Entity {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self { value: Some(Box::new(value)), type_id: TypeId::of::<T>(), type_name: type_name::<T>() }
    }

    /// No content.
    pub fn empty() -> Self {
        Self { value: None, type_id: TypeId::of::<()>(), type_name: "()" }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn value(&self) -> Option<&(dyn Any + Send)> {
        self.value.as_deref()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|v| v.downcast_ref())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name)
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Converts a handler's success value into an [`Entity`].
pub trait IntoEntity: Send + 'static {
    fn into_entity(self) -> Entity;
}

impl IntoEntity for Entity {
    fn into_entity(self) -> Entity { self }
}

impl IntoEntity for () {
    fn into_entity(self) -> Entity { Entity::empty() }
}

impl IntoEntity for String {
    fn into_entity(self) -> Entity { Entity::new(self) }
}

impl IntoEntity for &'static str {
    fn into_entity(self) -> Entity { Entity::new(self) }
}

impl IntoEntity for Bytes {
    fn into_entity(self) -> Entity { Entity::new(self) }
}

impl IntoEntity for Vec<u8> {
    fn into_entity(self) -> Entity { Entity::new(self) }
}

// ── Arguments ─────────────────────────────────────────────────────────────────

/// One resolved handler argument.
pub enum Arg {
    /// An absent optional value.
    Null,
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    List(Vec<Arg>),
    Context(Arc<dyn Any + Send + Sync>),
    Body(Box<dyn Any + Send>),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Self::Null       => "null",
            Self::Str(_)     => "string",
            Self::Int(_)     => "i64",
            Self::UInt(_)    => "u64",
            Self::Float(_)   => "f64",
            Self::Bool(_)    => "bool",
            Self::List(_)    => "list",
            Self::Context(_) => "context",
            Self::Body(_)    => "body",
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null       => f.write_str("Null"),
            Self::Str(s)     => f.debug_tuple("Str").field(s).finish(),
            Self::Int(n)     => f.debug_tuple("Int").field(n).finish(),
            Self::UInt(n)    => f.debug_tuple("UInt").field(n).finish(),
            Self::Float(n)   => f.debug_tuple("Float").field(n).finish(),
            Self::Bool(b)    => f.debug_tuple("Bool").field(b).finish(),
            Self::List(l)    => f.debug_tuple("List").field(l).finish(),
            Self::Context(_) => f.write_str("Context(..)"),
            Self::Body(_)    => f.write_str("Body(..)"),
        }
    }
}

/// A handler asked for an argument as the wrong type.
///
/// This is a programming error, so it surfaces as a server error.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("argument {index}: expected {expected}, found {found}")]
pub struct ArgError {
    pub index: usize,
    pub expected: &'static str,
    pub found: &'static str,
}

/// Borrowing conversion out of an [`Arg`].
pub trait FromArg<'a>: Sized {
    const EXPECTED: &'static str;

    fn from_arg(arg: &'a Arg) -> Option<Self>;
}

impl<'a> FromArg<'a> for &'a str {
    const EXPECTED: &'static str = "string";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match arg {
            Arg::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl<'a> FromArg<'a> for i64 {
    const EXPECTED: &'static str = "i64";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match *arg {
            Arg::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl<'a> FromArg<'a> for u64 {
    const EXPECTED: &'static str = "u64";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match *arg {
            Arg::UInt(n) => Some(n),
            _ => None,
        }
    }
}

impl<'a> FromArg<'a> for f64 {
    const EXPECTED: &'static str = "f64";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match *arg {
            Arg::Float(n) => Some(n),
            _ => None,
        }
    }
}

impl<'a> FromArg<'a> for bool {
    const EXPECTED: &'static str = "bool";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match *arg {
            Arg::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl<'a> FromArg<'a> for &'a [Arg] {
    const EXPECTED: &'static str = "list";

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match arg {
            Arg::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

/// `Null` becomes `None`.
impl<'a, T: FromArg<'a>> FromArg<'a> for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_arg(arg: &'a Arg) -> Option<Self> {
        match arg {
            Arg::Null => Some(None),
            other => T::from_arg(other).map(Some),
        }
    }
}

/// The arguments resolved for one invocation, in parameter order.
#[derive(Debug, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    /// Reads argument `index` as `T`.
    pub fn get<'a, T: FromArg<'a>>(&'a self, index: usize) -> Result<T, ArgError> {
        let arg = self.0.get(index).ok_or(ArgError { index, expected: T::EXPECTED, found: "nothing" })?;
        T::from_arg(arg).ok_or(ArgError { index, expected: T::EXPECTED, found: arg.kind() })
    }

    /// The context object bound at `index`.
    pub fn context<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ArgError> {
        let mismatch = |found| ArgError { index, expected: type_name::<T>(), found };
        match self.0.get(index) {
            Some(Arg::Context(ctx)) => Arc::clone(ctx).downcast::<T>().map_err(|_| mismatch("another context type")),
            Some(other) => Err(mismatch(other.kind())),
            None => Err(mismatch("nothing")),
        }
    }

    /// Moves the body value out of `index`, leaving `Null` behind.
    pub fn take_body<T: Any>(&mut self, index: usize) -> Result<T, ArgError> {
        let mismatch = |found| ArgError { index, expected: type_name::<T>(), found };
        let slot = self.0.get_mut(index).ok_or(mismatch("nothing"))?;
        match std::mem::replace(slot, Arg::Null) {
            Arg::Body(value) => match value.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(value) => {
                    *slot = Arg::Body(value);
                    Err(mismatch("another body type"))
                }
            },
            other => {
                let found = other.kind();
                *slot = other;
                Err(mismatch(found))
            }
        }
    }
}
