//! Pluggable capabilities: body readers, body writers and injectable
//! contexts.
//!
//! Nothing here is discovered. Each provider is registered once at startup
//! with an explicit call and then shared read-only by every request.
//!
//! ```rust
//! use tenon::{Contexts, MediaRange, Providers};
//!
//! struct Db;
//!
//! let providers = Providers::with_defaults()
//!     .reader(tenon::providers::reader_fn::<u32, _>(MediaRange::text_plain(), |_, body| {
//!         Ok(std::str::from_utf8(&body)?.trim().parse()?)
//!     }));
//! let contexts = Contexts::new().insert(Db);
//! # let _ = (providers, contexts);
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderValue};

use crate::error::BoxError;
use crate::media::MediaRange;

/// A value produced by a [`BodyReader`].
pub type BodyValue = Box<dyn Any + Send>;

/// Turns a request body into a value of some Rust type.
pub trait BodyReader: Send + Sync {
    fn is_readable(&self, ty: TypeId, media: &MediaRange) -> bool;

    /// Reads the whole body. An empty body is still passed here; it is up to
    /// the reader whether that is valid. An `Err` is a client error.
    fn read_from(
        &self,
        ty: TypeId,
        media: &MediaRange,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<BodyValue, BoxError>;
}

/// Turns a handler's return value into response bytes.
pub trait BodyWriter: Send + Sync {
    fn is_writeable(&self, ty: TypeId, media: &MediaRange) -> bool;

    /// May add headers (e.g. a charset-qualified `content-type`).
    fn write_to(
        &self,
        value: &(dyn Any + Send),
        media: &MediaRange,
        headers: &mut HeaderMap,
    ) -> Result<Bytes, BoxError>;
}

/// The registered readers and writers. First registered match wins.
#[derive(Clone, Default)]
pub struct Providers {
    readers: Vec<Arc<dyn BodyReader>>,
    writers: Vec<Arc<dyn BodyWriter>>,
}

impl Providers {
    /// No providers at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// [`StringProvider`] and [`BytesProvider`] registered, in that order.
    pub fn with_defaults() -> Self {
        Self::new()
            .reader(StringProvider)
            .writer(StringProvider)
            .reader(BytesProvider)
            .writer(BytesProvider)
    }

    pub fn reader(mut self, reader: impl BodyReader + 'static) -> Self {
        self.readers.push(Arc::new(reader));
        self
    }

    pub fn writer(mut self, writer: impl BodyWriter + 'static) -> Self {
        self.writers.push(Arc::new(writer));
        self
    }

    pub fn reader_for(&self, ty: TypeId, media: &MediaRange) -> Option<&dyn BodyReader> {
        self.readers.iter().find(|r| r.is_readable(ty, media)).map(|r| &**r)
    }

    pub fn writer_for(&self, ty: TypeId, media: &MediaRange) -> Option<&dyn BodyWriter> {
        self.writers.iter().find(|w| w.is_writeable(ty, media)).map(|w| &**w)
    }
}

// ── Built-in providers ────────────────────────────────────────────────────────

/// Reads and writes `String` for any media type. Only UTF-8 (and its ASCII
/// subset) is accepted as a charset.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringProvider;

impl StringProvider {
    fn charset_ok(media: &MediaRange) -> bool {
        media
            .param("charset")
            .is_none_or(|c| c.eq_ignore_ascii_case("utf-8") || c.eq_ignore_ascii_case("us-ascii"))
    }
}

impl BodyReader for StringProvider {
    fn is_readable(&self, ty: TypeId, _: &MediaRange) -> bool {
        ty == TypeId::of::<String>()
    }

    fn read_from(&self, _: TypeId, media: &MediaRange, _: &HeaderMap, body: Bytes) -> Result<BodyValue, BoxError> {
        if !Self::charset_ok(media) {
            return Err(format!("unsupported charset in `{media}`").into());
        }
        let text = String::from_utf8(body.to_vec())?;
        Ok(Box::new(text))
    }
}

impl BodyWriter for StringProvider {
    fn is_writeable(&self, ty: TypeId, _: &MediaRange) -> bool {
        ty == TypeId::of::<String>() || ty == TypeId::of::<&'static str>()
    }

    /// Labels the body `charset=utf-8` unless the media type already names a
    /// charset. A wildcard type is written as `text/plain`.
    fn write_to(&self, value: &(dyn Any + Send), media: &MediaRange, headers: &mut HeaderMap) -> Result<Bytes, BoxError> {
        let body = if let Some(s) = value.downcast_ref::<String>() {
            Bytes::from(s.clone())
        } else if let Some(s) = value.downcast_ref::<&'static str>() {
            Bytes::from_static(s.as_bytes())
        } else {
            return Err("StringProvider cannot write this value".into());
        };

        let content_type = match (media.specificity(), media.param("charset")) {
            (2, Some(_)) => media.to_string(),
            (2, None) => format!("{media}; charset=utf-8"),
            _ => "text/plain; charset=utf-8".to_owned(),
        };
        headers.insert(CONTENT_TYPE, HeaderValue::try_from(content_type)?);
        Ok(body)
    }
}

/// Reads and writes raw `Bytes` and `Vec<u8>` for any media type.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesProvider;

impl BytesProvider {
    fn handles(ty: TypeId) -> bool {
        ty == TypeId::of::<Bytes>() || ty == TypeId::of::<Vec<u8>>()
    }
}

impl BodyReader for BytesProvider {
    fn is_readable(&self, ty: TypeId, _: &MediaRange) -> bool {
        Self::handles(ty)
    }

    fn read_from(&self, ty: TypeId, _: &MediaRange, _: &HeaderMap, body: Bytes) -> Result<BodyValue, BoxError> {
        if ty == TypeId::of::<Vec<u8>>() {
            Ok(Box::new(body.to_vec()))
        } else {
            Ok(Box::new(body))
        }
    }
}

impl BodyWriter for BytesProvider {
    fn is_writeable(&self, ty: TypeId, _: &MediaRange) -> bool {
        Self::handles(ty)
    }

    fn write_to(&self, value: &(dyn Any + Send), _: &MediaRange, _: &mut HeaderMap) -> Result<Bytes, BoxError> {
        if let Some(b) = value.downcast_ref::<Bytes>() {
            return Ok(b.clone());
        }
        if let Some(v) = value.downcast_ref::<Vec<u8>>() {
            return Ok(Bytes::from(v.clone()));
        }
        Err("BytesProvider cannot write this value".into())
    }
}

// ── Closure-backed providers ──────────────────────────────────────────────────

/// A reader for one type `T` and the media types compatible with `accepts`.
pub struct FnReader<T, F> {
    accepts: MediaRange,
    read: F,
    _type: PhantomData<fn() -> T>,
}

/// Builds a [`BodyReader`] from a closure.
pub fn reader_fn<T, F>(accepts: MediaRange, read: F) -> FnReader<T, F>
where
    T: Any + Send,
    F: Fn(&MediaRange, Bytes) -> Result<T, BoxError> + Send + Sync,
{
    FnReader { accepts, read, _type: PhantomData }
}

impl<T, F> BodyReader for FnReader<T, F>
where
    T: Any + Send,
    F: Fn(&MediaRange, Bytes) -> Result<T, BoxError> + Send + Sync,
{
    fn is_readable(&self, ty: TypeId, media: &MediaRange) -> bool {
        ty == TypeId::of::<T>() && self.accepts.is_compatible(media)
    }

    fn read_from(&self, _: TypeId, media: &MediaRange, _: &HeaderMap, body: Bytes) -> Result<BodyValue, BoxError> {
        (self.read)(media, body).map(|v| Box::new(v) as BodyValue)
    }
}

/// A writer for one type `T` and the media types compatible with `produces`.
pub struct FnWriter<T, F> {
    produces: MediaRange,
    write: F,
    _type: PhantomData<fn(T)>,
}

/// Builds a [`BodyWriter`] from a closure.
pub fn writer_fn<T, F>(produces: MediaRange, write: F) -> FnWriter<T, F>
where
    T: Any + Send,
    F: Fn(&T, &MediaRange) -> Result<Bytes, BoxError> + Send + Sync,
{
    FnWriter { produces, write, _type: PhantomData }
}

impl<T, F> BodyWriter for FnWriter<T, F>
where
    T: Any + Send,
    F: Fn(&T, &MediaRange) -> Result<Bytes, BoxError> + Send + Sync,
{
    fn is_writeable(&self, ty: TypeId, media: &MediaRange) -> bool {
        ty == TypeId::of::<T>() && self.produces.is_compatible(media)
    }

    fn write_to(&self, value: &(dyn Any + Send), media: &MediaRange, _: &mut HeaderMap) -> Result<Bytes, BoxError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| format!("writer for `{}` handed another type", type_name::<T>()))?;
        (self.write)(value, media)
    }
}

// ── Injectable contexts ───────────────────────────────────────────────────────

/// Looks up shared objects by type for context-bound handler parameters.
pub trait ContextLookup: Send + Sync {
    fn lookup(&self, ty: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// A type-keyed map of shared objects.
#[derive(Clone, Default)]
pub struct Contexts {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Contexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(self, value: T) -> Self {
        self.insert_arc(Arc::new(value))
    }

    pub fn insert_arc<T: Any + Send + Sync>(mut self, value: Arc<T>) -> Self {
        self.entries.insert(TypeId::of::<T>(), value);
        self
    }
}

impl ContextLookup for Contexts {
    fn lookup(&self, ty: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.get(&ty).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mr(s: &str) -> MediaRange {
        MediaRange::parse(s).unwrap()
    }

    #[test]
    fn string_reader_matches_on_type() {
        let p = Providers::with_defaults();
        assert!(p.reader_for(TypeId::of::<String>(), &mr("text/plain")).is_some());
        assert!(p.reader_for(TypeId::of::<String>(), &mr("application/json")).is_some());
        assert!(p.reader_for(TypeId::of::<u64>(), &mr("text/plain")).is_none());
    }

    #[test]
    fn string_writer_labels_charset() {
        let mut headers = HeaderMap::new();
        StringProvider.write_to(&String::from("{}"), &mr("application/json"), &mut headers).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json; charset=utf-8");

        let mut headers = HeaderMap::new();
        StringProvider.write_to(&"x", &mr("text/*"), &mut headers).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn string_reader_rejects_invalid_utf8_and_foreign_charsets() {
        let media = mr("text/plain");
        let headers = HeaderMap::new();
        let ty = TypeId::of::<String>();
        assert!(StringProvider.read_from(ty, &media, &headers, Bytes::from_static(&[0xff, 0xfe])).is_err());
        let latin1 = mr("text/plain; charset=iso-8859-1");
        assert!(StringProvider.read_from(ty, &latin1, &headers, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn bytes_reader_reads_any_media_type() {
        let p = Providers::with_defaults();
        let media = mr("image/png");
        let reader = p.reader_for(TypeId::of::<Vec<u8>>(), &media).unwrap();
        let value = reader
            .read_from(TypeId::of::<Vec<u8>>(), &media, &HeaderMap::new(), Bytes::from_static(b"\x89PNG"))
            .unwrap();
        assert_eq!(*value.downcast::<Vec<u8>>().unwrap(), b"\x89PNG".to_vec());
    }

    #[test]
    fn first_registered_reader_wins() {
        let p = Providers::new()
            .reader(reader_fn::<String, _>(MediaRange::any(), |_, _| Ok("first".to_owned())))
            .reader(StringProvider);
        let media = mr("text/plain");
        let value = p
            .reader_for(TypeId::of::<String>(), &media)
            .unwrap()
            .read_from(TypeId::of::<String>(), &media, &HeaderMap::new(), Bytes::from_static(b"body"))
            .unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "first");
    }

    #[test]
    fn fn_writer_checks_type_and_media() {
        let w = writer_fn::<u32, _>(mr("text/plain"), |n, _| Ok(Bytes::from(n.to_string())));
        assert!(w.is_writeable(TypeId::of::<u32>(), &mr("text/plain")));
        assert!(!w.is_writeable(TypeId::of::<u32>(), &mr("application/json")));
        let out = w.write_to(&7u32, &mr("text/plain"), &mut HeaderMap::new()).unwrap();
        assert_eq!(&out[..], b"7");
    }

    #[test]
    fn contexts_lookup_by_type() {
        struct Clock(u64);
        let contexts = Contexts::new().insert(Clock(5));
        let found = contexts.lookup(TypeId::of::<Clock>()).unwrap();
        assert_eq!(found.downcast_ref::<Clock>().map(|c| c.0), Some(5));
        assert!(contexts.lookup(TypeId::of::<String>()).is_none());
    }
}
