//! Media ranges and content negotiation.
//!
//! # Parsing
//!
//! `Accept` and `Content-Type` values follow RFC 7231 §5.3.2 / §3.1.1.1:
//! comma-separated ranges, `;`-separated parameters, case-insensitive type,
//! subtype and parameter names, optionally quoted parameter values. The `q`
//! parameter is lifted out into [`MediaRange::quality`].
//!
//! Request headers are parsed leniently: a malformed entry is dropped and the
//! rest of the header still counts. Declared media types are parsed strictly
//! because a typo there is a configuration bug.
//!
//! # Negotiation
//!
//! [`negotiate`] scores every compatible (declared, requested) pair as
//! `requested quality × pair rank`, where the rank is 2 when neither side
//! has a wildcard, 1 when exactly one side has one and 0 when both do.
//! The highest score wins. Ties go to the earlier *declared* range, so the
//! order of a route's `produces` list is part of its contract.

use std::fmt;

use crate::error::Error;

/// A `type/subtype` pattern with parameters and a quality factor.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaRange {
    type_: String,
    subtype: String,
    params: Vec<(String, String)>,
    quality: f32,
}

impl MediaRange {
    /// Creates a range with no parameters and quality 1.
    ///
    /// Both parts are lowercased.
    pub fn new(type_: &str, subtype: &str) -> Self {
        Self {
            type_: type_.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params: Vec::new(),
            quality: 1.0,
        }
    }

    /// `*/*`
    pub fn any() -> Self {
        Self::new("*", "*")
    }

    pub fn json() -> Self {
        Self::new("application", "json")
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Adds a parameter. `q` sets the quality factor instead.
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "q" {
            self.quality = value.parse::<f32>().unwrap_or(1.0).clamp(0.0, 1.0);
        } else {
            self.params.push((name, value.to_owned()));
        }
        self
    }

    /// Parses a single media range, e.g. `text/html; charset=utf-8; q=0.8`.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let fail = |reason: &str| Error::MediaType { value: value.to_owned(), reason: reason.to_owned() };

        let mut parts = split_unquoted(value, ';').into_iter();
        let essence = parts.next().map(str::trim).unwrap_or_default();
        let (type_, subtype) = match essence {
            "*" => ("*", "*"),
            _ => essence.split_once('/').ok_or_else(|| fail("missing `/`"))?,
        };
        let (type_, subtype) = (type_.trim(), subtype.trim());
        if !is_token(type_) || !is_token(subtype) {
            return Err(fail("type and subtype must be non-empty tokens"));
        }
        if type_ == "*" && subtype != "*" {
            return Err(fail("a wildcard type requires a wildcard subtype"));
        }

        let mut range = Self::new(type_, subtype);
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (name, raw) = param.split_once('=').ok_or_else(|| fail("parameter without `=`"))?;
            let name = name.trim();
            if !is_token(name) {
                return Err(fail("invalid parameter name"));
            }
            let value = unquote(raw.trim());
            if name.eq_ignore_ascii_case("q") {
                let q = value.parse::<f32>().map_err(|_| fail("invalid quality value"))?;
                if !q.is_finite() {
                    return Err(fail("invalid quality value"));
                }
                range.quality = q.clamp(0.0, 1.0);
            } else {
                range.params.push((name.to_ascii_lowercase(), value));
            }
        }
        Ok(range)
    }

    /// Parses every range in a set of header values, in order.
    ///
    /// Each value may hold several comma-separated ranges. Malformed entries
    /// are skipped.
    pub fn parse_header<'a, I>(values: I) -> Vec<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        values
            .into_iter()
            .flat_map(|v| split_unquoted(v, ','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| Self::parse(s).ok())
            .collect()
    }

    /// Strictly parses a list of declared types.
    pub fn parse_declared<S: AsRef<str>>(values: &[S]) -> Result<Vec<Self>, Error> {
        values
            .iter()
            .flat_map(|v| split_unquoted(v.as_ref(), ','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.type_, self.subtype)
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_wildcard_type(&self) -> bool {
        self.type_ == "*"
    }

    pub fn is_wildcard_subtype(&self) -> bool {
        self.subtype == "*"
    }

    /// 2 for `type/subtype`, 1 for `type/*`, 0 for `*/*`.
    pub fn specificity(&self) -> u8 {
        match (self.is_wildcard_type(), self.is_wildcard_subtype()) {
            (false, false) => 2,
            (false, true) => 1,
            _ => 0,
        }
    }

    /// Type and subtype agree, with `*` matching anything. Parameters are
    /// ignored.
    pub fn is_compatible(&self, other: &Self) -> bool {
        let type_ok = self.is_wildcard_type() || other.is_wildcard_type() || self.type_ == other.type_;
        let subtype_ok =
            self.is_wildcard_subtype() || other.is_wildcard_subtype() || self.subtype == other.subtype;
        type_ok && subtype_ok
    }

    /// Every media type this range matches is also matched by `self`.
    fn covers(&self, other: &Self) -> bool {
        (self.is_wildcard_type() || self.type_ == other.type_)
            && (self.is_wildcard_subtype() || self.subtype == other.subtype)
    }

    fn has_wildcard(&self) -> bool {
        self.specificity() < 2
    }

    fn without_quality(&self) -> Self {
        Self { quality: 1.0, ..self.clone() }
    }
}

impl fmt::Display for MediaRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)?;
        for (k, v) in &self.params {
            if is_token(v) {
                write!(f, "; {k}={v}")?;
            } else {
                write!(f, "; {k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        if self.quality < 1.0 {
            write!(f, "; q={}", self.quality)?;
        }
        Ok(())
    }
}

/// The winning pair of a negotiation.
#[derive(Clone, Debug, PartialEq)]
pub struct Negotiated {
    /// The more specific member of the pair, without a quality factor.
    pub media: MediaRange,
    /// `requested quality × pair rank`; used to rank competing routes.
    pub score: f32,
    /// Position of the winning declared range.
    pub declared_index: usize,
}

/// Picks the best declared range for the requested ranges.
///
/// A declared range is refused when the most specific requested range
/// covering it carries `q=0`, so `application/json;q=0, */*` never yields
/// `application/json`. Returns `None` when no pair is compatible or every
/// compatible requested range carries `q=0`.
pub fn negotiate(declared: &[MediaRange], requested: &[MediaRange]) -> Option<MediaRange> {
    negotiate_scored(declared, requested).map(|n| n.media)
}

/// [`negotiate`], keeping the score and the declared position.
pub fn negotiate_scored(declared: &[MediaRange], requested: &[MediaRange]) -> Option<Negotiated> {
    let mut best: Option<(f32, usize, &MediaRange, &MediaRange)> = None;

    for (di, d) in declared.iter().enumerate() {
        if refused(d, requested) {
            continue;
        }
        for r in requested.iter().filter(|r| r.quality > 0.0) {
            if !d.is_compatible(r) {
                continue;
            }
            let rank = 2 - u8::from(d.has_wildcard()) - u8::from(r.has_wildcard());
            let score = r.quality * f32::from(rank);
            // Strictly greater: on a tie the earlier declared range stays.
            if best.is_none_or(|(s, ..)| score > s) {
                best = Some((score, di, d, r));
            }
        }
    }

    best.map(|(score, declared_index, d, r)| {
        let winner = if r.specificity() > d.specificity() { r } else { d };
        Negotiated { media: winner.without_quality(), score, declared_index }
    })
}

fn refused(declared: &MediaRange, requested: &[MediaRange]) -> bool {
    let mut closest: Option<&MediaRange> = None;
    for r in requested.iter().filter(|r| r.covers(declared)) {
        if closest.is_none_or(|c| r.specificity() > c.specificity()) {
            closest = Some(r);
        }
    }
    closest.is_some_and(|r| r.quality <= 0.0)
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn unquote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => s.to_owned(),
    }
}

/// Splits on `delim`, ignoring delimiters inside double quotes.
fn split_unquoted(s: &str, delim: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == delim && !quoted => {
                out.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}
