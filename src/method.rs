//! HTTP method as a typed enum.
//!
//! Registration keys the [`Registry`](crate::Registry) by method. The RFC 9110
//! methods plus `PATCH` (RFC 5789) have their own variants; any other valid
//! token (`PROPFIND`, `PURGE`, ...) is an [`Method::Extension`]. Matching is
//! case-insensitive, so extension tokens are stored uppercased.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// An HTTP method.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
    /// Any other token, uppercased.
    Extension(Box<str>),
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
            Self::Extension(token) => &**token,
        }
    }

    /// Case-insensitive comparison against a raw request token.
    pub fn matches_token(&self, token: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(token)
    }
}

/// Parses a method token, ignoring ASCII case (`"get"` and `"GET"` agree).
///
/// Fails only on strings that are not an RFC 9110 token.
impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Self::Connect,
            "DELETE"  => Self::Delete,
            "GET"     => Self::Get,
            "HEAD"    => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH"   => Self::Patch,
            "POST"    => Self::Post,
            "PUT"     => Self::Put,
            "TRACE"   => Self::Trace,
            upper if is_token(upper) => Self::Extension(upper.into()),
            _ => return Err(Error::Method(s.to_owned())),
        })
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = Error;

    fn try_from(m: &http::Method) -> Result<Self, Self::Error> {
        m.as_str().parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_case() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Post".parse::<Method>().unwrap(), Method::Post);
    }

    #[test]
    fn unknown_tokens_are_extensions() {
        assert_eq!("purge".parse::<Method>().unwrap(), Method::Extension("PURGE".into()));
        assert_eq!("PropFind".parse::<Method>().unwrap().to_string(), "PROPFIND");
        assert!("".parse::<Method>().is_err());
        assert!("GET /".parse::<Method>().is_err());
    }

    #[test]
    fn converts_from_http_method() {
        assert_eq!(Method::try_from(&http::Method::DELETE).unwrap(), Method::Delete);
        let ext = http::Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(Method::try_from(&ext).unwrap().as_str(), "PROPFIND");
    }

    #[test]
    fn token_match_is_case_insensitive() {
        assert!(Method::Put.matches_token("put"));
        assert!(!Method::Put.matches_token("patch"));
        assert!(Method::Extension("PURGE".into()).matches_token("purge"));
    }
}
