//! Declarative authorization.
//!
//! Every route carries exactly one [`SecurityPolicy`], resolved once at
//! registration: the operation's own policy if it declares one, else the
//! owning resource's, else [`SecurityPolicy::PermitAll`].
//!
//! At request time the policy is checked against the request's
//! [`SecurityContext`], a capability supplied by whatever authenticated the
//! caller (a proxy header, a session layer, a token filter...).

use std::fmt;

use thiserror::Error;

/// A resolved authorization policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityPolicy {
    PermitAll,
    DenyAll,
    /// Any one of the listed roles grants access. Order is preserved and
    /// duplicates are dropped.
    RolesAllowed(Vec<String>),
}

impl SecurityPolicy {
    pub fn roles_allowed<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for role in roles {
            let role = role.into();
            if !out.contains(&role) {
                out.push(role);
            }
        }
        Self::RolesAllowed(out)
    }

    /// Operation-level policy overrides resource-level policy; neither means
    /// permit-all.
    pub fn resolve(method_level: Option<&Self>, type_level: Option<&Self>) -> Self {
        method_level.or(type_level).cloned().unwrap_or(Self::PermitAll)
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, Self::PermitAll)
    }

    /// Checks the caller against this policy.
    pub fn authorize(&self, ctx: &dyn SecurityContext) -> Result<(), AuthFailure> {
        let roles = match self {
            Self::PermitAll => return Ok(()),
            Self::DenyAll => {
                return Err(AuthFailure::Forbidden {
                    reason: "access denied to all callers".to_owned(),
                    challenges: Vec::new(),
                });
            }
            Self::RolesAllowed(roles) => roles,
        };

        let scheme = ctx.authentication_scheme();
        let challenges = || -> Vec<Challenge> {
            roles.iter().map(|r| Challenge::new(scheme, r)).collect()
        };

        let Some(principal) = ctx.principal() else {
            return Err(AuthFailure::NotAuthenticated { challenges: challenges() });
        };
        if roles.iter().any(|r| ctx.is_in_role(r)) {
            return Ok(());
        }
        Err(AuthFailure::Forbidden {
            reason: format!("`{}` holds none of [{}]", principal.name(), roles.join(", ")),
            challenges: challenges(),
        })
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self { Self::PermitAll }
}

/// Why [`SecurityPolicy::authorize`] refused a caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authentication required")]
    NotAuthenticated { challenges: Vec<Challenge> },

    #[error("forbidden: {reason}")]
    Forbidden { reason: String, challenges: Vec<Challenge> },
}

/// One `WWW-Authenticate` challenge, e.g. `Basic realm="admin"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    scheme: Option<String>,
    realm: String,
}

impl Challenge {
    pub fn new(scheme: Option<&str>, realm: &str) -> Self {
        Self { scheme: scheme.map(str::to_owned), realm: realm.to_owned() }
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme} ")?;
        }
        write!(f, "realm=\"{}\"", self.realm)
    }
}

/// An authenticated identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Authentication facts about the caller of one request.
pub trait SecurityContext: Send + Sync {
    fn principal(&self) -> Option<&Principal>;
    fn is_in_role(&self, role: &str) -> bool;
    fn authentication_scheme(&self) -> Option<&str>;
}

/// The context of a request nobody has authenticated.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl SecurityContext for Anonymous {
    fn principal(&self) -> Option<&Principal> { None }
    fn is_in_role(&self, _role: &str) -> bool { false }
    fn authentication_scheme(&self) -> Option<&str> { None }
}

/// A caller with a known principal and a fixed set of roles.
///
/// ```rust
/// use tenon::security::{Authenticated, SecurityContext};
///
/// let ctx = Authenticated::new("alice").role("admin").scheme("Basic");
/// assert!(ctx.is_in_role("admin"));
/// ```
#[derive(Clone, Debug)]
pub struct Authenticated {
    principal: Principal,
    roles: Vec<String>,
    scheme: Option<String>,
}

impl Authenticated {
    pub fn new(name: impl Into<String>) -> Self {
        Self { principal: Principal::new(name), roles: Vec::new(), scheme: None }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }
}

impl SecurityContext for Authenticated {
    fn principal(&self) -> Option<&Principal> { Some(&self.principal) }
    fn is_in_role(&self, role: &str) -> bool { self.roles.iter().any(|r| r == role) }
    fn authentication_scheme(&self) -> Option<&str> { self.scheme.as_deref() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_level_overrides_type_level() {
        let deny = SecurityPolicy::DenyAll;
        let admins = SecurityPolicy::roles_allowed(["admin"]);
        assert_eq!(SecurityPolicy::resolve(Some(&admins), Some(&deny)), admins);
        assert_eq!(SecurityPolicy::resolve(None, Some(&deny)), deny);
        assert_eq!(SecurityPolicy::resolve(None, None), SecurityPolicy::PermitAll);
    }

    #[test]
    fn permit_all_admits_anonymous() {
        assert!(SecurityPolicy::PermitAll.authorize(&Anonymous).is_ok());
    }

    #[test]
    fn deny_all_rejects_everyone() {
        let admin = Authenticated::new("root").role("admin");
        for ctx in [&Anonymous as &dyn SecurityContext, &admin] {
            let err = SecurityPolicy::DenyAll.authorize(ctx).unwrap_err();
            assert!(matches!(err, AuthFailure::Forbidden { .. }));
        }
    }

    #[test]
    fn roles_allowed_without_principal_is_unauthenticated() {
        let err = SecurityPolicy::roles_allowed(["admin"]).authorize(&Anonymous).unwrap_err();
        let AuthFailure::NotAuthenticated { challenges } = err else {
            panic!("expected NotAuthenticated, got {err:?}");
        };
        assert_eq!(challenges, vec![Challenge::new(None, "admin")]);
        assert_eq!(challenges[0].to_string(), "realm=\"admin\"");
    }

    #[test]
    fn any_one_role_is_enough() {
        let policy = SecurityPolicy::roles_allowed(["admin", "ops"]);
        assert!(policy.authorize(&Authenticated::new("bob").role("ops")).is_ok());
    }

    #[test]
    fn missing_role_is_forbidden_with_challenges() {
        let ctx = Authenticated::new("bob").role("user").scheme("Basic");
        let err = SecurityPolicy::roles_allowed(["admin"]).authorize(&ctx).unwrap_err();
        let AuthFailure::Forbidden { challenges, .. } = err else {
            panic!("expected Forbidden, got {err:?}");
        };
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].realm(), "admin");
        assert_eq!(challenges[0].to_string(), "Basic realm=\"admin\"");
    }

    #[test]
    fn duplicate_roles_are_dropped() {
        let policy = SecurityPolicy::roles_allowed(["a", "b", "a"]);
        assert_eq!(policy, SecurityPolicy::RolesAllowed(vec!["a".into(), "b".into()]));
    }
}
