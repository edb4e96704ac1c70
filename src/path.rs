//! URI templates.
//!
//! A template is a path with `{name}` or `{name:regex}` slots:
//!
//! ```text
//! /users/{id}
//! /users/{id:[0-9]+}/posts/{slug}
//! /files/{path:.+}
//! ```
//!
//! Compilation turns the template into one anchored regex. Untyped slots
//! match one or more non-slash characters. A trailing slash on either the
//! template or the request path is ignored, so `/users/` and `/users` are the
//! same route.

use std::fmt;

use regex::Regex;

use crate::error::Error;

const DEFAULT_CONSTRAINT: &str = "[^/]+";

/// A compiled URI template.
#[derive(Clone)]
pub struct PathPattern {
    template: String,
    signature: String,
    names: Vec<String>,
    regex: Regex,
}

impl PathPattern {
    /// Compiles `template`, rejecting malformed slots, duplicate names and
    /// invalid regex constraints.
    pub fn compile(template: &str) -> Result<Self, Error> {
        let normalized = normalize(template);
        let fail = |reason: String| Error::Template { template: template.to_owned(), reason };

        let mut pattern = String::from("^");
        let mut signature = String::new();
        let mut names: Vec<String> = Vec::new();
        let mut literal = String::new();

        let mut chars = normalized.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let (name, constraint) = read_slot(&mut chars).map_err(fail)?;
                    if names.iter().any(|n| *n == name) {
                        return Err(fail(format!("variable `{name}` declared twice")));
                    }
                    pattern.push_str(&regex::escape(&literal));
                    signature.push_str(&literal);
                    literal.clear();

                    let constraint = constraint.unwrap_or_else(|| DEFAULT_CONSTRAINT.to_owned());
                    pattern.push_str(&format!("(?P<{}>(?:{constraint}))", group_name(names.len())));
                    signature.push('{');
                    signature.push_str(&constraint);
                    signature.push('}');
                    names.push(name);
                }
                '}' => return Err(fail("unbalanced `}`".to_owned())),
                _ => literal.push(c),
            }
        }
        pattern.push_str(&regex::escape(&literal));
        signature.push_str(&literal);
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| fail(e.to_string()))?;
        Ok(Self { template: normalized, signature, names, regex })
    }

    /// Matches a concrete request path, binding every variable exactly once.
    pub fn matches(&self, path: &str) -> Option<PathVars> {
        let path = normalize(path);
        let caps = self.regex.captures(&path)?;
        let mut vars = Vec::with_capacity(self.names.len());
        for (i, name) in self.names.iter().enumerate() {
            let value = caps.name(&group_name(i))?;
            vars.push((name.clone(), value.as_str().to_owned()));
        }
        Some(PathVars(vars))
    }

    /// The normalized template text, e.g. `/users/{id}`.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Variable names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// The template with variable names erased. Two patterns with equal
    /// signatures accept exactly the same paths.
    pub(crate) fn signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.template).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Path variables bound by a successful match, in template order.
///
/// Values are raw: no percent-decoding is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathVars(Vec<(String, String)>);

impl PathVars {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn group_name(index: usize) -> String {
    format!("__tenon_{index}")
}

/// Leading slash added, trailing slash dropped (except for the root).
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Reads the remainder of a `{...}` slot after the opening brace.
///
/// Braces inside the constraint must balance (`{id:[0-9]{2,4}}`); a
/// backslash escapes the next character.
fn read_slot(chars: &mut std::str::Chars<'_>) -> Result<(String, Option<String>), String> {
    let mut name = String::new();
    let mut constraint: Option<String> = None;
    let mut depth = 0usize;

    loop {
        let c = chars.next().ok_or_else(|| "unterminated `{`".to_owned())?;
        match (constraint.as_mut(), c) {
            (None, '}') => break,
            (None, ':') => constraint = Some(String::new()),
            (None, '{') => return Err("nested `{` in variable name".to_owned()),
            (None, c) => name.push(c),
            (Some(re), '\\') => {
                re.push('\\');
                re.push(chars.next().ok_or_else(|| "dangling escape".to_owned())?);
            }
            (Some(re), '{') => {
                depth += 1;
                re.push('{');
            }
            (Some(_), '}') if depth == 0 => break,
            (Some(re), '}') => {
                depth -= 1;
                re.push('}');
            }
            (Some(re), c) => re.push(c),
        }
    }

    let name = name.trim().to_owned();
    let valid = name.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(format!("invalid variable name `{name}`"));
    }

    let constraint = constraint.map(|re| re.trim().to_owned());
    if constraint.as_deref() == Some("") {
        return Err(format!("empty constraint for `{name}`"));
    }
    Ok((name, constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(t: &str) -> PathPattern {
        PathPattern::compile(t).unwrap()
    }

    #[test]
    fn binds_untyped_variable() {
        let vars = compile("/users/{id}").matches("/users/42").unwrap();
        assert_eq!(vars.get("id"), Some("42"));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn untyped_variable_does_not_cross_slashes() {
        let p = compile("/users/{id}");
        assert!(p.matches("/users/42/posts").is_none());
        assert!(p.matches("/users/").is_none());
        assert!(p.matches("/users").is_none());
    }

    #[test]
    fn regex_constraint_is_enforced() {
        let p = compile("/users/{id:[0-9]+}");
        assert!(p.matches("/users/42").is_some());
        assert!(p.matches("/users/abc").is_none());
    }

    #[test]
    fn constraint_with_quantifier_braces() {
        let p = compile("/years/{y:[0-9]{4}}");
        assert_eq!(p.matches("/years/2016").unwrap().get("y"), Some("2016"));
        assert!(p.matches("/years/16").is_none());
    }

    #[test]
    fn constraint_may_span_segments() {
        let vars = compile("/files/{path:.+}").matches("/files/a/b/c.txt").unwrap();
        assert_eq!(vars.get("path"), Some("a/b/c.txt"));
    }

    #[test]
    fn anchored_at_both_ends() {
        let p = compile("/users");
        assert!(p.matches("/api/users").is_none());
        assert!(p.matches("/users/extra").is_none());
    }

    #[test]
    fn trailing_slash_is_ignored_on_both_sides() {
        assert!(compile("/users/").matches("/users").is_some());
        assert!(compile("/users").matches("/users/").is_some());
        assert!(compile("/").matches("/").is_some());
        assert!(compile("").matches("/").is_some());
    }

    #[test]
    fn multiple_variables_keep_template_order() {
        let vars = compile("/a/{x}/b/{y}").matches("/a/1/b/2").unwrap();
        let order: Vec<_> = vars.iter().collect();
        assert_eq!(order, vec![("x", "1"), ("y", "2")]);
    }

    #[test]
    fn literal_regex_metacharacters_are_escaped() {
        let p = compile("/v1.0/items");
        assert!(p.matches("/v1.0/items").is_some());
        assert!(p.matches("/v1x0/items").is_none());
    }

    #[test]
    fn whitespace_around_slot_parts_is_trimmed() {
        let vars = compile("/users/{ id : [0-9]+ }").matches("/users/7").unwrap();
        assert_eq!(vars.get("id"), Some("7"));
    }

    #[test]
    fn rejects_malformed_templates() {
        for t in ["/users/{id", "/users/id}", "/users/{}", "/u/{a}/{a}", "/u/{id:[0-9}", "/u/{id:}"] {
            assert!(PathPattern::compile(t).is_err(), "{t} should not compile");
        }
    }

    #[test]
    fn signature_ignores_variable_names() {
        assert_eq!(compile("/u/{id}").signature(), compile("/u/{name}").signature());
        assert_ne!(compile("/u/{id}").signature(), compile("/u/{id:[0-9]+}").signature());
    }
}
