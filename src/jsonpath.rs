//! JSON path evaluation for JSON-shaped documents.
//!
//! With the `jsonpath` feature (the default) paths are full RFC 9535
//! JSONPath, evaluated by `serde_json_path`. Without it, a restricted engine
//! supports dot-separated member access, `[index]` and `['bracketed key']`
//! segments, and the literal root token `$`.
//!
//! Bare paths are normalized by prepending the root token, so `a.b` and
//! `$.a.b` are the same query. Member names that are not valid shorthand
//! identifiers (e.g. containing `-`) must use the bracket form:
//! `$.meta['a-number']`.

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

/// A path failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("jsonpath error: {message}")]
pub struct PathError {
    pub message: String,
}

impl PathError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Evaluate `path` against `data`, returning every match in document order.
///
/// Zero matches is not an error here; cardinality policy is applied by the
/// caller (see [`Key::resolve_list_match`](crate::Key::resolve_list_match)).
pub fn query(data: &Value, path: &str) -> Result<Vec<Value>, PathError> {
    let path = normalize(path);
    query_normalized(data, &path)
}

/// Prefix bare paths with the `$` root token.
fn normalize(path: &str) -> Cow<'_, str> {
    if path.starts_with('$') {
        Cow::Borrowed(path)
    } else if path.starts_with('[') {
        Cow::Owned(format!("${path}"))
    } else {
        Cow::Owned(format!("$.{path}"))
    }
}

#[cfg(feature = "jsonpath")]
fn query_normalized(data: &Value, path: &str) -> Result<Vec<Value>, PathError> {
    let parsed =
        serde_json_path::JsonPath::parse(path).map_err(|e| PathError::new(e.to_string()))?;

    Ok(parsed.query(data).all().into_iter().cloned().collect())
}

#[cfg(not(feature = "jsonpath"))]
fn query_normalized(data: &Value, path: &str) -> Result<Vec<Value>, PathError> {
    use restricted::Segment;

    let segments = restricted::parse(path)?;
    let mut current = data;
    for segment in &segments {
        let next = match segment {
            Segment::Name(name) => current.get(name.as_str()),
            Segment::Index(index) => current.get(*index),
        };
        match next {
            Some(value) => current = value,
            None => return Ok(Vec::new()),
        }
    }
    Ok(vec![current.clone()])
}

/// The restricted path engine used when no extended JSONPath engine is
/// available. Supports `.name`, `[index]` and `['quoted name']` segments.
#[cfg(not(feature = "jsonpath"))]
mod restricted {
    use super::PathError;

    #[derive(Debug, PartialEq)]
    pub enum Segment {
        Name(String),
        Index(usize),
    }

    pub fn parse(path: &str) -> Result<Vec<Segment>, PathError> {
        let rest = path
            .strip_prefix('$')
            .ok_or_else(|| PathError::new(format!("path must start with '$': {path:?}")))?;

        let mut segments = Vec::new();
        let mut chars = rest.char_indices().peekable();

        while let Some(&(start, c)) = chars.peek() {
            match c {
                '.' => {
                    chars.next();
                    let name = take_while(&mut chars, |c| c != '.' && c != '[');
                    if name.is_empty() {
                        return Err(PathError::new(format!(
                            "empty member name at offset {start} in {path:?}"
                        )));
                    }
                    segments.push(Segment::Name(name));
                }
                '[' => {
                    chars.next();
                    let inner = take_while(&mut chars, |c| c != ']');
                    match chars.next() {
                        Some((_, ']')) => {}
                        _ => return Err(PathError::new(format!("unclosed '[' in {path:?}"))),
                    }
                    segments.push(parse_bracket(&inner, path)?);
                }
                _ => {
                    return Err(PathError::new(format!(
                        "unexpected character {c:?} at offset {start} in {path:?}"
                    )));
                }
            }
        }

        Ok(segments)
    }

    fn take_while(
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
        keep: impl Fn(char) -> bool,
    ) -> String {
        let mut out = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if !keep(c) {
                break;
            }
            out.push(c);
            chars.next();
        }
        out
    }

    fn parse_bracket(inner: &str, path: &str) -> Result<Segment, PathError> {
        let inner = inner.trim();
        if let Some(quoted) = strip_quotes(inner, '\'').or_else(|| strip_quotes(inner, '"')) {
            return Ok(Segment::Name(quoted.to_string()));
        }
        inner
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| PathError::new(format!("invalid bracket segment {inner:?} in {path:?}")))
    }

    fn strip_quotes(s: &str, quote: char) -> Option<&str> {
        s.strip_prefix(quote)?.strip_suffix(quote)
    }
}
