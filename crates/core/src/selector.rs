//! Minimal equality-based label selectors: `k=v`, `k==v`, `k!=v`, `k`, `!k`.

use crate::{ObjectMeta, StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Eq(String, String),
    NotEq(String, String),
    Exists(String),
    NotExists(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    terms: Vec<Term>,
}

impl LabelSelector {
    /// Parse a comma-separated selector. Empty input selects everything.
    pub fn parse(input: &str) -> StorageResult<Self> {
        let mut terms = Vec::new();
        for raw in input.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let term = if let Some((k, v)) = raw.split_once("!=") {
                Term::NotEq(key(k, raw)?, v.trim().to_string())
            } else if let Some((k, v)) = raw.split_once("==") {
                Term::Eq(key(k, raw)?, v.trim().to_string())
            } else if let Some((k, v)) = raw.split_once('=') {
                Term::Eq(key(k, raw)?, v.trim().to_string())
            } else if let Some(k) = raw.strip_prefix('!') {
                Term::NotExists(key(k, raw)?)
            } else {
                Term::Exists(key(raw, raw)?)
            };
            terms.push(term);
        }
        Ok(Self { terms })
    }

    /// Parse an optional selector; `None` selects everything.
    pub fn from_option(input: Option<&str>) -> StorageResult<Self> {
        input.map(Self::parse).unwrap_or_else(|| Ok(Self::default()))
    }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.terms.iter().all(|t| match t {
            Term::Eq(k, v) => meta.label(k) == Some(v.as_str()),
            Term::NotEq(k, v) => meta.label(k) != Some(v.as_str()),
            Term::Exists(k) => meta.label(k).is_some(),
            Term::NotExists(k) => meta.label(k).is_none(),
        })
    }
}

fn key(k: &str, term: &str) -> StorageResult<String> {
    let k = k.trim();
    if k.is_empty() || k.contains(char::is_whitespace) || k.contains(['=', '!']) {
        return Err(StorageError::Invalid(format!("invalid label selector term: {term:?}")));
    }
    Ok(k.to_string())
}
