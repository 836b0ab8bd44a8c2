//! Expression context - values available to `${{ ... }}` expressions

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").expect("valid expression regex")
    })
}

/// Every key referenced by `${{ key }}` in a text, in order of appearance
pub fn expression_keys(text: &str) -> Vec<String> {
    expression_pattern()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Values visible to a job while it is rendered
///
/// Keys are dotted: `matrix.python-version`, `env.CI`, `github.ref`,
/// `runner.os`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionContext {
    values: BTreeMap<String, String>,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value under `<scope>.<key>`
    pub fn set(&mut self, scope: &str, key: &str, value: impl Into<String>) {
        self.values.insert(format!("{}.{}", scope, key), value.into());
    }

    /// Look up a fully dotted key
    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    /// Add every entry of a map under a scope
    pub fn extend_scope<'a, I>(&mut self, scope: &str, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in entries {
            self.set(scope, key, value.clone());
        }
    }

    /// Replace every `${{ key }}` with its value
    ///
    /// Unknown keys render as the empty string.
    pub fn render(&self, text: &str) -> String {
        expression_pattern()
            .replace_all(text, |caps: &regex::Captures| {
                let key = &caps[1];
                match self.values.get(key) {
                    Some(value) => value.clone(),
                    None => {
                        warn!("Unknown expression '{}' rendered as empty string", key);
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
