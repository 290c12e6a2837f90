//! Metric name resolution
//!
//! Maps an export filename to a canonical, human-readable metric label.
//! Patterns are tried most specific first; the first match wins. Reordering
//! the table makes distinct vendor files collapse under generic labels.

use regex::Regex;
use std::sync::LazyLock;

/// One entry of the resolution table
pub struct MetricRule {
    /// Rule name, for diagnostics and tests
    pub name: &'static str,
    pattern: &'static LazyLock<Regex>,
}

impl MetricRule {
    /// Raw (unformatted) metric text captured by this rule
    pub fn capture<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(file_name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

static DUPLICATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\(\d+\)(\.[^.]+)$").expect("invalid regex"));

static DERIVED_VENDOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^derived_(?:com|org|net|io)\.[a-z0-9]+\.(.+?)(?:_(?:com|org|net|io)\..*)?\.json$")
        .expect("invalid regex")
});

static PLAIN_VENDOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:raw_)?(?:com|org|net|io)\.[a-z0-9]+\.(.+?)(?:_(?:com|org|net|io)\..*)?\.json$")
        .expect("invalid regex")
});

static CATEGORY_NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:fitness|fit|activities|activity|health|sleep|body|nutrition)[_.\- ]+(.+)\.json$")
        .expect("invalid regex")
});

static CATCH_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)\.[^.]+$").expect("invalid regex"));

/// Resolution rules in priority order
pub static METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        name: "derived_vendor",
        pattern: &DERIVED_VENDOR,
    },
    MetricRule {
        name: "plain_vendor",
        pattern: &PLAIN_VENDOR,
    },
    MetricRule {
        name: "category_namespace",
        pattern: &CATEGORY_NAMESPACE,
    },
    MetricRule {
        name: "catch_all",
        pattern: &CATCH_ALL,
    },
];

/// Filename to metric label resolver
pub struct MetricResolver;

impl MetricResolver {
    /// Resolve a filename to its canonical metric label
    ///
    /// Total and deterministic: a name no rule matches is returned unchanged.
    pub fn resolve(file_name: &str) -> String {
        let stripped = strip_duplicate_suffix(file_name);

        METRIC_RULES
            .iter()
            .find_map(|rule| rule.capture(&stripped))
            .map(humanize)
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| file_name.to_string())
    }

    /// Name of the rule that resolves `file_name`, if any
    pub fn matching_rule(file_name: &str) -> Option<&'static str> {
        let stripped = strip_duplicate_suffix(file_name);
        METRIC_RULES
            .iter()
            .find(|rule| rule.capture(&stripped).is_some())
            .map(|rule| rule.name)
    }
}

/// Remove the " (N)" numbering repeated exports append before the extension
fn strip_duplicate_suffix(file_name: &str) -> String {
    DUPLICATE_SUFFIX.replace(file_name, "$1$2").into_owned()
}

/// Turn captured text into a lower-case, space separated label
fn humanize(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len() + 8);
    let mut prev: Option<char> = None;

    for ch in raw.chars() {
        match ch {
            '_' | '.' => spaced.push(' '),
            c if c.is_uppercase()
                && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) =>
            {
                spaced.push(' ');
                spaced.push(c);
            }
            c => spaced.push(c),
        }
        prev = Some(ch);
    }

    spaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
