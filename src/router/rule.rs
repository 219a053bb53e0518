//! Rule model — route rules, weighted route tags and the header matching DSL
//!
//! A rule's `match` block is evaluated against the inbound headers and the
//! caller's identity:
//! ```yaml
//! match:
//!   source: gateway
//!   sourceTags: { version: 1.0.0 }
//!   headers:
//!     user-level: { noLess: "3" }
//!     user: { regex: "vip.*", caseInsensitive: "true" }
//! ```

use crate::invocation::SourceInfo;
use parking_lot::RwLock;
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Marker key inside an operator map requesting case-insensitive comparison
pub const CASE_INSENSITIVE: &str = "caseInsensitive";

/// Upper bound for the sum of route weights in one rule
pub const MAX_TOTAL_WEIGHT: u64 = 100;

/// A routing rule for one destination service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Higher precedence is evaluated first
    #[serde(default)]
    pub precedence: i32,
    /// Weighted destinations
    #[serde(rename = "route", alias = "routes", default)]
    pub routes: Vec<RouteTag>,
    /// Condition under which this rule applies
    #[serde(rename = "match", default, skip_serializing_if = "Match::is_empty")]
    pub matcher: Match,
}

impl RouteRule {
    /// Sum of all route weights
    pub fn total_weight(&self) -> u64 {
        self.routes.iter().map(|r| u64::from(r.weight)).sum()
    }
}

/// A weighted destination variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTag {
    /// Destination tags, usually `version` and `app`
    #[serde(default, deserialize_with = "scalar_map")]
    pub tags: HashMap<String, String>,
    /// Percentage of traffic (0–100)
    #[serde(default)]
    pub weight: u32,
}

impl RouteTag {
    /// Create a tag pointing at a single version
    pub fn version(version: impl Into<String>, weight: u32) -> Self {
        let mut tags = HashMap::new();
        tags.insert("version".to_string(), version.into());
        Self { tags, weight }
    }

    /// Stable textual label (`k:v|k:v`, sorted by key)
    pub fn label(&self) -> String {
        let mut pairs: Vec<_> = self.tags.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Match condition of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// Name of a reusable source template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refer: Option<String>,
    /// Required caller service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Required caller tags
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub source_tags: HashMap<String, String>,
    /// Header name → operator map
    #[serde(
        default,
        deserialize_with = "scalar_nested_map",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub headers: HashMap<String, HashMap<String, String>>,
}

impl Match {
    /// Whether nothing at all is set
    pub fn is_empty(&self) -> bool {
        self.refer.as_deref().map(str::is_empty).unwrap_or(true) && self.is_unconstrained()
    }

    fn is_unconstrained(&self) -> bool {
        self.source.as_deref().map(str::is_empty).unwrap_or(true)
            && self.source_tags.is_empty()
            && self.headers.is_empty()
    }

    /// Evaluate this condition, resolving `refer` against `templates`
    pub fn matches(
        &self,
        headers: &HashMap<String, String>,
        source: Option<&SourceInfo>,
        templates: &HashMap<String, Match>,
    ) -> bool {
        if let Some(refer) = self.refer.as_deref().filter(|r| !r.is_empty()) {
            return match templates.get(refer) {
                Some(template) => template.source_match(headers, source),
                None => {
                    tracing::warn!(template = refer, "Route rule refers to unknown template");
                    false
                }
            };
        }
        if self.is_unconstrained() {
            return true;
        }
        self.source_match(headers, source)
    }

    /// All set predicates ANDed
    fn source_match(&self, headers: &HashMap<String, String>, source: Option<&SourceInfo>) -> bool {
        if let Some(expected) = self.source.as_deref().filter(|s| !s.is_empty()) {
            if source.map(|s| s.name.as_str()) != Some(expected) {
                return false;
            }
        }

        if !self.source_tags.is_empty() {
            let Some(source) = source else {
                return false;
            };
            let all = self
                .source_tags
                .iter()
                .all(|(k, v)| source.tags.get(k) == Some(v));
            if !all {
                return false;
            }
        }

        self.headers
            .iter()
            .all(|(key, ops)| is_match(headers, key, ops))
    }
}

/// Header comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOperator {
    /// String equality
    Exact,
    /// Regular expression search
    Regex,
    /// String inequality
    NoEqu,
    /// Integer `>=`
    NoLess,
    /// Integer `<=`
    NoGreater,
    /// Integer `>`
    Greater,
    /// Integer `<`
    Less,
}

impl HeaderOperator {
    /// Wire name of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Regex => "regex",
            Self::NoEqu => "noEqu",
            Self::NoLess => "noLess",
            Self::NoGreater => "noGreater",
            Self::Greater => "greater",
            Self::Less => "less",
        }
    }

    /// Whether both sides must parse as integers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::NoLess | Self::NoGreater | Self::Greater | Self::Less
        )
    }

    /// Compare an actual header value against the configured value
    pub fn evaluate(&self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Exact => actual == expected,
            Self::NoEqu => actual != expected,
            Self::Regex => cached_regex(expected)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
            Self::NoLess | Self::NoGreater | Self::Greater | Self::Less => {
                let (Ok(actual), Ok(bound)) = (
                    actual.trim().parse::<i64>(),
                    expected.trim().parse::<i64>(),
                ) else {
                    return false;
                };
                match self {
                    Self::NoLess => actual >= bound,
                    Self::NoGreater => actual <= bound,
                    Self::Greater => actual > bound,
                    _ => actual < bound,
                }
            }
        }
    }
}

impl FromStr for HeaderOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "regex" => Ok(Self::Regex),
            "noEqu" => Ok(Self::NoEqu),
            "noLess" => Ok(Self::NoLess),
            "noGreater" => Ok(Self::NoGreater),
            "greater" => Ok(Self::Greater),
            "less" => Ok(Self::Less),
            other => Err(format!("unknown header operator: {}", other)),
        }
    }
}

/// Evaluate one header predicate
///
/// `ops` carries exactly one operator plus an optional `caseInsensitive` marker.
/// Unknown operators never match.
pub fn is_match(headers: &HashMap<String, String>, key: &str, ops: &HashMap<String, String>) -> bool {
    let case_insensitive = ops
        .get(CASE_INSENSITIVE)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let actual = lookup_header(headers, key).unwrap_or("");

    let mut evaluated = false;
    for (op, expected) in ops {
        if op == CASE_INSENSITIVE {
            continue;
        }
        let Ok(operator) = op.parse::<HeaderOperator>() else {
            return false;
        };
        let ok = if case_insensitive && operator == HeaderOperator::Regex {
            operator.evaluate(actual, &format!("(?i){}", expected))
        } else if case_insensitive {
            operator.evaluate(&actual.to_uppercase(), &expected.to_uppercase())
        } else {
            operator.evaluate(actual, expected)
        };
        if !ok {
            return false;
        }
        evaluated = true;
    }
    evaluated
}

/// Exact key first, then ASCII case-insensitive
fn lookup_header<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    headers
        .get(key)
        .or_else(|| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .map(String::as_str)
}

fn cached_regex(pattern: &str) -> Option<Regex> {
    static CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Some(re) = cache.read().get(pattern) {
        return Some(re.clone());
    }
    match Regex::new(pattern) {
        Ok(re) => {
            cache.write().insert(pattern.to_string(), re.clone());
            Some(re)
        }
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Invalid header regex");
            None
        }
    }
}

/// Validate a candidate rule set for one service
///
/// Rejects weight sums above 100, malformed operator maps, uncompilable
/// regexes, non-integer numeric bounds and references to unknown templates.
pub fn validate_rules(
    service: &str,
    rules: &[RouteRule],
    templates: &HashMap<String, Match>,
) -> std::result::Result<(), String> {
    for rule in rules {
        let total = rule.total_weight();
        if total > MAX_TOTAL_WEIGHT {
            return Err(format!(
                "Service '{}' rule with precedence {} has total weight {} (max {})",
                service, rule.precedence, total, MAX_TOTAL_WEIGHT
            ));
        }
        if let Some(refer) = rule.matcher.refer.as_deref().filter(|r| !r.is_empty()) {
            if !templates.contains_key(refer) {
                return Err(format!(
                    "Service '{}' rule refers to unknown template '{}'",
                    service, refer
                ));
            }
        }
        validate_match(&rule.matcher)
            .map_err(|e| format!("Service '{}' rule with precedence {}: {}", service, rule.precedence, e))?;
    }
    Ok(())
}

/// Validate the header predicates of a match block
pub fn validate_match(m: &Match) -> std::result::Result<(), String> {
    for (header, ops) in &m.headers {
        let operators: Vec<_> = ops.iter().filter(|(op, _)| *op != CASE_INSENSITIVE).collect();
        if operators.len() != 1 {
            return Err(format!(
                "header '{}' must have exactly one operator, got {}",
                header,
                operators.len()
            ));
        }
        let (op, expected) = operators[0];
        let operator = op.parse::<HeaderOperator>()?;
        if operator == HeaderOperator::Regex {
            Regex::new(expected).map_err(|e| format!("header '{}' has invalid regex: {}", header, e))?;
        }
        if operator.is_numeric() && expected.trim().parse::<i64>().is_err() {
            return Err(format!(
                "header '{}' operator {} needs an integer, got '{}'",
                header,
                operator.as_str(),
                expected
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scalar-tolerant deserialization (YAML writes `weight: 100` and `version: "1"` alike)
// ---------------------------------------------------------------------------

struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number or boolean")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Scalar, E> {
                // keep `1.0` as written instead of collapsing to `1`
                if v.is_finite() && v.fract() == 0.0 {
                    return Ok(Scalar(format!("{:.1}", v)));
                }
                Ok(Scalar(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Scalar, E> {
                Ok(Scalar(v.to_string()))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// Deserialize a single scalar (string, number or boolean) into its text form
pub(crate) fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| s.0).unwrap_or_default())
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, Scalar>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

fn scalar_nested_map<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, HashMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, HashMap<String, Scalar>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, ops)| (k, ops.into_iter().map(|(op, v)| (op, v.0)).collect()))
        .collect())
}
