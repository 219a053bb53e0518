//! Dark launch — translation of legacy JSON policies into route rules
//!
//! ```json
//! {
//!   "policyType": "RULE",
//!   "ruleItems": [
//!     { "groupName": "s1", "groupCondition": "version=1.1",
//!       "policyCondition": "user-level>=3", "caseInsensitive": false }
//!   ]
//! }
//! ```
//!
//! `RATE` policies become one rule with a weighted route per version;
//! `RULE` policies become one header-matching rule per item.

use super::rule::{scalar_string, HeaderOperator, Match, RouteRule, RouteTag, CASE_INSENSITIVE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Precedence assigned to every translated rule
pub const DARK_LAUNCH_PRECEDENCE: i32 = 1;

/// Condition operators, in the order they are tried
const CONDITION_OPERATORS: [(&str, HeaderOperator); 7] = [
    ("!=", HeaderOperator::NoEqu),
    (">=", HeaderOperator::NoLess),
    ("<=", HeaderOperator::NoGreater),
    ("=", HeaderOperator::Exact),
    (">", HeaderOperator::Greater),
    ("<", HeaderOperator::Less),
    ("~", HeaderOperator::Regex),
];

/// Policy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DarkLaunchType {
    /// Conditional routing on a request header
    #[serde(rename = "RULE")]
    Rule,
    /// Pure percentage split
    #[serde(rename = "RATE")]
    Rate,
}

/// Legacy dark launch policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarkLaunchRule {
    /// `RULE` or `RATE`
    #[serde(rename = "policyType", alias = "type")]
    pub kind: DarkLaunchType,
    /// Policy items
    #[serde(rename = "ruleItems", alias = "items", default)]
    pub items: Vec<RuleItem>,
}

/// One group of a dark launch policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleItem {
    /// Display name of the group
    #[serde(default)]
    pub group_name: String,
    /// Target versions, `version=1.0,1.1`
    #[serde(default)]
    pub group_condition: String,
    /// Percentage (`RATE`) or `key<op>value` (`RULE`)
    #[serde(default, deserialize_with = "scalar_string")]
    pub policy_condition: String,
    /// Compare header values ignoring case
    #[serde(default)]
    pub case_insensitive: bool,
    /// Target versions when `groupCondition` carries none
    #[serde(default)]
    pub versions: Vec<String>,
}

impl DarkLaunchRule {
    /// Parse a JSON policy
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Translate a dark launch policy into canonical route rules
pub fn dark_launch_to_route_rules(rule: &DarkLaunchRule) -> Result<Vec<RouteRule>, String> {
    match rule.kind {
        DarkLaunchType::Rate => {
            let mut routes = Vec::new();
            for item in &rule.items {
                let weight = item.policy_condition.trim().parse::<u32>().map_err(|_| {
                    format!(
                        "RATE item '{}' has non-numeric weight '{}'",
                        item.group_name, item.policy_condition
                    )
                })?;
                for version in target_versions(item)? {
                    routes.push(RouteTag::version(version, weight));
                }
            }
            Ok(vec![RouteRule {
                precedence: DARK_LAUNCH_PRECEDENCE,
                routes,
                matcher: Match::default(),
            }])
        }
        DarkLaunchType::Rule => rule.items.iter().map(rule_item_to_route_rule).collect(),
    }
}

fn rule_item_to_route_rule(item: &RuleItem) -> Result<RouteRule, String> {
    let (key, operator, value) = parse_condition(&item.policy_condition)?;
    let versions = target_versions(item)?;
    let weight = 100 / versions.len() as u32;

    let mut ops = HashMap::new();
    ops.insert(operator.as_str().to_string(), value);
    ops.insert(CASE_INSENSITIVE.to_string(), item.case_insensitive.to_string());

    let mut matcher = Match::default();
    matcher.headers.insert(canonical_header_key(&key), ops);

    Ok(RouteRule {
        precedence: DARK_LAUNCH_PRECEDENCE,
        routes: versions
            .into_iter()
            .map(|v| RouteTag::version(v, weight))
            .collect(),
        matcher,
    })
}

/// Split `key<op>value` on the first operator found, in fixed order
fn parse_condition(condition: &str) -> Result<(String, HeaderOperator, String), String> {
    for (symbol, operator) in CONDITION_OPERATORS {
        if let Some(idx) = condition.find(symbol) {
            let key = condition[..idx].trim();
            let value = condition[idx + symbol.len()..].trim();
            if key.is_empty() {
                return Err(format!("condition '{}' has no header key", condition));
            }
            return Ok((key.to_string(), operator, value.to_string()));
        }
    }
    Err(format!("condition '{}' has no recognised operator", condition))
}

/// Versions named by `groupCondition`, falling back to `versions`
fn target_versions(item: &RuleItem) -> Result<Vec<String>, String> {
    let from_condition: Vec<String> = item
        .group_condition
        .split_once('=')
        .map(|(_, list)| {
            list.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let versions = if from_condition.is_empty() {
        item.versions.clone()
    } else {
        from_condition
    };
    if versions.is_empty() {
        return Err(format!("item '{}' names no target version", item.group_name));
    }
    Ok(versions)
}

/// `user-level` → `User-Level`
pub fn canonical_header_key(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
