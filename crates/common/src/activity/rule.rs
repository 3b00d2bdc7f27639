//! Compiled activity rules.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::payload::ActivityInvocationPayload;
use super::ComponentType;

static GEO_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<country>[A-Za-z]{2,3})(?:\.(?P<region>[A-Za-z0-9]{1,3}))?$")
        .expect("geo code regex should compile")
});

/// Verdict of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleResult {
    Allow,
    Disallow,
    Abstain,
}

impl RuleResult {
    #[must_use]
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Disallow
        }
    }
}

/// A precompiled activity rule.
pub trait Rule: fmt::Debug + Send + Sync {
    fn evaluate(&self, payload: &dyn ActivityInvocationPayload) -> RuleResult;

    /// JSON description of the rule for verbose debug traces.
    fn describe(&self) -> Value;
}

/// `COUNTRY` or `COUNTRY.REGION`, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoCode {
    country: String,
    region: Option<String>,
}

impl GeoCode {
    fn matches(&self, country: &str, region: Option<&str>) -> bool {
        if !self.country.eq_ignore_ascii_case(country) {
            return false;
        }
        match (&self.region, region) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

impl FromStr for GeoCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = GEO_CODE_PATTERN
            .captures(s.trim())
            .ok_or_else(|| format!("Invalid geo code '{s}': expected COUNTRY or COUNTRY.REGION"))?;
        Ok(Self {
            country: captures["country"].to_string(),
            region: captures.name("region").map(|m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for GeoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}.{region}", self.country),
            None => f.write_str(&self.country),
        }
    }
}

/// Rule built from configured conditions.
///
/// Each configured clause yields `Some(true)` on match, `Some(false)` on
/// mismatch and `None` when the payload lacks the capability it needs. The
/// rule applies its verdict only when every clause matched; otherwise it
/// abstains. A rule without clauses matches every payload.
#[derive(Debug, Clone)]
pub struct ConditionalRule {
    component_types: Option<Vec<ComponentType>>,
    component_names: Option<Vec<String>>,
    geo_codes: Option<Vec<GeoCode>>,
    gpc: Option<String>,
    allowed: bool,
}

impl ConditionalRule {
    #[must_use]
    pub fn new(
        component_types: Option<Vec<ComponentType>>,
        component_names: Option<Vec<String>>,
        geo_codes: Option<Vec<GeoCode>>,
        gpc: Option<String>,
        allowed: bool,
    ) -> Self {
        Self {
            component_types,
            component_names,
            geo_codes,
            gpc,
            allowed,
        }
    }

    fn component_type_clause(&self, payload: &dyn ActivityInvocationPayload) -> Option<bool> {
        self.component_types
            .as_ref()
            .map_or(Some(true), |types| {
                Some(types.contains(&payload.component().component_type))
            })
    }

    fn component_name_clause(&self, payload: &dyn ActivityInvocationPayload) -> Option<bool> {
        self.component_names.as_ref().map_or(Some(true), |names| {
            let name = &payload.component().name;
            Some(names.iter().any(|n| n.eq_ignore_ascii_case(name)))
        })
    }

    fn geo_clause(&self, payload: &dyn ActivityInvocationPayload) -> Option<bool> {
        let Some(codes) = &self.geo_codes else {
            return Some(true);
        };
        let geo = payload.as_geo()?;
        Some(
            codes
                .iter()
                .any(|code| code.matches(geo.country(), geo.region())),
        )
    }

    fn gpc_clause(&self, payload: &dyn ActivityInvocationPayload) -> Option<bool> {
        let Some(expected) = &self.gpc else {
            return Some(true);
        };
        let signal = payload.as_gpc()?;
        Some(signal.gpc() == expected)
    }
}

impl Rule for ConditionalRule {
    fn evaluate(&self, payload: &dyn ActivityInvocationPayload) -> RuleResult {
        let clauses = [
            self.component_type_clause(payload),
            self.component_name_clause(payload),
            self.geo_clause(payload),
            self.gpc_clause(payload),
        ];

        if clauses.iter().all(|clause| *clause == Some(true)) {
            RuleResult::from_allowed(self.allowed)
        } else {
            RuleResult::Abstain
        }
    }

    fn describe(&self) -> Value {
        json!({
            "component_types": self.component_types.as_ref()
                .map(|types| types.iter().map(ToString::to_string).collect::<Vec<_>>()),
            "component_names": self.component_names,
            "geo_codes": self.geo_codes.as_ref()
                .map(|codes| codes.iter().map(ToString::to_string).collect::<Vec<_>>()),
            "gpc": self.gpc,
            "allow": self.allowed,
        })
    }
}
