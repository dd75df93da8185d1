//! Rule patterns and the connection triple they match

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PolicyError;

/// Pattern text matching any value
pub const WILDCARD: &str = "*";

/// A rule field: an exact literal or the wildcard
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pattern {
    #[default]
    Any,
    Exact(String),
}

impl Pattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Pattern::Exact(value.into())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(literal) => literal == value,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Pattern::Any)
    }
}

impl FromStr for Pattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(PolicyError::InvalidPattern(s.to_string())),
            WILDCARD => Ok(Pattern::Any),
            literal => Ok(Pattern::Exact(literal.to_string())),
        }
    }
}

impl TryFrom<String> for Pattern {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str(WILDCARD),
            Pattern::Exact(literal) => f.write_str(literal),
        }
    }
}

/// Source service, destination service and destination gateway of a
/// connection attempt
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub service_src: String,
    pub service_dst: String,
    pub gw_dest: String,
}

impl Flow {
    pub fn new(service_src: impl Into<String>, service_dst: impl Into<String>, gw_dest: impl Into<String>) -> Self {
        Self {
            service_src: service_src.into(),
            service_dst: service_dst.into(),
            gw_dest: gw_dest.into(),
        }
    }
}

/// Identity of a rule; adding a rule with an existing key replaces it
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleKey {
    #[serde(default)]
    pub service_src: Pattern,
    #[serde(default)]
    pub service_dst: Pattern,
    #[serde(default)]
    pub gw_dest: Pattern,
}

impl RuleKey {
    pub fn new(service_src: Pattern, service_dst: Pattern, gw_dest: Pattern) -> Self {
        Self {
            service_src,
            service_dst,
            gw_dest,
        }
    }

    /// Parse a key from pattern text, e.g. `("svcA", "*", "*")`
    pub fn parse(service_src: &str, service_dst: &str, gw_dest: &str) -> crate::Result<Self> {
        Ok(Self::new(service_src.parse()?, service_dst.parse()?, gw_dest.parse()?))
    }

    pub fn matches(&self, flow: &Flow) -> bool {
        self.service_src.matches(&flow.service_src)
            && self.service_dst.matches(&flow.service_dst)
            && self.gw_dest.matches(&flow.gw_dest)
    }

    /// Number of wildcard fields; fewer is more specific
    pub fn wildcards(&self) -> usize {
        [&self.service_src, &self.service_dst, &self.gw_dest]
            .into_iter()
            .filter(|p| p.is_wildcard())
            .count()
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} @ {}", self.service_src, self.service_dst, self.gw_dest)
    }
}
