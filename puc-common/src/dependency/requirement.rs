// puc-common/src/dependency/requirement.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use super::filter::Filter;
use crate::error::{PucError, Result};
use crate::model::{Announcement, CapabilityKind, VersionRange};

/// Prefix of a data-source expression that names a registry service rather
/// than a JNDI name.
pub const SERVICE_EXPRESSION_PREFIX: &str = "osgi:service";

/// One slot a work item needs filled before it can activate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub kind: CapabilityKind,
    #[serde(default)]
    pub constraint: Constraint,
}

impl Requirement {
    pub fn new(kind: impl Into<CapabilityKind>, constraint: Constraint) -> Self {
        Self {
            kind: kind.into(),
            constraint,
        }
    }
}

/// Declared, uncompiled narrowing of which announcements may fill a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Constraint {
    #[default]
    Any,
    PropertyEquals {
        key: String,
        value: String,
    },
    Filter {
        filter: String,
    },
    /// `osgi:service/<interface>[/<filter>]`.
    ServiceExpression {
        expression: String,
    },
    /// Provider name (absent or blank = any) and acceptable provider version
    /// range.
    Provider {
        name: Option<String>,
        version_range: Option<String>,
    },
}

impl Constraint {
    /// Compiles the constraint for `kind`; any syntax problem is an
    /// `InvalidRequirement`.
    pub fn compile(&self, kind: &CapabilityKind) -> Result<Matcher> {
        match self {
            Constraint::Any => Ok(Matcher::Any),
            Constraint::PropertyEquals { key, value } => Ok(Matcher::PropertyEquals {
                key: key.clone(),
                value: value.clone(),
            }),
            Constraint::Filter { filter } => Filter::parse(filter)
                .map(Matcher::Filter)
                .map_err(|e| PucError::invalid_requirement(kind.as_str(), e.to_string())),
            Constraint::ServiceExpression { expression } => {
                parse_service_expression(kind, expression)
            }
            Constraint::Provider { .. } => Ok(Matcher::Any),
        }
    }

    /// The provider request of a `Provider` constraint, with a blank name
    /// normalised to `None` and the range parsed.
    pub fn provider_request(&self, kind: &CapabilityKind) -> Result<ProviderRequest> {
        match self {
            Constraint::Provider {
                name,
                version_range,
            } => {
                let name = name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                let range = version_range
                    .as_deref()
                    .map(|raw| {
                        raw.parse::<VersionRange>().map_err(|e| {
                            PucError::invalid_requirement(
                                kind.as_str(),
                                format!("bad provider version range '{raw}': {e}"),
                            )
                        })
                    })
                    .transpose()?;
                Ok(ProviderRequest { name, range })
            }
            _ => Ok(ProviderRequest::default()),
        }
    }
}

fn parse_service_expression(kind: &CapabilityKind, expression: &str) -> Result<Matcher> {
    let invalid = |reason: String| PucError::invalid_requirement(kind.as_str(), reason);

    let rest = expression
        .trim()
        .strip_prefix(SERVICE_EXPRESSION_PREFIX)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| {
            invalid(format!(
                "'{expression}' must look like {SERVICE_EXPRESSION_PREFIX}/<interface>[/<filter>]"
            ))
        })?;

    let (interface, filter) = match rest.split_once('/') {
        Some((interface, filter)) => (interface, filter.trim()),
        None => (rest, ""),
    };
    if interface.is_empty() {
        return Err(invalid(format!("'{expression}' names no interface")));
    }
    if filter.is_empty() {
        return Ok(Matcher::Any);
    }
    Filter::parse(filter)
        .map(Matcher::Filter)
        .map_err(|e| invalid(e.to_string()))
}

/// A compiled suitability predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Any,
    PropertyEquals { key: String, value: String },
    Filter(Filter),
}

impl Matcher {
    pub fn accepts(&self, announcement: &Announcement) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::PropertyEquals { key, value } => {
                announcement.property_str(key).as_deref() == Some(value.as_str())
            }
            Matcher::Filter(filter) => filter.matches(&announcement.properties),
        }
    }
}

/// What a single work item asks of its persistence provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRequest {
    pub name: Option<String>,
    pub range: Option<VersionRange>,
}

impl fmt::Display for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or("*"))?;
        if let Some(range) = &self.range {
            write!(f, " {range}")?;
        }
        Ok(())
    }
}
