// puc-common/src/model/capability.rs
use std::collections::BTreeMap;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::version::deserialize_lenient;

/// Arbitrary key/value metadata attached to announcements and work items.
pub type Properties = BTreeMap<String, Value>;

/// Registration property holding a service's numeric ranking.
pub const SERVICE_RANKING: &str = "service.ranking";

/// Stable handle of a deployable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub symbolic_name: String,
    #[serde(deserialize_with = "deserialize_lenient")]
    pub version: Version,
}

impl Module {
    pub fn new(id: u64, symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            id: ModuleId(id),
            symbolic_name: symbolic_name.into(),
            version,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbolic_name, self.version)
    }
}

/// Names a requirement slot, e.g. `jta-data-source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityKind(String);

impl CapabilityKind {
    pub const PROVIDER: &'static str = "persistence-provider";
    pub const TRANSACTION_MANAGER: &'static str = "transaction-manager";
    pub const DATA_SOURCE_FACTORY: &'static str = "data-source-factory";
    pub const JTA_DATA_SOURCE: &'static str = "jta-data-source";
    pub const NON_JTA_DATA_SOURCE: &'static str = "non-jta-data-source";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn provider() -> Self {
        Self::new(Self::PROVIDER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CapabilityKind {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Opaque registry handle. Handles are handed out in registration order, so a
/// lower id always means an earlier announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnouncementId(pub u64);

impl fmt::Display for AnnouncementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc-{}", self.0)
    }
}

/// A capability published by some module through the external registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: AnnouncementId,
    /// Interfaces the capability is registered under.
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
    /// The module that registered the capability.
    pub module: Module,
}

impl Announcement {
    pub fn offers(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// String form of a property; numbers and booleans are rendered.
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn service_ranking(&self) -> i64 {
        self.properties
            .get(SERVICE_RANKING)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_announcement_from_json() {
        let ann: Announcement = serde_json::from_value(json!({
            "id": 7,
            "interfaces": ["javax.sql.DataSource"],
            "properties": { "osgi.jndi.service.name": "orders", "service.ranking": 5 },
            "module": { "id": 3, "symbolic_name": "org.example.h2", "version": "1.4" }
        }))
        .unwrap();

        assert_eq!(ann.id, AnnouncementId(7));
        assert!(ann.offers("javax.sql.DataSource"));
        assert!(!ann.offers("javax.sql.XADataSource"));
        assert_eq!(ann.property_str("osgi.jndi.service.name").as_deref(), Some("orders"));
        assert_eq!(ann.property_str("service.ranking").as_deref(), Some("5"));
        assert_eq!(ann.service_ranking(), 5);
        assert_eq!(ann.module.version, Version::new(1, 4, 0));
        assert_eq!(ann.module.to_string(), "org.example.h2:1.4.0");
    }

    #[test]
    fn test_missing_ranking_defaults_to_zero() {
        let ann = Announcement {
            id: AnnouncementId(1),
            interfaces: vec![],
            properties: Properties::new(),
            module: Module::new(1, "m", Version::new(1, 0, 0)),
        };
        assert_eq!(ann.service_ranking(), 0);
    }
}
