// puc-common/src/dependency/definition.rs
//! Already-parsed persistence unit metadata and the requirements it implies.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::requirement::{Constraint, Requirement, SERVICE_EXPRESSION_PREFIX};
use crate::model::{CapabilityKind, Module, Properties, WorkItem};

pub const JDBC_DRIVER_PROPERTY: &str = "javax.persistence.jdbc.driver";
/// Registration property carrying a persistence provider's class name.
pub const PERSISTENCE_PROVIDER_PROPERTY: &str = "javax.persistence.provider";
pub const PROVIDER_VERSION_PROPERTY: &str = "org.apache.aries.jpa.provider.version";
pub const DRIVER_CLASS_PROPERTY: &str = "osgi.jdbc.driver.class";
pub const UNIT_NAME_PROPERTY: &str = "osgi.unit.name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Jta,
    ResourceLocal,
}

/// A persistence unit as handed over by the descriptor parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub jta_data_source: Option<String>,
    #[serde(default)]
    pub non_jta_data_source: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A JTA transaction manager is needed when a JTA data source is named or
    /// the transaction type is JTA, which is also the default.
    pub fn needs_jta(&self) -> bool {
        self.jta_data_source.is_some()
            || matches!(self.transaction_type, None | Some(TransactionType::Jta))
    }

    pub fn requirements(&self) -> Vec<Requirement> {
        let mut requirements = vec![Requirement::new(
            CapabilityKind::PROVIDER,
            Constraint::Provider {
                name: self.provider.clone(),
                version_range: self.properties.get(PROVIDER_VERSION_PROPERTY).cloned(),
            },
        )];

        if let Some(driver) = self.properties.get(JDBC_DRIVER_PROPERTY) {
            requirements.push(Requirement::new(
                CapabilityKind::DATA_SOURCE_FACTORY,
                Constraint::PropertyEquals {
                    key: DRIVER_CLASS_PROPERTY.to_string(),
                    value: driver.clone(),
                },
            ));
        }

        if self.needs_jta() {
            requirements.push(Requirement::new(
                CapabilityKind::TRANSACTION_MANAGER,
                Constraint::Any,
            ));
        }

        for (kind, expression) in [
            (CapabilityKind::JTA_DATA_SOURCE, &self.jta_data_source),
            (CapabilityKind::NON_JTA_DATA_SOURCE, &self.non_jta_data_source),
        ] {
            if let Some(expression) = expression {
                if expression.starts_with(SERVICE_EXPRESSION_PREFIX) {
                    requirements.push(Requirement::new(
                        kind,
                        Constraint::ServiceExpression {
                            expression: expression.clone(),
                        },
                    ));
                }
            }
        }
        requirements
    }

    pub fn into_work_item(self, module: Module) -> WorkItem {
        let requirements = self.requirements();
        let mut metadata: Properties = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        metadata.insert(UNIT_NAME_PROPERTY.to_string(), Value::String(self.name.clone()));

        WorkItem {
            name: self.name,
            module,
            requirements,
            metadata,
        }
    }
}
