// puc-common/src/model/work_item.rs
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::capability::{CapabilityKind, Module, ModuleId, Properties};
use crate::dependency::Requirement;

/// Identity of a work item: the defining module plus the unit name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId {
    pub module: ModuleId,
    pub name: String,
}

impl WorkItemId {
    pub fn new(module: ModuleId, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.name)
    }
}

/// A declared unit of work that becomes usable once every requirement is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub name: String,
    pub module: Module,
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub metadata: Properties,
}

impl WorkItem {
    pub fn new(module: Module, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module,
            requirements: Vec::new(),
            metadata: Properties::new(),
        }
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn id(&self) -> WorkItemId {
        WorkItemId::new(self.module.id, self.name.clone())
    }

    /// The distinct kinds this item waits for.
    pub fn required_kinds(&self) -> BTreeSet<CapabilityKind> {
        self.requirements.iter().map(|r| r.kind.clone()).collect()
    }

    pub fn requirement(&self, kind: &CapabilityKind) -> Option<&Requirement> {
        self.requirements.iter().find(|r| &r.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    Waiting,
    Active,
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationState::Waiting => f.write_str("waiting"),
            ActivationState::Active => f.write_str("active"),
        }
    }
}
