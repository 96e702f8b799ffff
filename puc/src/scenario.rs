// puc/src/scenario.rs
//! Scripted registry traffic replayed against a container.
use std::fs;
use std::path::Path;

use puc_common::dependency::UnitDescriptor;
use puc_common::error::{PucError, Result};
use puc_common::model::{Announcement, AnnouncementId, Module, ModuleId};
use puc_core::Container;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A module together with the persistence units it declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    #[serde(flatten)]
    pub module: Module,
    #[serde(default)]
    pub units: Vec<UnitDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Declare(ModuleDeclaration),
    Withdraw(ModuleId),
    Arrive(Announcement),
    Remove(AnnouncementId),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Declared before the first step.
    #[serde(default)]
    pub modules: Vec<ModuleDeclaration>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading scenario from {}", path.display());
        let raw = fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&raw).map_err(|e| {
            PucError::Parse("scenario", format!("{}: {e}", path.display()))
        })?;
        info!(
            "Scenario {} has {} module(s) and {} step(s)",
            path.display(),
            scenario.modules.len(),
            scenario.steps.len()
        );
        Ok(scenario)
    }

    /// Feeds every declaration and step to `container` in order. Returns the
    /// requirement errors reported along the way.
    pub fn replay(&self, container: &Container) -> Vec<PucError> {
        let mut errors = Vec::new();
        for declaration in &self.modules {
            errors.extend(declare(container, declaration));
        }
        for step in &self.steps {
            match step {
                Step::Declare(declaration) => errors.extend(declare(container, declaration)),
                Step::Withdraw(module) => container.module_withdrawn(*module),
                Step::Arrive(announcement) => container.capability_arrived(announcement.clone()),
                Step::Remove(id) => container.capability_removed(*id),
            }
        }
        errors
    }
}

fn declare(container: &Container, declaration: &ModuleDeclaration) -> Vec<PucError> {
    container.units_declared(declaration.module.clone(), declaration.units.clone())
}
