//! Registry of workflow steps.

use std::collections::BTreeMap;

use super::corilla::Corilla;
use super::imextract::ImageExtraction;
use super::metaconfig::MetadataConfiguration;
use super::StepDefinition;
use crate::error::{PlateflowError, Result};

/// Steps available to the planner and the engine, by name.
pub struct StepRegistry {
    steps: BTreeMap<String, Box<dyn StepDefinition>>,
}

impl StepRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in steps.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MetadataConfiguration));
        registry.register(Box::new(ImageExtraction));
        registry.register(Box::new(Corilla));
        registry
    }

    /// Register a step, replacing any step of the same name.
    pub fn register(&mut self, step: Box<dyn StepDefinition>) {
        self.steps.insert(step.name().to_string(), step);
    }

    /// Get a step by name.
    pub fn get(&self, name: &str) -> Option<&dyn StepDefinition> {
        self.steps.get(name).map(|s| s.as_ref())
    }

    /// Get a step by name, failing with `UnknownStep`.
    pub fn require(&self, name: &str) -> Result<&dyn StepDefinition> {
        self.get(name).ok_or_else(|| PlateflowError::UnknownStep {
            name: name.to_string(),
        })
    }

    /// Iterate over steps in name order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn StepDefinition> {
        self.steps.values().map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_new_is_empty() {
        let registry = StepRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = StepRegistry::with_builtins();
        let names: Vec<&str> = registry.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["corilla", "imextract", "metaconfig"]);
    }

    #[test]
    fn require_unknown_step_fails() {
        let registry = StepRegistry::with_builtins();
        let err = registry.require("jterator").err().unwrap();
        assert!(matches!(err, PlateflowError::UnknownStep { .. }));
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = StepRegistry::with_builtins();
        registry.register(Box::new(Corilla));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn every_builtin_publishes_a_schema() {
        let registry = StepRegistry::with_builtins();
        for step in registry.iter() {
            assert!(step.parameter_schema().is_object(), "{}", step.name());
            assert!(!step.description().is_empty());
        }
    }
}
