//! Analysis module registration and dependency-ordered resolution.

use super::module::AnalysisModule;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("cyclic module dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },
    #[error("module '{module}' depends on unregistered module '{dependency}'")]
    MissingDependency { module: String, dependency: String },
}

/// Name, priority and dependencies of a registered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub priority: u32,
    pub dependencies: Vec<String>,
}

/// A module paired with its descriptor, in execution order once resolved.
#[derive(Clone)]
pub struct ResolvedModule {
    pub descriptor: ModuleDescriptor,
    pub module: Arc<dyn AnalysisModule>,
}

impl fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModule").field("descriptor", &self.descriptor).finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct AnalysisModuleRegistry {
    entries: Vec<ResolvedModule>,
}

impl AnalysisModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. A duplicate name is logged and ignored; returns whether
    /// the module was added.
    pub fn register(&mut self, module: Arc<dyn AnalysisModule>, priority: u32, dependencies: Vec<String>) -> bool {
        let name = module.name().to_string();
        if self.entries.iter().any(|e| e.descriptor.name == name) {
            warn!(module = %name, "analysis module already registered; ignoring");
            return false;
        }
        self.entries.push(ResolvedModule {
            descriptor: ModuleDescriptor {
                name,
                priority,
                dependencies,
            },
            module,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    /// Depth-first topological order. Roots are visited by ascending priority
    /// (ties by registration order), dependencies in declared order.
    pub fn resolve_order(&self) -> Result<Vec<ResolvedModule>, RegistryError> {
        let by_name: BTreeMap<&str, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.descriptor.name.as_str(), i))
            .collect();

        let mut roots: Vec<usize> = (0..self.entries.len()).collect();
        roots.sort_by_key(|&i| self.entries[i].descriptor.priority);

        let mut walk = Walk {
            entries: &self.entries,
            by_name: &by_name,
            done: HashSet::new(),
            path: Vec::new(),
            order: Vec::with_capacity(self.entries.len()),
        };
        for i in roots {
            walk.visit(i)?;
        }
        Ok(walk.order.into_iter().map(|i| self.entries[i].clone()).collect())
    }
}

struct Walk<'a> {
    entries: &'a [ResolvedModule],
    by_name: &'a BTreeMap<&'a str, usize>,
    done: HashSet<usize>,
    /// Current recursion path.
    path: Vec<usize>,
    order: Vec<usize>,
}

impl Walk<'_> {
    fn visit(&mut self, i: usize) -> Result<(), RegistryError> {
        if self.done.contains(&i) {
            return Ok(());
        }
        if let Some(pos) = self.path.iter().position(|&p| p == i) {
            let mut path: Vec<String> = self.path[pos..]
                .iter()
                .map(|&p| self.entries[p].descriptor.name.clone())
                .collect();
            path.push(self.entries[i].descriptor.name.clone());
            return Err(RegistryError::CyclicDependency { path });
        }

        self.path.push(i);
        let entries = self.entries;
        let descriptor = &entries[i].descriptor;
        for dep in &descriptor.dependencies {
            let Some(&d) = self.by_name.get(dep.as_str()) else {
                return Err(RegistryError::MissingDependency {
                    module: descriptor.name.clone(),
                    dependency: dep.clone(),
                });
            };
            self.visit(d)?;
        }
        self.path.pop();

        self.done.insert(i);
        self.order.push(i);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::module::{AnalysisContext, AnalysisError, AnalysisInput, ModuleOutput};

    struct Named(&'static str);

    impl AnalysisModule for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn analyze(&self, _: &AnalysisInput, _: &AnalysisContext) -> Result<ModuleOutput, AnalysisError> {
            Ok(ModuleOutput::new())
        }
    }

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn names(order: &[ResolvedModule]) -> Vec<&str> {
        order.iter().map(|m| m.descriptor.name.as_str()).collect()
    }

    #[test]
    fn chain_resolves_regardless_of_registration_order() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("C")), 1, deps(&["B"]));
        reg.register(Arc::new(Named("B")), 2, deps(&["A"]));
        reg.register(Arc::new(Named("A")), 3, vec![]);
        assert_eq!(names(&reg.resolve_order().unwrap()), ["A", "B", "C"]);
    }

    #[test]
    fn independent_modules_follow_priority() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("late")), 9, vec![]);
        reg.register(Arc::new(Named("early")), 1, vec![]);
        reg.register(Arc::new(Named("tie")), 9, vec![]);
        assert_eq!(names(&reg.resolve_order().unwrap()), ["early", "late", "tie"]);
    }

    #[test]
    fn two_cycle_names_both_modules() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("A")), 1, deps(&["B"]));
        reg.register(Arc::new(Named("B")), 2, deps(&["A"]));
        let err = reg.resolve_order().unwrap_err();
        assert_eq!(
            err,
            RegistryError::CyclicDependency {
                path: deps(&["A", "B", "A"])
            }
        );
        assert_eq!(err.to_string(), "cyclic module dependency: A -> B -> A");
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("A")), 1, deps(&["A"]));
        assert!(matches!(reg.resolve_order(), Err(RegistryError::CyclicDependency { .. })));
    }

    #[test]
    fn unregistered_dependency_is_fatal() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("Cost")), 1, deps(&["Technical"]));
        assert_eq!(
            reg.resolve_order().unwrap_err(),
            RegistryError::MissingDependency {
                module: "Cost".into(),
                dependency: "Technical".into()
            }
        );
    }

    #[test]
    fn duplicate_names_are_ignored() {
        let mut reg = AnalysisModuleRegistry::new();
        assert!(reg.register(Arc::new(Named("A")), 1, vec![]));
        assert!(!reg.register(Arc::new(Named("A")), 2, deps(&["X"])));
        assert_eq!(reg.len(), 1);
        assert!(reg.resolve_order().is_ok());
    }

    #[test]
    fn shared_dependency_appears_once() {
        let mut reg = AnalysisModuleRegistry::new();
        reg.register(Arc::new(Named("Technical")), 1, vec![]);
        reg.register(Arc::new(Named("Sentiment")), 3, vec![]);
        reg.register(Arc::new(Named("Cost")), 0, deps(&["Technical", "Sentiment"]));
        reg.register(Arc::new(Named("Fundamental")), 2, deps(&["Technical"]));
        assert_eq!(
            names(&reg.resolve_order().unwrap()),
            ["Technical", "Sentiment", "Cost", "Fundamental"]
        );
    }
}
