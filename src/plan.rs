//! Dependency resolution: descriptor in, install plan out.
//!
//! The plan is immutable once computed. Resources are ordered so that every
//! prerequisite precedes its dependents; resources with no mutual constraint
//! keep their declaration order. The plan also groups resources into
//! *stages*: all members of one stage have no ordering constraint between
//! them, so the executor may fetch and verify them concurrently.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::descriptor::{PackageDescriptor, PinnedResource, RemoteArtifact};
use crate::error::PipelineError;

/// The final step of every plan: install the target tool itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStep {
    pub name: String,
    pub artifact: RemoteArtifact,
    pub entry_point: PathBuf,
}

/// One step of an install plan.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallStep<'a> {
    Resource(&'a PinnedResource),
    Target(&'a TargetStep),
}

impl InstallStep<'_> {
    pub fn name(&self) -> &str {
        match self {
            InstallStep::Resource(r) => &r.name,
            InstallStep::Target(t) => &t.name,
        }
    }
}

/// A resolved, topologically ordered install plan.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    stages: Vec<Vec<PinnedResource>>,
    target: TargetStep,
}

impl InstallPlan {
    /// Resolve a descriptor into a plan.
    ///
    /// Kahn's algorithm, processed in rounds: stage `k` holds every resource
    /// whose prerequisites are all in stages `< k`, in declaration order.
    /// Concatenating the stages therefore yields a deterministic topological
    /// order. Fails with [`PipelineError::UnknownDependency`] when a
    /// `requires` entry names an undeclared resource and with
    /// [`PipelineError::Cycle`] when the graph has no valid order.
    #[tracing::instrument(skip(descriptor), fields(package = %descriptor.name))]
    pub fn resolve(descriptor: &PackageDescriptor) -> Result<Self, PipelineError> {
        let resources = &descriptor.resources;
        let declared: HashSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();

        for resource in resources {
            for requirement in &resource.requires {
                if !declared.contains(requirement.as_str()) {
                    return Err(PipelineError::UnknownDependency {
                        resource: resource.name.clone(),
                        requires: requirement.clone(),
                    });
                }
            }
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&PinnedResource> = resources.iter().collect();
        let mut stages: Vec<Vec<PinnedResource>> = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&PinnedResource>, Vec<&PinnedResource>) = remaining
                .into_iter()
                .partition(|r| r.requires.iter().all(|d| placed.contains(d.as_str())));

            if ready.is_empty() {
                // Nothing became installable: the rest form a cycle.
                let names = blocked.iter().map(|r| r.name.clone()).collect();
                return Err(PipelineError::Cycle { names });
            }

            for resource in &ready {
                placed.insert(resource.name.as_str());
            }
            stages.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }

        Ok(InstallPlan {
            stages,
            target: TargetStep {
                name: descriptor.name.clone(),
                artifact: descriptor.source.clone(),
                entry_point: descriptor.entry_point.clone(),
            },
        })
    }

    /// Concurrency batches: members of one stage have no mutual ordering
    /// constraint.
    pub fn stages(&self) -> &[Vec<PinnedResource>] {
        &self.stages
    }

    /// All resources in topological order.
    pub fn resources(&self) -> impl Iterator<Item = &PinnedResource> {
        self.stages.iter().flatten()
    }

    /// Every step in execution order, the target install last.
    pub fn steps(&self) -> impl Iterator<Item = InstallStep<'_>> {
        self.resources()
            .map(InstallStep::Resource)
            .chain(std::iter::once(InstallStep::Target(&self.target)))
    }

    pub fn target(&self) -> &TargetStep {
        &self.target
    }

    pub fn resource_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Sha256Digest;
    use crate::test_utils::{pinned_resource, sample_descriptor};

    fn names(plan: &InstallPlan) -> Vec<&str> {
        plan.resources().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_declaration_order_without_constraints() {
        let mut descriptor = sample_descriptor();
        descriptor.resources = vec![
            pinned_resource("selenium", &[]),
            pinned_resource("webdriver-manager", &[]),
            pinned_resource("click", &[]),
        ];

        let plan = InstallPlan::resolve(&descriptor).unwrap();

        assert_eq!(names(&plan), vec!["selenium", "webdriver-manager", "click"]);
        // Mutually unconstrained resources land in a single stage.
        assert_eq!(plan.stages().len(), 1);
        assert_eq!(plan.stages()[0].len(), 3);
    }

    #[test]
    fn test_prerequisites_precede_dependents() {
        let mut descriptor = sample_descriptor();
        descriptor.resources = vec![
            pinned_resource("webdriver-manager", &["selenium"]),
            pinned_resource("selenium", &[]),
            pinned_resource("click", &[]),
        ];

        let plan = InstallPlan::resolve(&descriptor).unwrap();

        // selenium and click are ready first (declaration order among them),
        // webdriver-manager only after selenium.
        assert_eq!(names(&plan), vec!["selenium", "click", "webdriver-manager"]);
        assert_eq!(plan.stages().len(), 2);
        assert_eq!(plan.stages()[1][0].name, "webdriver-manager");
    }

    #[test]
    fn test_each_resource_appears_exactly_once() {
        let mut descriptor = sample_descriptor();
        descriptor.resources = vec![
            pinned_resource("a", &[]),
            pinned_resource("b", &["a"]),
            pinned_resource("c", &["a", "b"]),
            pinned_resource("d", &["a"]),
        ];

        let plan = InstallPlan::resolve(&descriptor).unwrap();

        assert_eq!(names(&plan), vec!["a", "b", "d", "c"]);
        assert_eq!(plan.resource_count(), 4);
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut descriptor = sample_descriptor();
        descriptor.resources = vec![
            pinned_resource("a", &["b"]),
            pinned_resource("b", &["a"]),
            pinned_resource("standalone", &[]),
        ];

        let err = InstallPlan::resolve(&descriptor).unwrap_err();

        match err {
            PipelineError::Cycle { names } => {
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Cycle, got {other}"),
        }
    }

    #[test]
    fn test_unknown_prerequisite_is_rejected() {
        let mut descriptor = sample_descriptor();
        descriptor.resources = vec![pinned_resource("a", &["ghost"])];

        let err = InstallPlan::resolve(&descriptor).unwrap_err();

        match err {
            PipelineError::UnknownDependency { resource, requires } => {
                assert_eq!(resource, "a");
                assert_eq!(requires, "ghost");
            }
            other => panic!("expected UnknownDependency, got {other}"),
        }
    }

    #[test]
    fn test_target_step_is_last() {
        let descriptor = sample_descriptor();
        let plan = InstallPlan::resolve(&descriptor).unwrap();

        let steps: Vec<_> = plan.steps().collect();
        assert!(matches!(steps.last(), Some(InstallStep::Target(t)) if t.name == descriptor.name));
        assert_eq!(steps.len(), descriptor.resources.len() + 1);
    }

    #[test]
    fn test_empty_resource_list_still_installs_target() {
        let mut descriptor = sample_descriptor();
        descriptor.resources.clear();
        descriptor.source.sha256 = Sha256Digest::compute(b"target only");

        let plan = InstallPlan::resolve(&descriptor).unwrap();

        assert!(plan.stages().is_empty());
        assert_eq!(plan.steps().count(), 1);
    }
}
