//! The declarative package descriptor.
//!
//! A descriptor is human-authored JSON naming a target tool, the system
//! dependencies assumed to be present, and the pinned sub-resources the tool
//! needs. It carries no logic of its own; the engine consumes it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::digest::Sha256Digest;
use crate::error::PipelineError;
use crate::runtime::Runtime;

/// A URL-addressed artifact with a mandatory integrity pin.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteArtifact {
    pub url: String,
    pub sha256: Sha256Digest,
}

/// A named sub-resource the target tool needs at runtime.
///
/// `requires` lists other resource names that must be installed first.
/// Declaration order is preserved wherever no such constraint applies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PinnedResource {
    pub name: String,
    pub url: String,
    pub sha256: Sha256Digest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

/// The post-install smoke test: arguments passed to the installed entry
/// point, and a substring the combined output must contain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerificationSpec {
    #[serde(default)]
    pub args: Vec<String>,
    pub expect: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    pub source: RemoteArtifact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// External tools assumed present on the system; probed, never installed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<PinnedResource>,
    /// Path of the tool's entry point, relative to the environment root.
    pub entry_point: PathBuf,
    pub verification: VerificationSpec,
}

impl PackageDescriptor {
    /// Load and validate a descriptor from a JSON file.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read descriptor at {:?}", path))?;
        let descriptor: PackageDescriptor = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse descriptor at {:?}", path))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Structural checks that must hold before a plan is built.
    ///
    /// Malformed digests are already rejected during deserialization; this
    /// catches the remaining fail-closed cases, notably identical digests
    /// pinned for distinct URLs. Two different artifacts cannot share a
    /// SHA-256, so duplication is authoring filler and is treated as
    /// untrusted.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.is_empty() {
            return Err(PipelineError::Descriptor {
                reason: "package name is empty".into(),
            });
        }
        if self.version.is_empty() {
            return Err(PipelineError::Descriptor {
                reason: "package version is empty".into(),
            });
        }
        if self.entry_point.as_os_str().is_empty() || self.entry_point.is_absolute() {
            return Err(PipelineError::Descriptor {
                reason: format!(
                    "entry_point {:?} must be a relative path inside the environment",
                    self.entry_point
                ),
            });
        }
        if self.verification.expect.is_empty() {
            return Err(PipelineError::Descriptor {
                reason: "verification.expect is empty".into(),
            });
        }

        let mut seen_names: HashSet<&str> = HashSet::new();
        for resource in &self.resources {
            if resource.name.is_empty() {
                return Err(PipelineError::Descriptor {
                    reason: format!("resource with url {} has an empty name", resource.url),
                });
            }
            if !seen_names.insert(resource.name.as_str()) {
                return Err(PipelineError::Descriptor {
                    reason: format!("resource '{}' is declared twice", resource.name),
                });
            }
        }

        // Identical pins on distinct URLs fail closed.
        let mut by_digest: HashMap<Sha256Digest, (&str, &str)> = HashMap::new();
        let pins = self
            .resources
            .iter()
            .map(|r| (r.name.as_str(), r.url.as_str(), r.sha256))
            .chain(std::iter::once((
                self.name.as_str(),
                self.source.url.as_str(),
                self.source.sha256,
            )));
        for (name, url, digest) in pins {
            if let Some((other_name, other_url)) = by_digest.insert(digest, (name, url))
                && other_url != url
            {
                return Err(PipelineError::Integrity {
                    resource: name.to_string(),
                    detail: format!(
                        "digest {} is also pinned for '{}' with a different URL; \
                         identical pins look like placeholder values",
                        digest, other_name
                    ),
                });
            }
        }

        Ok(())
    }

    /// Find a declared resource by name.
    pub fn resource(&self, name: &str) -> Option<&PinnedResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}
