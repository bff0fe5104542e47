//! The cellar: isolated environment roots and their recorded state.
//!
//! Every descriptor installs into its own root, `<cellar>/<name>/<version>`,
//! and owns everything beneath it. A `meta.json` inside the root records a
//! snapshot of the descriptor, the entry-point path once installed, and the
//! pipeline state, so an interrupted or failed install is never mistakable
//! for a complete one.

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::descriptor::PackageDescriptor;
use crate::error::PipelineError;
use crate::runtime::Runtime;

pub const META_FILE: &str = "meta.json";

/// Pipeline state machine. Anything other than `Complete` marks an
/// incomplete installation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum InstallState {
    Pending,
    Resolving,
    Fetching,
    Verifying,
    Installing,
    VerifyingOutput,
    Complete,
    Failed(String),
}

impl InstallState {
    pub fn is_complete(&self) -> bool {
        matches!(self, InstallState::Complete)
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallState::Pending => write!(f, "pending"),
            InstallState::Resolving => write!(f, "resolving"),
            InstallState::Fetching => write!(f, "fetching"),
            InstallState::Verifying => write!(f, "verifying"),
            InstallState::Installing => write!(f, "installing"),
            InstallState::VerifyingOutput => write!(f, "verifying-output"),
            InstallState::Complete => write!(f, "complete"),
            InstallState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Metadata stored in each environment root.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstalledMeta {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub state: InstallState,
    /// Absolute path of the installed entry point, recorded by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<PathBuf>,
    /// Snapshot of the descriptor this environment was built from.
    pub descriptor: PackageDescriptor,
}

impl InstalledMeta {
    pub fn new(descriptor: &PackageDescriptor) -> Self {
        InstalledMeta {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            license: descriptor.license.clone(),
            state: InstallState::Pending,
            entry_point: None,
            descriptor: descriptor.clone(),
        }
    }
}

/// Handle to one environment root. All writes the executor performs are
/// confined beneath this root.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentHandle {
    root: PathBuf,
}

impl EnvironmentHandle {
    pub fn new(root: PathBuf) -> Self {
        EnvironmentHandle { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a named resource unpacks into.
    pub fn resource_dir(&self, resource_name: &str) -> PathBuf {
        self.root.join("lib").join(resource_name)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    pub fn write_meta<R: Runtime + ?Sized>(&self, runtime: &R, meta: &InstalledMeta) -> Result<()> {
        let json = serde_json::to_string_pretty(meta).context("Failed to serialize meta")?;
        runtime
            .write(&self.meta_path(), json.as_bytes())
            .with_context(|| format!("Failed to write {:?}", self.meta_path()))
    }

    pub fn load_meta<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<InstalledMeta> {
        let content = runtime
            .read_to_string(&self.meta_path())
            .with_context(|| format!("Failed to read {:?}", self.meta_path()))?;
        serde_json::from_str(&content).with_context(|| format!("Corrupt {:?}", self.meta_path()))
    }

    /// Record a state transition.
    pub fn set_state<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        meta: &mut InstalledMeta,
        state: InstallState,
    ) -> Result<()> {
        debug!("{} {}: {} -> {}", meta.name, meta.version, meta.state, state);
        meta.state = state;
        self.write_meta(runtime, meta)
    }
}

/// The cellar root directory holding every environment.
#[derive(Debug, Clone)]
pub struct Cellar {
    root: PathBuf,
}

impl Cellar {
    /// Resolve the cellar root: an explicit override, or `~/.cellar`.
    pub fn new<R: Runtime + ?Sized>(runtime: &R, root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(root) => root,
            None => runtime
                .home_dir()
                .ok_or_else(|| anyhow!("Could not determine home directory"))?
                .join(".cellar"),
        };
        Ok(Cellar { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn env_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name).join(version)
    }

    /// Build a fresh environment root for a descriptor.
    ///
    /// The root is claimed with a plain `create_dir`, so two concurrent
    /// installs of the same descriptor serialize: the loser observes
    /// `AlreadyExists`. Rebuilding over an existing root happens only when
    /// the caller passes `force` explicitly.
    #[tracing::instrument(skip(self, runtime, descriptor), fields(package = %descriptor.name))]
    pub fn create<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        descriptor: &PackageDescriptor,
        force: bool,
    ) -> Result<EnvironmentHandle, PipelineError> {
        let env_dir = self.env_dir(&descriptor.name, &descriptor.version);

        if runtime.exists(&env_dir) {
            if !force {
                return Err(PipelineError::AlreadyExists {
                    name: descriptor.name.clone(),
                    version: descriptor.version.clone(),
                });
            }
            debug!("Force rebuild: removing {:?}", env_dir);
            runtime
                .remove_dir_all(&env_dir)
                .map_err(|e| PipelineError::Environment {
                    name: descriptor.name.clone(),
                    reason: format!("failed to remove existing environment: {:#}", e),
                })?;
        }

        runtime
            .create_dir_all(&self.package_dir(&descriptor.name))
            .map_err(|e| PipelineError::Environment {
                name: descriptor.name.clone(),
                reason: format!("{:#}", e),
            })?;

        runtime.create_dir(&env_dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                // Lost the race against a concurrent install of the same
                // descriptor.
                PipelineError::AlreadyExists {
                    name: descriptor.name.clone(),
                    version: descriptor.version.clone(),
                }
            } else {
                PipelineError::Environment {
                    name: descriptor.name.clone(),
                    reason: format!("failed to create environment root: {}", e),
                }
            }
        })?;

        let handle = EnvironmentHandle::new(env_dir);
        let meta = InstalledMeta::new(descriptor);
        handle
            .write_meta(runtime, &meta)
            .map_err(|e| PipelineError::Environment {
                name: descriptor.name.clone(),
                reason: format!("{:#}", e),
            })?;

        Ok(handle)
    }

    /// Every environment of a named package, sorted by version string.
    pub fn installed_versions<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        name: &str,
    ) -> Result<Vec<(EnvironmentHandle, InstalledMeta)>> {
        let package_dir = self.package_dir(name);
        if !runtime.is_dir(&package_dir) {
            return Ok(vec![]);
        }

        let mut found = Vec::new();
        let mut entries = runtime.read_dir(&package_dir)?;
        entries.sort();
        for entry in entries {
            let handle = EnvironmentHandle::new(entry.clone());
            if !runtime.exists(&handle.meta_path()) {
                debug!("Skipping {:?}: no {}", entry, META_FILE);
                continue;
            }
            let meta = handle.load_meta(runtime)?;
            found.push((handle, meta));
        }
        Ok(found)
    }

    /// The preferred environment for a package: the newest complete one,
    /// falling back to the newest of any state.
    pub fn find<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        name: &str,
    ) -> Result<Option<(EnvironmentHandle, InstalledMeta)>> {
        let versions = self.installed_versions(runtime, name)?;
        let complete = versions
            .iter()
            .rfind(|(_, meta)| meta.state.is_complete())
            .cloned();
        Ok(complete.or_else(|| versions.last().cloned()))
    }

    /// Remove every environment of a package. Returns false when nothing was
    /// installed.
    pub fn remove<R: Runtime + ?Sized>(&self, runtime: &R, name: &str) -> Result<bool> {
        let package_dir = self.package_dir(name);
        if !runtime.exists(&package_dir) {
            return Ok(false);
        }
        runtime
            .remove_dir_all(&package_dir)
            .with_context(|| format!("Failed to remove {:?}", package_dir))?;
        Ok(true)
    }

    /// All installed environments across packages.
    pub fn list<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<Vec<InstalledMeta>> {
        if !runtime.is_dir(&self.root) {
            return Ok(vec![]);
        }
        let mut all = Vec::new();
        let mut packages = runtime.read_dir(&self.root)?;
        packages.sort();
        for package_dir in packages {
            if !runtime.is_dir(&package_dir) {
                continue;
            }
            let Some(name) = package_dir.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            for (_, meta) in self.installed_versions(runtime, &name)? {
                all.push(meta);
            }
        }
        Ok(all)
    }
}
