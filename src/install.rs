//! The install pipeline and the operations the CLI drives.
//!
//! Pipeline: resolve -> fetch -> verify -> install -> verify output. All
//! resource payloads are fetched (per stage, concurrently) and digest-checked
//! before anything is unpacked, so an integrity failure writes zero resource
//! files into the environment. The first failure of any phase halts the
//! pipeline and records `Failed(reason)` in the environment's meta, naming
//! the resource or step that caused it.

use anyhow::{Result, anyhow};
use futures_util::future;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::Path;

use crate::archive;
use crate::cellar::{Cellar, EnvironmentHandle, InstallState, InstalledMeta};
use crate::check::{self, CommandRunner};
use crate::cleanup::SharedCleanupContext;
use crate::descriptor::PackageDescriptor;
use crate::digest::Sha256Digest;
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::plan::{InstallPlan, InstallStep};
use crate::runtime::{Runtime, find_in_path};

/// Install a descriptor into the cellar and smoke-test the result.
#[tracing::instrument(skip(runtime, fetcher, runner, cellar, cleanup_ctx))]
pub async fn install<R, F, C>(
    runtime: &R,
    fetcher: &F,
    runner: &C,
    cellar: &Cellar,
    descriptor_path: &Path,
    force: bool,
    cleanup_ctx: SharedCleanupContext,
) -> Result<()>
where
    R: Runtime + ?Sized,
    F: Fetcher + ?Sized,
    C: CommandRunner + ?Sized,
{
    let descriptor = PackageDescriptor::load(runtime, descriptor_path)?;
    probe_system_dependencies(runtime, &descriptor);

    let handle = cellar.create(runtime, &descriptor, force)?;
    {
        let mut ctx = cleanup_ctx.lock().unwrap();
        ctx.add(handle.root().to_path_buf());
    }

    let mut meta = InstalledMeta::new(&descriptor);
    let result = run_pipeline(runtime, fetcher, runner, &descriptor, &handle, &mut meta).await;

    {
        let mut ctx = cleanup_ctx.lock().unwrap();
        ctx.remove(handle.root());
    }

    match result {
        Ok(()) => {
            println!(
                "  installed {} {} -> {}",
                descriptor.name,
                descriptor.version,
                handle.root().display()
            );
            Ok(())
        }
        Err(e) => {
            // The environment stays on disk, clearly marked incomplete.
            let _ = handle.set_state(runtime, &mut meta, InstallState::Failed(e.to_string()));
            Err(e.into())
        }
    }
}

async fn run_pipeline<R, F, C>(
    runtime: &R,
    fetcher: &F,
    runner: &C,
    descriptor: &PackageDescriptor,
    handle: &EnvironmentHandle,
    meta: &mut InstalledMeta,
) -> Result<(), PipelineError>
where
    R: Runtime + ?Sized,
    F: Fetcher + ?Sized,
    C: CommandRunner + ?Sized,
{
    mark(runtime, handle, meta, InstallState::Resolving)?;
    let plan = InstallPlan::resolve(descriptor)?;

    // Fetch every pinned payload, stage by stage. Members of one stage have
    // no mutual ordering constraint and are fetched concurrently.
    mark(runtime, handle, meta, InstallState::Fetching)?;
    println!(
        " fetching {} {} ({} resources)",
        descriptor.name,
        descriptor.version,
        plan.resource_count()
    );
    let mut payloads: HashMap<String, Vec<u8>> = HashMap::new();
    for stage in plan.stages() {
        let fetched = future::try_join_all(stage.iter().map(|resource| async move {
            debug!("Fetching resource '{}' from {}", resource.name, resource.url);
            let bytes =
                fetcher
                    .fetch(&resource.url)
                    .await
                    .map_err(|e| PipelineError::Fetch {
                        resource: resource.name.clone(),
                        url: resource.url.clone(),
                        reason: format!("{:#}", e),
                    })?;
            Ok::<(String, Vec<u8>), PipelineError>((resource.name.clone(), bytes))
        }))
        .await?;
        payloads.extend(fetched);
    }
    let target = plan.target();
    debug!("Fetching target source from {}", target.artifact.url);
    let target_bytes =
        fetcher
            .fetch(&target.artifact.url)
            .await
            .map_err(|e| PipelineError::Fetch {
                resource: target.name.clone(),
                url: target.artifact.url.clone(),
                reason: format!("{:#}", e),
            })?;

    // Check every digest before a single byte lands in the environment.
    mark(runtime, handle, meta, InstallState::Verifying)?;
    for resource in plan.resources() {
        let bytes = payload(&payloads, &resource.name)?;
        check_digest(&resource.name, &resource.sha256, bytes)?;
    }
    check_digest(&target.name, &target.artifact.sha256, &target_bytes)?;

    mark(runtime, handle, meta, InstallState::Installing)?;
    for step in plan.steps() {
        let (url, bytes, dest) = match &step {
            InstallStep::Resource(resource) => {
                println!("  installing resource '{}'", resource.name);
                (
                    resource.url.as_str(),
                    payload(&payloads, &resource.name)?.as_slice(),
                    handle.resource_dir(&resource.name),
                )
            }
            InstallStep::Target(target) => {
                println!("  installing {} {}", descriptor.name, descriptor.version);
                (
                    target.artifact.url.as_str(),
                    target_bytes.as_slice(),
                    handle.root().to_path_buf(),
                )
            }
        };
        archive::unpack(runtime, url, bytes, &dest).map_err(|e| PipelineError::Install {
            resource: step.name().to_string(),
            reason: format!("{:#}", e),
        })?;
    }

    let entry_point = handle.root().join(&descriptor.entry_point);
    if !runtime.exists(&entry_point) {
        return Err(PipelineError::Install {
            resource: target.name.clone(),
            reason: format!(
                "entry point {} missing after install",
                descriptor.entry_point.display()
            ),
        });
    }
    runtime
        .set_permissions(&entry_point, 0o755)
        .map_err(|e| PipelineError::Install {
            resource: target.name.clone(),
            reason: format!("failed to mark entry point executable: {:#}", e),
        })?;
    meta.entry_point = Some(entry_point.clone());

    mark(runtime, handle, meta, InstallState::VerifyingOutput)?;
    check::run_check(runner, &descriptor.name, &entry_point, &descriptor.verification).await?;

    mark(runtime, handle, meta, InstallState::Complete)?;
    Ok(())
}

/// Re-run the smoke test of an installed package.
#[tracing::instrument(skip(runtime, runner, cellar))]
pub async fn verify<R, C>(runtime: &R, runner: &C, cellar: &Cellar, name: &str) -> Result<()>
where
    R: Runtime + ?Sized,
    C: CommandRunner + ?Sized,
{
    let (_, meta) = cellar
        .find(runtime, name)?
        .ok_or_else(|| anyhow!("'{}' is not installed", name))?;

    if !meta.state.is_complete() {
        info!("'{}' {} is in state: {}", meta.name, meta.version, meta.state);
    }
    let entry_point = meta.entry_point.clone().ok_or_else(|| {
        PipelineError::Verification {
            name: name.to_string(),
            reason: "no entry point recorded; the install never completed".into(),
        }
    })?;

    check::run_check(runner, &meta.name, &entry_point, &meta.descriptor.verification).await?;
    println!("  verified {} {}", meta.name, meta.version);
    Ok(())
}

/// Delete every environment of a package.
#[tracing::instrument(skip(runtime, cellar))]
pub fn remove<R: Runtime + ?Sized>(runtime: &R, cellar: &Cellar, name: &str) -> Result<()> {
    if cellar.remove(runtime, name)? {
        println!("  removed {}", name);
        Ok(())
    } else {
        Err(anyhow!("'{}' is not installed", name))
    }
}

/// Print every installed environment, flagging incomplete ones.
#[tracing::instrument(skip(runtime, cellar))]
pub fn list<R: Runtime + ?Sized>(runtime: &R, cellar: &Cellar) -> Result<()> {
    let metas = cellar.list(runtime)?;
    if metas.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }
    for meta in metas {
        if meta.state.is_complete() {
            println!("{} {}", meta.name, meta.version);
        } else {
            println!("{} {} [{}]", meta.name, meta.version, meta.state);
        }
    }
    Ok(())
}

fn payload<'a>(
    payloads: &'a HashMap<String, Vec<u8>>,
    name: &str,
) -> Result<&'a Vec<u8>, PipelineError> {
    payloads.get(name).ok_or_else(|| PipelineError::Install {
        resource: name.to_string(),
        reason: "payload missing after fetch phase".into(),
    })
}

fn check_digest(name: &str, pin: &Sha256Digest, bytes: &[u8]) -> Result<(), PipelineError> {
    if pin.matches(bytes) {
        debug!("Digest verified for '{}'", name);
        Ok(())
    } else {
        Err(PipelineError::Integrity {
            resource: name.to_string(),
            detail: format!(
                "digest mismatch: expected {}, got {}",
                pin,
                Sha256Digest::compute(bytes)
            ),
        })
    }
}

fn mark<R: Runtime + ?Sized>(
    runtime: &R,
    handle: &EnvironmentHandle,
    meta: &mut InstalledMeta,
    state: InstallState,
) -> Result<(), PipelineError> {
    handle
        .set_state(runtime, meta, state)
        .map_err(|e| PipelineError::Environment {
            name: meta.name.clone(),
            reason: format!("{:#}", e),
        })
}

fn probe_system_dependencies<R: Runtime + ?Sized>(runtime: &R, descriptor: &PackageDescriptor) {
    for dep in &descriptor.system_dependencies {
        // "python@3.11" probes for "python"; the version pin is informational.
        let executable = dep.split('@').next().unwrap_or(dep);
        match find_in_path(runtime, executable) {
            Some(path) => debug!("System dependency '{}' found at {:?}", dep, path),
            None => warn!(
                "System dependency '{}' not found on PATH; the installed tool may not run",
                dep
            ),
        }
    }
}
