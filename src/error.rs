//! Failure taxonomy for the install pipeline.
//!
//! Every pipeline failure carries the name of the resource or step that
//! caused it; nothing is swallowed or retried inside the engine. The CLI
//! downcasts [`PipelineError`] out of `anyhow::Error` to pick an exit code
//! per failure class.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The descriptor is structurally invalid (plan-build time).
    #[error("invalid descriptor: {reason}")]
    Descriptor { reason: String },

    /// The resource dependency graph contains a cycle (plan-build time).
    #[error("dependency cycle among resources: {}", names.join(" -> "))]
    Cycle { names: Vec<String> },

    /// A resource requires a prerequisite that is not declared.
    #[error("resource '{resource}' requires undeclared resource '{requires}'")]
    UnknownDependency { resource: String, requires: String },

    /// A fetch failed; timeouts and HTTP errors are reported uniformly.
    #[error("failed to fetch '{resource}' from {url}: {reason}")]
    Fetch {
        resource: String,
        url: String,
        reason: String,
    },

    /// A digest is missing, malformed, or does not match the fetched bytes.
    #[error("integrity failure for '{resource}': {detail}")]
    Integrity { resource: String, detail: String },

    /// The isolated environment could not be built.
    #[error("environment error for '{name}': {reason}")]
    Environment { name: String, reason: String },

    /// The environment root already exists and `force` was not set.
    #[error("'{name}' {version} is already installed (use --force to rebuild)")]
    AlreadyExists { name: String, version: String },

    /// Unpacking or placing a verified resource failed.
    #[error("failed to install '{resource}': {reason}")]
    Install { resource: String, reason: String },

    /// The post-install smoke test did not produce the expected output.
    #[error("verification failed for '{name}': {reason}")]
    Verification { name: String, reason: String },
}

impl PipelineError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Descriptor { .. }
            | PipelineError::Cycle { .. }
            | PipelineError::UnknownDependency { .. } => 2,
            PipelineError::Fetch { .. } => 3,
            PipelineError::Integrity { .. } => 4,
            PipelineError::Environment { .. } | PipelineError::AlreadyExists { .. } => 5,
            PipelineError::Install { .. } => 6,
            PipelineError::Verification { .. } => 7,
        }
    }
}
