//! Interrupt handling for in-progress installs.
//!
//! A cancelled install must leave its environment in the `Failed` state,
//! never in an unmarked partial state indistinguishable from success. The
//! install pipeline registers each environment root here and unregisters it
//! once the pipeline has written a terminal state itself.

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cellar::{EnvironmentHandle, InstallState};
use crate::runtime::RealRuntime;

/// Tracks environment roots that need a `Failed` marker on interruption.
#[derive(Default)]
pub struct CleanupContext {
    env_roots: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment root with an install in flight.
    pub fn add(&mut self, root: PathBuf) {
        self.env_roots.push(root);
    }

    /// Unregister a root once the pipeline has recorded a terminal state.
    pub fn remove(&mut self, root: &Path) {
        self.env_roots.retain(|p| p != root);
    }

    /// Mark every registered environment as failed. Best-effort: invoked
    /// from the Ctrl-C path right before the process exits.
    pub fn cleanup(&self) {
        let runtime = RealRuntime;
        for root in &self.env_roots {
            debug!("Marking interrupted environment: {:?}", root);
            let handle = EnvironmentHandle::new(root.clone());
            if let Ok(mut meta) = handle.load_meta(&runtime)
                && !meta.state.is_complete()
            {
                let _ = handle.set_state(
                    &runtime,
                    &mut meta,
                    InstallState::Failed("interrupted".into()),
                );
            }
        }
    }
}

/// Type alias for shared cleanup context
pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

/// Create a new shared cleanup context
pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}
