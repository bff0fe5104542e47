//! Environment variables and system information.

use std::env;
use std::path::PathBuf;

use super::{RealRuntime, Runtime};

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn home_dir_impl(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

/// Look up an executable name on the runtime's PATH.
///
/// Returns the first directory entry that exists. Used to probe for declared
/// system dependencies; the engine never installs them.
pub fn find_in_path<R: Runtime + ?Sized>(runtime: &R, name: &str) -> Option<PathBuf> {
    let path_var = runtime.env_var("PATH").ok()?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if runtime.exists(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{}.exe", name));
            if runtime.exists(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}
