//! Unpacking verified payloads into an environment.
//!
//! Unlike a download-to-disk installer, this engine verifies digests over
//! in-memory bytes before anything touches the environment, so the unpackers
//! consume `&[u8]` directly. Archives that wrap their content in a single
//! top-level directory (source tarballs usually do) have that directory
//! stripped, so a resource lands at its own root.

use anyhow::{Context, Result, anyhow};
use flate2::read::GzDecoder;
use log::debug;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use zip::ZipArchive;

use crate::runtime::Runtime;

/// Whether a payload name looks like an archive this engine can unpack.
pub fn is_archive(name: &str) -> bool {
    let name = name.to_lowercase();
    name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".zip")
}

/// Unpack a payload into `dest`, dispatching on the payload name.
///
/// Non-archive payloads are written as a single file named after the last
/// URL segment.
#[tracing::instrument(skip(runtime, bytes), fields(len = bytes.len()))]
pub fn unpack<R: Runtime + ?Sized>(
    runtime: &R,
    name: &str,
    bytes: &[u8],
    dest: &Path,
) -> Result<()> {
    let lower = name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        unpack_tar_gz(runtime, bytes, dest)
    } else if lower.ends_with(".zip") {
        unpack_zip(runtime, bytes, dest)
    } else {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| anyhow!("Payload name {:?} has no file name", name))?;
        runtime.create_dir_all(dest)?;
        runtime
            .write(&dest.join(file_name), bytes)
            .with_context(|| format!("Failed to write payload {:?}", file_name))?;
        Ok(())
    }
}

/// Returns the shared top-level directory to strip, if the archive has one.
///
/// Stripping applies only when every file entry sits below one common first
/// component; a flat archive is left as-is.
fn common_root<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Option<PathBuf> {
    let mut root: Option<PathBuf> = None;
    let mut saw_file = false;
    for path in paths {
        let mut components = path.components();
        let first = match components.next() {
            Some(Component::Normal(c)) => PathBuf::from(c),
            _ => return None,
        };
        if components.next().is_none() {
            // A file directly at the archive root: nothing to strip.
            return None;
        }
        saw_file = true;
        match &root {
            None => root = Some(first),
            Some(r) if *r == first => {}
            Some(_) => return None,
        }
    }
    if saw_file { root } else { None }
}

/// Drop `root` from the front of `path`, keeping only safe normal components.
/// Returns `None` for entries that would escape `dest`.
fn sanitized(path: &Path, root: Option<&PathBuf>) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            // Absolute paths and `..` never land in the environment.
            _ => return None,
        }
    }
    let out = match root {
        Some(root) => out.strip_prefix(root).ok()?.to_path_buf(),
        None => out,
    };
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn unpack_tar_gz<R: Runtime + ?Sized>(runtime: &R, bytes: &[u8], dest: &Path) -> Result<()> {
    debug!("Unpacking tar.gz archive to {:?}...", dest);

    // First pass over the in-memory bytes: collect file paths to decide
    // whether a top-level directory should be stripped.
    let mut file_paths: Vec<PathBuf> = Vec::new();
    {
        let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
        for entry in archive.entries().context("Failed to read tar archive")? {
            let entry = entry.context("Failed to read tar entry")?;
            if entry.header().entry_type().is_file() {
                file_paths.push(entry.path()?.to_path_buf());
            }
        }
    }
    let root = common_root(file_paths.iter());
    if let Some(ref root) = root {
        debug!("Stripping top-level directory {:?}", root);
    }

    runtime.create_dir_all(dest)?;

    let mut archive = Archive::new(GzDecoder::new(Cursor::new(bytes)));
    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let entry_path = entry.path()?.to_path_buf();
        let Some(relative) = sanitized(&entry_path, root.as_ref()) else {
            debug!("Skipping tar entry {:?}", entry_path);
            continue;
        };
        let full_path = dest.join(&relative);

        if entry.header().entry_type().is_dir() {
            runtime.create_dir_all(&full_path)?;
            continue;
        }
        if !entry.header().entry_type().is_file() {
            debug!("Skipping non-regular tar entry {:?}", entry_path);
            continue;
        }

        if let Some(parent) = full_path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut dest_file = runtime.create_file(&full_path)?;
        std::io::copy(&mut entry, &mut dest_file)
            .with_context(|| format!("Failed to unpack file {:?}", full_path))?;

        #[cfg(unix)]
        if let Ok(mode) = entry.header().mode()
            && let Err(e) = runtime.set_permissions(&full_path, mode)
        {
            debug!("Failed to set permissions on {:?}: {}", full_path, e);
        }
    }

    Ok(())
}

fn unpack_zip<R: Runtime + ?Sized>(runtime: &R, bytes: &[u8], dest: &Path) -> Result<()> {
    debug!("Unpacking zip archive to {:?}...", dest);

    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("Failed to parse ZIP archive")?;

    let mut file_paths: Vec<PathBuf> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read ZIP entry {}", i))?;
        if let Some(path) = entry.enclosed_name()
            && !entry.is_dir()
        {
            file_paths.push(path);
        }
    }
    let root = common_root(file_paths.iter());
    if let Some(ref root) = root {
        debug!("Stripping top-level directory {:?}", root);
    }

    runtime.create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read ZIP entry {}", i))?;
        let Some(entry_path) = entry.enclosed_name() else {
            debug!("Skipping ZIP entry with invalid path");
            continue;
        };
        let Some(relative) = sanitized(&entry_path, root.as_ref()) else {
            debug!("Skipping ZIP entry {:?}", entry_path);
            continue;
        };
        let full_path = dest.join(&relative);

        if entry.is_dir() {
            runtime.create_dir_all(&full_path)?;
            continue;
        }

        if let Some(parent) = full_path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut dest_file = runtime.create_file(&full_path)?;
        std::io::copy(&mut entry, &mut dest_file)
            .with_context(|| format!("Failed to unpack file {:?}", full_path))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode()
            && let Err(e) = runtime.set_permissions(&full_path, mode)
        {
            debug!("Failed to set permissions on {:?}: {}", full_path, e);
        }
    }

    Ok(())
}
