//! One-way mirroring of a local tree onto the remote host.
//!
//! Every file under the local root is uploaded on every run; there is no
//! diffing. The first failure aborts the whole mirror and leaves whatever
//! was already uploaded in place. Remote paths always use `/`.

use crate::error::{DeployError, DeployResult};
use crate::ops::session::RemoteFs;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Join a remote directory and a child name with `/`.
pub fn remote_join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Parent of a remote path, or `None` for a bare name or `/`.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

impl std::ops::AddAssign for MirrorStats {
    fn add_assign(&mut self, other: Self) {
        self.directories += other.directories;
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Walks local trees and reproduces them through a [`RemoteFs`].
///
/// Remembers which remote directories it has already ensured so each one
/// is created at most once per mirror instance.
pub struct PathMirror<'a, R: RemoteFs> {
    remote: &'a mut R,
    ensured: HashSet<String>,
}

impl<'a, R: RemoteFs> PathMirror<'a, R> {
    pub fn new(remote: &'a mut R) -> Self {
        Self {
            remote,
            ensured: HashSet::new(),
        }
    }

    pub fn ensure_dir(&mut self, remote_path: &str) -> DeployResult<()> {
        if self.ensured.contains(remote_path) {
            return Ok(());
        }
        self.remote.ensure_dir(remote_path)?;
        self.ensured.insert(remote_path.to_string());
        Ok(())
    }

    /// Mirror `local` (file or directory) to `remote_path`.
    pub fn mirror(&mut self, local: &Path, remote_path: &str) -> DeployResult<MirrorStats> {
        let mut stats = MirrorStats::default();
        self.sync_node(local, remote_path, &mut stats)?;
        Ok(stats)
    }

    fn sync_node(
        &mut self,
        local: &Path,
        remote_path: &str,
        stats: &mut MirrorStats,
    ) -> DeployResult<()> {
        let local_error = |reason: String| DeployError::transfer(local.display().to_string(), reason);

        let link_meta = fs::symlink_metadata(local).map_err(|e| local_error(e.to_string()))?;
        let meta = if link_meta.file_type().is_symlink() {
            let target = fs::metadata(local)
                .map_err(|e| local_error(format!("broken symlink: {}", e)))?;
            if target.is_dir() {
                return Err(local_error("symlinked directories are not mirrored".into()));
            }
            target
        } else {
            link_meta
        };

        if meta.is_dir() {
            self.sync_dir(local, remote_path, stats)
        } else if meta.is_file() {
            self.sync_file(local, remote_path, stats)
        } else {
            Err(local_error("unsupported file type".into()))
        }
    }

    fn sync_dir(
        &mut self,
        local: &Path,
        remote_path: &str,
        stats: &mut MirrorStats,
    ) -> DeployResult<()> {
        if !self.ensured.contains(remote_path) {
            self.ensure_dir(remote_path)?;
            stats.directories += 1;
        }

        let mut children = fs::read_dir(local)
            .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
            .map_err(|e| DeployError::transfer(local.display().to_string(), e))?;
        children.sort_by_key(|entry| entry.file_name());

        for child in children {
            let name = child.file_name();
            let name = name.to_str().ok_or_else(|| {
                DeployError::transfer(child.path().display().to_string(), "file name is not UTF-8")
            })?;
            self.sync_node(&child.path(), &remote_join(remote_path, name), stats)?;
        }
        Ok(())
    }

    fn sync_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        stats: &mut MirrorStats,
    ) -> DeployResult<()> {
        if let Some(parent) = remote_parent(remote_path) {
            if !self.ensured.contains(parent) {
                if !self.remote.exists(parent)? {
                    self.remote.ensure_dir(parent)?;
                    stats.directories += 1;
                }
                self.ensured.insert(parent.to_string());
            }
        }

        let bytes = self.remote.upload(local, remote_path)?;
        stats.files += 1;
        stats.bytes += bytes;
        Ok(())
    }
}
