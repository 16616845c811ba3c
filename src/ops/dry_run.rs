use crate::console;
use crate::error::{DeployError, DeployResult};
use crate::ops::patcher::{PatchInvocation, Patcher};
use crate::ops::session::RemoteFs;
use std::path::Path;

/// Stand-in remote that only reports what a real deploy would do.
/// Every remote directory is treated as already present once announced.
#[derive(Debug, Default)]
pub struct DryRunRemote;

impl RemoteFs for DryRunRemote {
    fn ensure_dir(&mut self, remote_path: &str) -> DeployResult<()> {
        console::info(format!("[DRY RUN] Would ensure directory {}", remote_path));
        Ok(())
    }

    fn exists(&mut self, _remote_path: &str) -> DeployResult<bool> {
        Ok(true)
    }

    fn upload(&mut self, local: &Path, remote_path: &str) -> DeployResult<u64> {
        let size = std::fs::metadata(local)
            .map(|m| m.len())
            .map_err(|e| DeployError::transfer(local.display().to_string(), e))?;
        console::info(format!(
            "[DRY RUN] Would upload {} ({} bytes) -> {}",
            local.display(),
            size,
            remote_path
        ));
        Ok(size)
    }
}

#[derive(Debug, Default)]
pub struct DryRunPatcher;

impl Patcher for DryRunPatcher {
    fn run(&self, invocation: &PatchInvocation) -> DeployResult<()> {
        console::info(format!(
            "[DRY RUN] Would run patcher in {}: {}",
            invocation.working_dir.display(),
            invocation.command_line()
        ));
        Ok(())
    }
}
