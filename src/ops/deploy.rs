use crate::config::DeployerConfig;
use crate::console;
use crate::error::{DeployError, DeployResult};
use crate::file_watcher::ChangeWatcher;
use crate::ops::dry_run::{DryRunPatcher, DryRunRemote};
use crate::ops::layout::RemoteLayout;
use crate::ops::mirror::{MirrorStats, PathMirror};
use crate::ops::patcher::{PatchInvocation, Patcher, SystemPatcher};
use crate::ops::session::{RemoteFs, RemoteSession};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// One deploy invocation. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub version: String,
    pub build_id: String,
    pub run_patch: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeploySummary {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

impl From<MirrorStats> for DeploySummary {
    fn from(stats: MirrorStats) -> Self {
        Self {
            directories: stats.directories,
            files: stats.files,
            bytes: stats.bytes,
        }
    }
}

pub struct ArtifactDeployer<'a> {
    config: &'a DeployerConfig,
}

impl<'a> ArtifactDeployer<'a> {
    pub fn new(config: &'a DeployerConfig) -> Self {
        Self { config }
    }

    /// Run the patcher (if requested), then mirror manifests, channels and
    /// the version's build output to the remote host.
    pub fn deploy(
        &self,
        request: &DeploymentRequest,
        dry_run: bool,
    ) -> DeployResult<DeploySummary> {
        if dry_run {
            console::warn("Dry run: nothing will be generated or uploaded");
            self.deploy_with(request, &DryRunPatcher, || Ok(DryRunRemote))
        } else {
            self.deploy_with(request, &SystemPatcher, || {
                RemoteSession::connect(&self.config.server)
            })
        }
    }

    /// Deploy through the given patcher and remote. The remote returned by
    /// `connect` is dropped (and so closed) on every exit path.
    pub fn deploy_with<R, P, C>(
        &self,
        request: &DeploymentRequest,
        patcher: &P,
        connect: C,
    ) -> DeployResult<DeploySummary>
    where
        R: RemoteFs,
        P: Patcher + ?Sized,
        C: FnOnce() -> DeployResult<R>,
    {
        if request.run_patch {
            let invocation =
                PatchInvocation::new(self.config, &request.version, &request.build_id)?;
            patcher.run(&invocation)?;
        }

        let local_roots = self.config.local_roots(&request.version);
        check_local_roots(&local_roots)?;

        let layout = RemoteLayout::new(&self.config.remote_root);
        let remote_roots = layout.roots(&request.version);

        let mut remote = connect()?;
        let mut mirror = PathMirror::new(&mut remote);
        let mut stats = MirrorStats::default();

        for root in &remote_roots {
            mirror.ensure_dir(root)?;
        }
        for (local, remote_root) in local_roots.iter().zip(remote_roots.iter()) {
            console::info(format!("Syncing {} -> {}", local.display(), remote_root));
            stats += mirror.mirror(local, remote_root)?;
        }

        let summary = DeploySummary::from(stats);
        console::ok(format!(
            "Deployment finished ({} files, {} bytes)",
            summary.files, summary.bytes
        ));
        Ok(summary)
    }
}

/// All three local trees must exist as directories before anything is
/// uploaded.
pub fn check_local_roots(roots: &[PathBuf]) -> DeployResult<()> {
    for root in roots {
        if !root.is_dir() {
            return Err(DeployError::config(format!(
                "Local directory not found: {}",
                root.display()
            )));
        }
    }
    Ok(())
}

/// Watch the local trees for `version` and redeploy (without the patcher)
/// on every change until `shutdown` resolves.
pub async fn watch<S>(config: Arc<DeployerConfig>, version: &str, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let trigger_config = Arc::clone(&config);
    watch_with(
        &config,
        version,
        move |request| ArtifactDeployer::new(&trigger_config).deploy(request, false),
        shutdown,
    )
    .await
}

/// [`watch`] with the redeploy step supplied by the caller. Failures from
/// `redeploy` are logged and the watcher keeps running.
pub async fn watch_with<F, S>(
    config: &DeployerConfig,
    version: &str,
    redeploy: F,
    shutdown: S,
) -> anyhow::Result<()>
where
    F: Fn(&DeploymentRequest) -> DeployResult<DeploySummary> + Send + Sync + 'static,
    S: Future<Output = ()>,
{
    let roots = config.local_roots(version);
    check_local_roots(&roots)?;

    let request = DeploymentRequest {
        version: version.to_string(),
        build_id: config.default_build_id.clone(),
        run_patch: false,
    };

    let action = move |path: PathBuf| {
        console::warn(format!("Change detected: {}", path.display()));
        if let Err(e) = redeploy(&request) {
            console::error(format!("Auto-sync failed: {}", e));
        }
    };

    ChangeWatcher::new(roots.to_vec()).run(action, shutdown).await
}
