use crate::config::DeployerConfig;
use crate::console;
use crate::error::{DeployError, DeployResult};
use std::path::PathBuf;
use std::process::Command;

/// Everything needed to run the patch tool for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInvocation {
    pub program: String,
    pub prefix_args: Vec<String>,
    pub app_id: String,
    pub channel: String,
    pub version: String,
    pub build_id: String,
    pub build_output: PathBuf,
    pub working_dir: PathBuf,
}

impl PatchInvocation {
    /// Build the invocation and check that the version's build output
    /// exists. A missing build output is a configuration problem, not a
    /// patcher failure.
    pub fn new(config: &DeployerConfig, version: &str, build_id: &str) -> DeployResult<Self> {
        let build_output = config.build_output_dir(version);
        if !build_output.is_dir() {
            return Err(DeployError::config(format!(
                "Build outputs not found for version {}: {}",
                version,
                build_output.display()
            )));
        }

        let (program, prefix_args) = config
            .patcher_command
            .split_first()
            .ok_or_else(|| DeployError::config("patcher_command is empty"))?;

        Ok(Self {
            program: program.clone(),
            prefix_args: prefix_args.to_vec(),
            app_id: config.app_id.clone(),
            channel: config.channel.clone(),
            version: version.to_string(),
            build_id: build_id.to_string(),
            build_output,
            working_dir: config.patcher_dir.clone(),
        })
    }

    /// Positional arguments after the configured prefix:
    /// app id, channel, version, build id, build output path.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        args.extend([
            self.app_id.clone(),
            self.channel.clone(),
            self.version.clone(),
            self.build_id.clone(),
            self.build_output.display().to_string(),
        ]);
        args
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs the external patch-generation step.
pub trait Patcher {
    fn run(&self, invocation: &PatchInvocation) -> DeployResult<()>;
}

/// Spawns the configured command and waits for it, inheriting stdio.
pub struct SystemPatcher;

impl Patcher for SystemPatcher {
    fn run(&self, invocation: &PatchInvocation) -> DeployResult<()> {
        console::info(format!("Running patcher: {}", invocation.command_line()));

        let status = Command::new(&invocation.program)
            .args(invocation.args())
            .current_dir(&invocation.working_dir)
            .status()
            .map_err(|source| DeployError::PatcherSpawn {
                dir: invocation.working_dir.clone(),
                source,
            })?;

        if status.success() {
            console::ok("Patcher finished");
            Ok(())
        } else {
            // Killed by a signal: no code to pass through.
            Err(DeployError::PatcherFailed {
                code: status.code().unwrap_or(1),
            })
        }
    }
}
