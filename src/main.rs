use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use patch_deployer::config::{default_config_path, DeployerConfig};
use patch_deployer::console;
use patch_deployer::error::DeployError;
use patch_deployer::ops::deploy::{self, ArtifactDeployer, DeploymentRequest};
use std::path::PathBuf;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("patch-deployer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Generate patches and push release artifacts to the update server")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Path to deployer config (default: config.json next to the executable)"),
        )
        .subcommand(
            Command::new("deploy")
                .about("Generate patch and upload to server")
                .arg(
                    Arg::new("version")
                        .long("version")
                        .required(true)
                        .help("Version string (semver)"),
                )
                .arg(
                    Arg::new("build-id")
                        .long("build-id")
                        .required(true)
                        .help("Build identifier"),
                )
                .arg(
                    Arg::new("skip-patcher")
                        .long("skip-patcher")
                        .action(ArgAction::SetTrue)
                        .help("Skip running the patcher locally"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be generated and uploaded without doing it"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Watch local folders and auto-upload")
                .arg(
                    Arg::new("version")
                        .long("version")
                        .required(true)
                        .help("Version to monitor"),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(default_config_path);

    let config = match DeployerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            console::init(None);
            console::error(e.to_string());
            std::process::exit(e.exit_code());
        }
    };
    console::init(config.log_file.as_deref());
    let config = Arc::new(config);

    let result = match matches.subcommand() {
        Some(("deploy", sub_matches)) => run_deploy(config, sub_matches).await,
        Some(("watch", sub_matches)) => run_watch(config, sub_matches).await,
        _ => Ok(()),
    };

    if let Err(e) = result {
        let code = match e.downcast_ref::<DeployError>() {
            Some(err @ DeployError::PatcherFailed { .. }) => {
                console::error(format!("Patcher failed: {}", err));
                err.exit_code()
            }
            Some(err) => {
                console::error(err.to_string());
                err.exit_code()
            }
            None => {
                console::error(format!("Error: {:#}", e));
                1
            }
        };
        std::process::exit(code);
    }
}

fn required(matches: &ArgMatches, id: &str) -> String {
    matches.get_one::<String>(id).cloned().unwrap_or_default()
}

async fn run_deploy(config: Arc<DeployerConfig>, matches: &ArgMatches) -> anyhow::Result<()> {
    let request = DeploymentRequest {
        version: required(matches, "version"),
        build_id: required(matches, "build-id"),
        run_patch: !matches.get_flag("skip-patcher"),
    };
    let dry_run = matches.get_flag("dry-run");

    tokio::task::spawn_blocking(move || ArtifactDeployer::new(&config).deploy(&request, dry_run))
        .await
        .context("Deploy task did not complete")??;
    Ok(())
}

async fn run_watch(config: Arc<DeployerConfig>, matches: &ArgMatches) -> anyhow::Result<()> {
    let version = required(matches, "version");

    deploy::watch(config, &version, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            console::error(format!("Cannot listen for Ctrl+C: {}", e));
            std::future::pending::<()>().await;
        }
    })
    .await?;

    console::ok("Watcher stopped");
    Ok(())
}
