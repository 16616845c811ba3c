pub mod deploy;
pub mod dry_run;
pub mod layout;
pub mod mirror;
pub mod patcher;
pub mod session;

pub use deploy::{ArtifactDeployer, DeploySummary, DeploymentRequest};
pub use session::{RemoteFs, RemoteSession};
