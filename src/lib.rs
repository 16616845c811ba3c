pub mod config;
pub mod console;
pub mod error;
pub mod file_watcher;
pub mod ops;


pub use config::DeployerConfig;
pub use error::{DeployError, DeployResult};
