use crate::error::{DeployError, DeployResult};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_BUILD_ID: &str = "build000";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PATCHER_COMMAND: &[&str] = &["cargo", "run", "--release", "--"];

pub const REQUIRED_KEYS: &[&str] = &[
    "host",
    "username",
    "remote_root",
    "channel",
    "app_id",
    "build_outputs_dir",
    "manifests_dir",
    "channels_dir",
    "patcher_dir",
];

/// The document as written on disk. Everything is optional here so that
/// validation can report every missing key at once.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    host: Option<String>,
    username: Option<String>,
    remote_root: Option<String>,
    channel: Option<String>,
    app_id: Option<String>,
    build_outputs_dir: Option<String>,
    manifests_dir: Option<String>,
    channels_dir: Option<String>,
    patcher_dir: Option<String>,
    key_path: Option<String>,
    key_passphrase: Option<String>,
    password: Option<String>,
    default_build_id: Option<String>,
    port: Option<u16>,
    connect_timeout_secs: Option<u64>,
    patcher_command: Option<Vec<String>>,
    log_file: Option<String>,
}

impl RawConfig {
    fn value(&self, key: &str) -> Option<&str> {
        let value = match key {
            "host" => &self.host,
            "username" => &self.username,
            "remote_root" => &self.remote_root,
            "channel" => &self.channel,
            "app_id" => &self.app_id,
            "build_outputs_dir" => &self.build_outputs_dir,
            "manifests_dir" => &self.manifests_dir,
            "channels_dir" => &self.channels_dir,
            "patcher_dir" => &self.patcher_dir,
            _ => &None,
        };
        non_empty(value)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// How the session proves its identity. A key file wins when both are set.
#[derive(Debug)]
pub enum AuthMethod {
    KeyFile {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
    Password(SecretString),
}

#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    pub connect_timeout: Duration,
}

impl ServerConfig {
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Validated, immutable configuration for one run.
#[derive(Debug)]
pub struct DeployerConfig {
    pub server: ServerConfig,
    pub remote_root: String,
    pub channel: String,
    pub app_id: String,
    pub build_outputs_dir: PathBuf,
    pub manifests_dir: PathBuf,
    pub channels_dir: PathBuf,
    pub patcher_dir: PathBuf,
    pub patcher_command: Vec<String>,
    pub default_build_id: String,
    pub log_file: Option<PathBuf>,
}

impl DeployerConfig {
    /// Load and validate a config document. `.toml` files are parsed as
    /// TOML, anything else as JSON.
    pub fn load(path: &Path) -> DeployResult<Self> {
        if !path.is_file() {
            return Err(DeployError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| {
            DeployError::config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let is_toml = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));

        let base = std::env::current_dir().map_err(|e| {
            DeployError::config(format!("Cannot determine working directory: {}", e))
        })?;
        Self::parse(&content, is_toml, &base).map_err(|e| match e {
            DeployError::Config(msg) => {
                DeployError::config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse a config document. Relative local paths are resolved against
    /// `base`.
    pub fn parse(content: &str, is_toml: bool, base: &Path) -> DeployResult<Self> {
        let raw: RawConfig = if is_toml {
            toml::from_str(content)
                .map_err(|e| DeployError::config(format!("Invalid config document: {}", e)))?
        } else {
            serde_json::from_str(content)
                .map_err(|e| DeployError::config(format!("Invalid config document: {}", e)))?
        };
        Self::validate(raw, base)
    }

    fn validate(mut raw: RawConfig, base: &Path) -> DeployResult<Self> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| raw.value(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DeployError::config(format!(
                "Missing config keys: {}",
                missing.join(", ")
            )));
        }

        let auth = if let Some(key_path) = non_empty(&raw.key_path) {
            AuthMethod::KeyFile {
                path: expand_home(key_path),
                passphrase: non_empty(&raw.key_passphrase)
                    .map(|p| SecretString::from(p.to_string())),
            }
        } else if let Some(password) = raw.password.as_deref().filter(|p| !p.is_empty()) {
            AuthMethod::Password(SecretString::from(password.to_string()))
        } else {
            return Err(DeployError::config(
                "Missing config keys: key_path or password",
            ));
        };

        let patcher_command = match raw.patcher_command.take() {
            Some(cmd) if cmd.first().map_or(false, |p| !p.trim().is_empty()) => cmd,
            Some(_) => {
                return Err(DeployError::config(
                    "patcher_command must start with a program name",
                ))
            }
            None => DEFAULT_PATCHER_COMMAND.iter().map(|s| s.to_string()).collect(),
        };

        let required = |key: &str| raw.value(key).unwrap_or_default().to_string();
        let local = |key: &str| resolve(base, raw.value(key).unwrap_or_default());

        Ok(Self {
            server: ServerConfig {
                host: required("host"),
                port: raw.port.unwrap_or(DEFAULT_SSH_PORT),
                username: required("username"),
                auth,
                connect_timeout: Duration::from_secs(
                    raw.connect_timeout_secs
                        .filter(|secs| *secs > 0)
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                ),
            },
            remote_root: required("remote_root"),
            channel: required("channel"),
            app_id: required("app_id"),
            build_outputs_dir: local("build_outputs_dir"),
            manifests_dir: local("manifests_dir"),
            channels_dir: local("channels_dir"),
            patcher_dir: local("patcher_dir"),
            patcher_command,
            default_build_id: non_empty(&raw.default_build_id)
                .unwrap_or(DEFAULT_BUILD_ID)
                .to_string(),
            log_file: non_empty(&raw.log_file).map(|p| resolve(base, p)),
        })
    }

    /// `{build_outputs_dir}/{version}`
    pub fn build_output_dir(&self, version: &str) -> PathBuf {
        self.build_outputs_dir.join(version)
    }

    /// The three local trees a deploy of `version` mirrors, in upload order.
    pub fn local_roots(&self, version: &str) -> [PathBuf; 3] {
        [
            self.manifests_dir.clone(),
            self.channels_dir.clone(),
            self.build_output_dir(version),
        ]
    }
}

/// `config.json` next to the running executable, falling back to the
/// working directory.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = expand_home(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const FULL: &str = r#"{
        "host": "deploy.example.org",
        "username": "release",
        "password": "hunter2",
        "remote_root": "/srv/app",
        "channel": "stable",
        "app_id": "launcher",
        "build_outputs_dir": "builds",
        "manifests_dir": "/data/manifests",
        "channels_dir": "channels",
        "patcher_dir": "tools/patcher"
    }"#;

    #[test]
    fn test_parse_full_json() {
        let config = DeployerConfig::parse(FULL, false, Path::new("/work")).unwrap();
        assert_eq!(config.server.host, "deploy.example.org");
        assert_eq!(config.server.port, 22);
        assert_eq!(config.server.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.remote_root, "/srv/app");
        assert_eq!(config.build_outputs_dir, Path::new("/work/builds"));
        assert_eq!(config.manifests_dir, Path::new("/data/manifests"));
        assert_eq!(config.default_build_id, "build000");
        assert_eq!(config.patcher_command, vec!["cargo", "run", "--release", "--"]);
        match &config.server.auth {
            AuthMethod::Password(p) => assert_eq!(p.expose_secret(), "hunter2"),
            other => panic!("unexpected auth {:?}", other),
        }
    }

    #[test]
    fn test_missing_keys_are_all_reported() {
        let err = DeployerConfig::parse(r#"{"host": "h", "channel": ""}"#, false, Path::new("/"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(err.is_config());
        assert!(msg.starts_with("Missing config keys: "));
        for key in ["username", "remote_root", "channel", "patcher_dir"] {
            assert!(msg.contains(key), "{} not reported in {}", key, msg);
        }
        assert!(!msg.contains("host,"));
    }

    #[test]
    fn test_whitespace_value_counts_as_missing() {
        let doc = FULL.replace("\"stable\"", "\"   \"");
        let err = DeployerConfig::parse(&doc, false, Path::new("/")).unwrap_err();
        assert_eq!(err.to_string(), "Missing config keys: channel");
    }

    #[test]
    fn test_requires_a_credential() {
        let doc = FULL.replace("\"password\": \"hunter2\",", "");
        let err = DeployerConfig::parse(&doc, false, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("key_path or password"));
    }

    #[test]
    fn test_key_file_preferred_over_password() {
        let doc = FULL.replace(
            "\"password\": \"hunter2\",",
            "\"password\": \"hunter2\", \"key_path\": \"/keys/id_rsa\",",
        );
        let config = DeployerConfig::parse(&doc, false, Path::new("/")).unwrap();
        match config.server.auth {
            AuthMethod::KeyFile { path, passphrase } => {
                assert_eq!(path, Path::new("/keys/id_rsa"));
                assert!(passphrase.is_none());
            }
            other => panic!("unexpected auth {:?}", other),
        }
    }

    #[test]
    fn test_parse_toml_with_optional_keys() {
        let doc = r#"
            host = "10.0.0.5"
            port = 2222
            username = "ops"
            key_path = "/home/ops/.ssh/id_ed25519"
            remote_root = "/var/www/updates/"
            channel = "beta"
            app_id = "game"
            build_outputs_dir = "/b"
            manifests_dir = "/m"
            channels_dir = "/c"
            patcher_dir = "/p"
            default_build_id = "nightly"
            connect_timeout_secs = 3
            patcher_command = ["./patcher"]
        "#;
        let config = DeployerConfig::parse(doc, true, Path::new("/")).unwrap();
        assert_eq!(config.server.port, 2222);
        assert_eq!(config.server.target(), "ops@10.0.0.5:2222");
        assert_eq!(config.server.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.default_build_id, "nightly");
        assert_eq!(config.patcher_command, vec!["./patcher"]);
        assert_eq!(config.build_output_dir("1.4.0"), Path::new("/b/1.4.0"));
        assert_eq!(
            config.local_roots("1.4.0"),
            [
                PathBuf::from("/m"),
                PathBuf::from("/c"),
                PathBuf::from("/b/1.4.0")
            ]
        );
    }

    #[test]
    fn test_empty_patcher_command_rejected() {
        let doc = FULL.replace("\"host\"", "\"patcher_command\": [], \"host\"");
        assert!(DeployerConfig::parse(&doc, false, Path::new("/")).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = DeployerConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployer.json");
        fs::write(&path, FULL).unwrap();
        let config = DeployerConfig::load(&path).unwrap();
        assert_eq!(config.app_id, "launcher");
    }

    #[test]
    fn test_secrets_not_in_debug_output() {
        let config = DeployerConfig::parse(FULL, false, Path::new("/")).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
