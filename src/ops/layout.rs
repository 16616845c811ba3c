use crate::ops::mirror::remote_join;

/// Fixed remote directory layout under the configured root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    root: String,
}

impl RemoteLayout {
    pub fn new(remote_root: &str) -> Self {
        let trimmed = remote_root.trim_end_matches('/');
        let root = if trimmed.is_empty() && remote_root.starts_with('/') {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn manifests(&self) -> String {
        remote_join(&self.root, "manifests")
    }

    pub fn channels(&self) -> String {
        remote_join(&self.root, "channels")
    }

    pub fn files(&self, version: &str) -> String {
        remote_join(&remote_join(&self.root, "files"), version)
    }

    /// The three roots in upload order, paired with the local trees from
    /// `DeployerConfig::local_roots`.
    pub fn roots(&self, version: &str) -> [String; 3] {
        [self.manifests(), self.channels(), self.files(version)]
    }
}
