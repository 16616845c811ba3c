use crate::config::{AuthMethod, ServerConfig};
use crate::console;
use crate::error::{DeployError, DeployResult};
use secrecy::ExposeSecret;
use ssh2::{ErrorCode, FileStat, HashType, Session, Sftp};
use std::fs::File;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// libssh2 SFTP status code for "no such file".
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Upper bound for a single blocking SFTP operation once connected.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// The primitives the mirror needs from the remote side.
pub trait RemoteFs {
    /// Create `remote_path` and any missing ancestors. Succeeds when the
    /// directory already exists.
    fn ensure_dir(&mut self, remote_path: &str) -> DeployResult<()>;

    /// Whether anything exists at `remote_path`.
    fn exists(&mut self, remote_path: &str) -> DeployResult<bool>;

    /// Copy a local file to `remote_path`, replacing any existing file.
    /// Returns the number of bytes written.
    fn upload(&mut self, local: &Path, remote_path: &str) -> DeployResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Missing,
    Directory,
    Other,
}

/// What `ensure_dirs` needs: look at one path, create one directory.
trait DirOps {
    fn lookup(&self, path: &str) -> DeployResult<Entry>;
    fn mkdir(&self, path: &str) -> Result<(), String>;
}

impl DirOps for Sftp {
    fn lookup(&self, path: &str) -> DeployResult<Entry> {
        entry_from_stat(path, self.stat(Path::new(path)))
    }

    fn mkdir(&self, path: &str) -> Result<(), String> {
        Sftp::mkdir(self, Path::new(path), 0o755).map_err(|e| e.to_string())
    }
}

fn entry_from_stat(path: &str, stat: Result<FileStat, ssh2::Error>) -> DeployResult<Entry> {
    match stat {
        Ok(stat) if stat.is_dir() => Ok(Entry::Directory),
        Ok(_) => Ok(Entry::Other),
        Err(e) if is_missing(&e) => Ok(Entry::Missing),
        Err(e) => Err(DeployError::transfer(path, e)),
    }
}

fn is_missing(error: &ssh2::Error) -> bool {
    matches!(error.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE))
}

/// Every directory from the top of `path` down to `path` itself, in
/// creation order. Empty components are skipped.
fn dir_prefixes(path: &str) -> Vec<String> {
    let mut current = String::new();
    if path.starts_with('/') {
        current.push('/');
    }

    let mut prefixes = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        prefixes.push(current.clone());
    }
    prefixes
}

fn ensure_dirs<D: DirOps + ?Sized>(ops: &D, remote_path: &str) -> DeployResult<()> {
    for prefix in dir_prefixes(remote_path) {
        match ops.lookup(&prefix)? {
            Entry::Directory => continue,
            Entry::Other => {
                return Err(DeployError::transfer(
                    prefix.as_str(),
                    "exists and is not a directory",
                ))
            }
            Entry::Missing => {}
        }

        if let Err(reason) = ops.mkdir(&prefix) {
            // Another writer may have created it between lookup and mkdir.
            if !matches!(ops.lookup(&prefix), Ok(Entry::Directory)) {
                return Err(DeployError::transfer(prefix.as_str(), reason));
            }
        }
    }
    Ok(())
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// One authenticated SSH connection and its SFTP channel. Both are released
/// together by [`RemoteSession::close`] or on drop.
pub struct RemoteSession {
    session: Session,
    sftp: Option<Sftp>,
    closed: bool,
    host: String,
}

impl RemoteSession {
    /// Connect and authenticate. Unknown host keys are accepted; the key's
    /// fingerprint is logged so it can be checked out of band.
    pub fn connect(server: &ServerConfig) -> DeployResult<Self> {
        let connection_error = |reason: String| DeployError::Connection {
            host: server.host.clone(),
            reason,
        };

        console::info(format!("Connecting to {}", server.target()));
        let tcp = connect_tcp(server).map_err(|e| connection_error(e.to_string()))?;

        let mut session =
            Session::new().map_err(|e| connection_error(format!("session init: {}", e)))?;
        session.set_timeout(timeout_millis(server.connect_timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connection_error(format!("handshake: {}", e)))?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            console::info(format!(
                "Accepted host key for {} (SHA256 {})",
                server.host,
                hex::encode(hash)
            ));
        }

        let mut remote = Self {
            session,
            sftp: None,
            closed: false,
            host: server.host.clone(),
        };
        remote.authenticate(server)?;

        // A dead peer must not stall a watch loop forever.
        remote
            .session
            .set_timeout(timeout_millis(TRANSFER_TIMEOUT.max(server.connect_timeout)));
        let sftp = remote
            .session
            .sftp()
            .map_err(|e| connection_error(format!("SFTP channel: {}", e)))?;
        remote.sftp = Some(sftp);
        Ok(remote)
    }

    fn authenticate(&mut self, server: &ServerConfig) -> DeployResult<()> {
        let auth_error = |reason: String| DeployError::Authentication {
            user: server.username.clone(),
            host: server.host.clone(),
            reason,
        };

        match &server.auth {
            AuthMethod::KeyFile { path, passphrase } => {
                // Surface an unreadable key as such instead of a generic
                // libssh2 failure.
                File::open(path).map_err(|e| {
                    auth_error(format!("cannot read key file {}: {}", path.display(), e))
                })?;
                self.session
                    .userauth_pubkey_file(
                        &server.username,
                        None,
                        path,
                        passphrase.as_ref().map(|p| p.expose_secret()),
                    )
                    .map_err(|e| auth_error(format!("public key rejected: {}", e)))?;
            }
            AuthMethod::Password(password) => {
                self.session
                    .userauth_password(&server.username, password.expose_secret())
                    .map_err(|e| auth_error(format!("password rejected: {}", e)))?;
            }
        }

        if !self.session.authenticated() {
            return Err(auth_error("server did not accept credentials".to_string()));
        }
        Ok(())
    }

    fn sftp(&self, remote_path: &str) -> DeployResult<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| DeployError::transfer(remote_path, "session is closed"))
    }

    /// Release the SFTP channel and the connection. Safe to call more than
    /// once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.sftp.take();
        if let Err(e) = self
            .session
            .disconnect(None, "patch-deployer done", None)
        {
            console::warn(format!("Disconnect from {} failed: {}", self.host, e));
        }
        self.closed = true;
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl RemoteFs for RemoteSession {
    fn ensure_dir(&mut self, remote_path: &str) -> DeployResult<()> {
        ensure_dirs(self.sftp(remote_path)?, remote_path)
    }

    fn exists(&mut self, remote_path: &str) -> DeployResult<bool> {
        let entry = self.sftp(remote_path)?.lookup(remote_path)?;
        Ok(entry != Entry::Missing)
    }

    fn upload(&mut self, local: &Path, remote_path: &str) -> DeployResult<u64> {
        let sftp = self.sftp(remote_path)?;
        console::info(format!("Uploading {} -> {}", local.display(), remote_path));
        let mut source = File::open(local)
            .map_err(|e| DeployError::transfer(local.display().to_string(), e))?;
        let mut target = sftp
            .create(Path::new(remote_path))
            .map_err(|e| DeployError::transfer(remote_path, e))?;
        io::copy(&mut source, &mut target).map_err(|e| DeployError::transfer(remote_path, e))
    }
}

fn connect_tcp(server: &ServerConfig) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (server.host.as_str(), server.port)
        .to_socket_addrs()?
        .collect();

    let mut last_err = io::Error::new(
        io::ErrorKind::NotFound,
        format!("no address found for {}", server.host),
    );
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, server.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}
