use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Fixed, process-wide endpoint name.
pub const ENDPOINT_NAME: &str = "2safe.sock";

/// Backing path of the endpoint: `<temp dir>/2safe.sock`.
pub fn default_endpoint_path() -> PathBuf {
    std::env::temp_dir().join(ENDPOINT_NAME)
}

/// What currently occupies an endpoint path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Nothing exists at the path.
    Absent,
    /// A socket file exists and a listener accepts connections on it.
    Live,
    /// A socket file exists but nobody is listening (left by a crashed process).
    Stale,
    /// Something other than a socket exists at the path.
    NotSocket,
}

impl EndpointState {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointState::Absent => "absent",
            EndpointState::Live => "live",
            EndpointState::Stale => "stale",
            EndpointState::NotSocket => "not-a-socket",
        }
    }
}

/// Inspect the endpoint path without modifying it.
///
/// A socket file is classified by attempting a connection: a refused
/// connection means stale, an accepted one means live. A live listener sees
/// the probe as an empty connection.
pub fn probe(path: impl AsRef<Path>) -> Result<EndpointState> {
    let path = path.as_ref();
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(EndpointState::Absent),
        Err(err) => {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source: err,
            })
        }
    };

    if !metadata.file_type().is_socket() {
        return Ok(EndpointState::NotSocket);
    }

    match UnixStream::connect(path) {
        Ok(_) => Ok(EndpointState::Live),
        Err(err) if err.kind() == ErrorKind::ConnectionRefused => Ok(EndpointState::Stale),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(EndpointState::Absent),
        Err(err) => Err(TransportError::Connect {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

/// The listening endpoint of the command server.
///
/// Owns the socket file for its lifetime. The file is removed by
/// [`Endpoint::close`] or on drop, as long as the path still refers to the
/// socket this instance created.
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    recovered_stale: bool,
    /// Cleared once the socket file has been handled, so drop is a no-op.
    cleanup_on_drop: bool,
}

impl Endpoint {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind the endpoint, failing if anything occupies the path.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = checked_path(path.as_ref())?;
        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;
        Self::from_listener(listener, path, false)
    }

    /// Bind the endpoint, recovering from a stale socket file.
    ///
    /// Two steps, never a loop: the first bind attempt is made as-is. If it
    /// fails, the path is probed. A stale socket is removed and bind is
    /// retried exactly once. A live listener, a non-socket file, or a failure
    /// with nothing at the path are all reported as errors.
    pub fn bind_recovering(path: impl AsRef<Path>) -> Result<Self> {
        let path = checked_path(path.as_ref())?;

        let first_err = match UnixListener::bind(&path) {
            Ok(listener) => return Self::from_listener(listener, path, false),
            Err(err) => err,
        };

        match probe(&path)? {
            EndpointState::Absent => Err(TransportError::Bind {
                path,
                source: first_err,
            }),
            EndpointState::Live => Err(TransportError::InUse { path }),
            EndpointState::NotSocket => Err(TransportError::NotSocket { path }),
            EndpointState::Stale => {
                warn!(?path, "removing stale socket file");
                std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
                let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
                Self::from_listener(listener, path, true)
            }
        }
    }

    fn from_listener(listener: UnixListener, path: PathBuf, recovered_stale: bool) -> Result<Self> {
        // Record the inode first so a failure below still removes the file on drop.
        let mut endpoint = Self {
            listener,
            path,
            created_inode: None,
            recovered_stale,
            cleanup_on_drop: true,
        };

        let created_metadata =
            std::fs::symlink_metadata(&endpoint.path).map_err(|e| TransportError::Bind {
                path: endpoint.path.clone(),
                source: e,
            })?;
        endpoint.created_inode = Some((created_metadata.dev(), created_metadata.ino()));

        std::fs::set_permissions(
            &endpoint.path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| TransportError::Bind {
            path: endpoint.path.clone(),
            source: e,
        })?;

        info!(path = ?endpoint.path, recovered_stale, "listening on unix domain socket");
        Ok(endpoint)
    }

    /// Switch the listener between blocking and non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(TransportError::Io)
    }

    /// Accept an incoming connection.
    ///
    /// Returns `Ok(None)` when the listener is non-blocking and no connection
    /// is pending. Accepted streams are always blocking.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false)?;
                debug!("accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening endpoint (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this endpoint is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether binding had to remove a stale socket file first.
    pub fn recovered_stale(&self) -> bool {
        self.recovered_stale
    }

    /// Close the listener and remove its socket file.
    ///
    /// Returns `true` if the socket file was removed.
    pub fn close(mut self) -> bool {
        let removed = self.remove_socket_file();
        info!(path = ?self.path, removed, "endpoint closed");
        removed
    }

    fn remove_socket_file(&mut self) -> bool {
        if !self.cleanup_on_drop {
            return false;
        }
        self.cleanup_on_drop = false;

        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return false;
        };
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino =>
            {
                debug!(path = ?self.path, "removing socket file");
                std::fs::remove_file(&self.path).is_ok()
            }
            Ok(_) => {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
                false
            }
            Err(_) => false,
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.remove_socket_file();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("recovered_stale", &self.recovered_stale)
            .finish()
    }
}

fn checked_path(path: &Path) -> Result<PathBuf> {
    let len = path.as_os_str().len();
    if len >= Endpoint::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: Endpoint::MAX_PATH_LEN,
        });
    }
    Ok(path.to_path_buf())
}
