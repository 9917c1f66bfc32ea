//! Unix-domain stream transport endpoints.
//!
//! The local-socket counterpart of [`tcp`](crate::tcp), for sessions
//! between processes on one host.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};

/// Unix-domain stream endpoint (client or server).
pub struct LocalEndpoint {
    listener: Option<UnixListener>,
    mode: EndpointMode,
}

/// Endpoint mode (client or server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointMode {
    Client,
    Server,
}

impl LocalEndpoint {
    /// Create a client endpoint.
    pub fn client() -> Self {
        Self {
            listener: None,
            mode: EndpointMode::Client,
        }
    }

    /// Create a server endpoint listening on the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the socket fails, e.g. because the
    /// path already exists.
    pub fn server(path: impl AsRef<Path>) -> Result<Self> {
        let listener = UnixListener::bind(path.as_ref())
            .map_err(|e| Error::ConnectionFailed(format!("server bind failed: {}", e)))?;

        Ok(Self {
            listener: Some(listener),
            mode: EndpointMode::Server,
        })
    }

    /// Get the path this endpoint is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error on a client endpoint, which has no listener.
    pub fn local_path(&self) -> Result<PathBuf> {
        let addr = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::ConnectionFailed("client has no local path".into()))?
            .local_addr()
            .map_err(|e| Error::ConnectionFailed(format!("no local address: {}", e)))?;

        addr.as_pathname()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::ConnectionFailed("socket is unnamed".into()))
    }

    /// Connect to the socket at `path` (client only).
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a client endpoint or the
    /// connection fails.
    pub async fn connect(&self, path: impl AsRef<Path>) -> Result<UnixStream> {
        if self.mode != EndpointMode::Client {
            return Err(Error::ConnectionFailed("only a client can connect".into()));
        }

        UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| Error::ConnectionFailed(format!("connect failed: {}", e)))
    }

    /// Accept an incoming connection (server only).
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a server endpoint or acceptance
    /// fails.
    pub async fn accept(&self) -> Result<UnixStream> {
        if self.mode != EndpointMode::Server {
            return Err(Error::ConnectionFailed("only a server can accept".into()));
        }

        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::ConnectionFailed("no listener".into()))?;

        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("accept failed: {}", e)))?;

        Ok(stream)
    }
}
