//! TCP transport endpoints.
//!
//! Produces connected [`TcpStream`]s for [`SpekeSession`](crate::SpekeSession).
//! The session itself is transport-agnostic; these endpoints only handle
//! connection establishment.

use crate::{Error, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// TCP transport endpoint (client or server).
///
/// # Example
///
/// ```no_run
/// use speke_transport::tcp::TcpEndpoint;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Server
/// let server = TcpEndpoint::server("127.0.0.1:4433").await?;
/// let stream = server.accept().await?;
///
/// // Client
/// let client = TcpEndpoint::client();
/// let stream = client.connect("127.0.0.1:4433").await?;
/// # Ok(())
/// # }
/// ```
pub struct TcpEndpoint {
    listener: Option<TcpListener>,
    mode: EndpointMode,
}

/// Endpoint mode (client or server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointMode {
    Client,
    Server,
}

impl TcpEndpoint {
    /// Create a client endpoint.
    ///
    /// Client endpoints initiate connections with [`TcpEndpoint::connect`].
    pub fn client() -> Self {
        Self {
            listener: None,
            mode: EndpointMode::Client,
        }
    }

    /// Create a server endpoint bound to `addr` (e.g. `"0.0.0.0:4433"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse or binding fails.
    pub async fn server(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::ConnectionFailed(format!("invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("server bind failed: {}", e)))?;

        Ok(Self {
            listener: Some(listener),
            mode: EndpointMode::Server,
        })
    }

    /// Get the local address this endpoint is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error on a client endpoint, which has no listener.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .as_ref()
            .ok_or_else(|| Error::ConnectionFailed("client has no local address".into()))?
            .local_addr()
            .map_err(|e| Error::ConnectionFailed(format!("no local address: {}", e)))
    }

    /// Connect to a remote server (client only).
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a client endpoint or the
    /// connection fails.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        if self.mode != EndpointMode::Client {
            return Err(Error::ConnectionFailed("only a client can connect".into()));
        }

        TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("connect failed: {}", e)))
    }

    /// Accept an incoming connection (server only).
    ///
    /// # Errors
    ///
    /// Returns an error if this is not a server endpoint or acceptance
    /// fails.
    pub async fn accept(&self) -> Result<TcpStream> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_cannot_accept() {
        let client = TcpEndpoint::client();
        assert!(client.accept().await.is_err());
        assert!(client.local_addr().is_err());
    }

    #[tokio::test]
    async fn test_server_cannot_connect() {
        let server = TcpEndpoint::server("127.0.0.1:0").await.unwrap();
        assert!(server.connect("127.0.0.1:1").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let server = TcpEndpoint::server("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let client = TcpEndpoint::client();
        let addr_string = addr.to_string();
        let (client_stream, server_stream) =
            tokio::join!(client.connect(&addr_string), server.accept());

        assert!(client_stream.is_ok());
        assert!(server_stream.is_ok());
    }
}
