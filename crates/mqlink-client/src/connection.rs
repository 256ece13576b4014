//! Byte-stream transport seam.
//!
//! The session owns a connection's lifecycle (open, clone for the reader,
//! shutdown) but not its implementation. TCP is provided; anything else
//! (TLS, unix sockets, in-memory pipes) plugs in through [`Connector`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;

use crate::error::SessionError;

/// A bidirectional byte stream with explicit shutdown.
pub trait Connection: Read + Write + Send {
    /// Independent handle to the same underlying stream.
    fn try_clone(&self) -> io::Result<Box<dyn Connection>>;

    /// Abruptly close both directions. Blocked reads on any clone return.
    fn shutdown(&self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn try_clone(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Connection for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Box<dyn Connection>> {
        Ok(Box::new(std::os::unix::net::UnixStream::try_clone(self)?))
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Opens connections to a broker.
pub trait Connector: Send + Sync {
    /// Resolve `host` and connect.
    ///
    /// Must report address-resolution failures as
    /// [`SessionError::HostNotFound`] and every other transport failure as
    /// [`SessionError::ConnectFailed`].
    fn open(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, SessionError>;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, SessionError> {
        let not_found = || SessionError::HostNotFound {
            host: host.to_string(),
        };
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                debug!("Resolving {} failed: {}", host, e);
                not_found()
            })?
            .collect();
        if addrs.is_empty() {
            return Err(not_found());
        }
        Ok(addrs)
    }
}

impl Connector for TcpConnector {
    fn open(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, SessionError> {
        let mut last_err = None;

        for addr in Self::resolve(host, port)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(SessionError::ConnectFailed)?;
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(SessionError::ConnectFailed(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no address to connect to")
        })))
    }
}
