use std::fmt;
use std::net::TcpStream;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

/// Where a microcontroller bridge can be reached.
///
/// Accepted forms:
/// - `tcp://host:port` (or a bare `host:port`)
/// - `unix:/path/to/socket` (or `unix:///path/to/socket`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidEndpoint(input.to_string()));
        }

        if let Some(rest) = input.strip_prefix("unix:") {
            #[cfg(unix)]
            {
                let path = rest.strip_prefix("//").unwrap_or(rest);
                if path.is_empty() {
                    return Err(TransportError::InvalidEndpoint(input.to_string()));
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = rest;
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
        }

        let addr = input.strip_prefix("tcp://").unwrap_or(input);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(addr.to_string()))
            }
            _ => Err(TransportError::InvalidEndpoint(input.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Open a blocking link to `endpoint`.
pub fn connect(endpoint: &Endpoint) -> Result<ByteStream> {
    let stream = match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).map_err(|source| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            ByteStream::from_tcp(stream)?
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path).map_err(|source| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            ByteStream::from_unix(stream)
        }
    };
    debug!(%endpoint, kind = stream.kind(), "link connected");
    Ok(stream)
}
