use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A blocking duplex byte stream that frames can be carried over.
///
/// The multiplexer clones the link once for its background reader and keeps
/// the original for writing. [`Link::close`] must cause a read blocked on any
/// clone to return (EOF or error) so the reader thread can be torn down.
pub trait Link: Read + Write + Send + Sized + 'static {
    /// Create a second handle to the same underlying stream.
    fn try_clone_link(&self) -> Result<Self>;

    /// Shut the stream down in both directions.
    ///
    /// Closing an already-closed link is not an error.
    fn close(&self) -> Result<()>;

    /// Set the read timeout, where the stream supports one.
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    /// Set the write timeout, where the stream supports one.
    fn set_write_timeout(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

fn ignore_not_connected(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
        other => other.map_err(Into::into),
    }
}

impl Link for TcpStream {
    fn try_clone_link(&self) -> Result<Self> {
        Ok(self.try_clone()?)
    }

    fn close(&self) -> Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(TcpStream::set_read_timeout(self, timeout)?)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(TcpStream::set_write_timeout(self, timeout)?)
    }
}

#[cfg(unix)]
impl Link for std::os::unix::net::UnixStream {
    fn try_clone_link(&self) -> Result<Self> {
        Ok(self.try_clone()?)
    }

    fn close(&self) -> Result<()> {
        ignore_not_connected(self.shutdown(Shutdown::Both))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(std::os::unix::net::UnixStream::set_read_timeout(
            self, timeout,
        )?)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(std::os::unix::net::UnixStream::set_write_timeout(
            self, timeout,
        )?)
    }
}

/// A connected link returned by [`crate::connect`].
pub struct ByteStream {
    inner: ByteStreamInner,
}

enum ByteStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl ByteStream {
    /// Wrap a connected TCP stream. Nagle is disabled: frames are tiny and
    /// register reads are latency bound.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            inner: ByteStreamInner::Tcp(stream),
        })
    }

    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: ByteStreamInner::Unix(stream),
        }
    }

    /// Link kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            ByteStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            ByteStreamInner::Unix(_) => "unix",
        }
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ByteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ByteStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl Link for ByteStream {
    fn try_clone_link(&self) -> Result<Self> {
        let inner = match &self.inner {
            ByteStreamInner::Tcp(stream) => ByteStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => ByteStreamInner::Unix(stream.try_clone()?),
        };
        Ok(Self { inner })
    }

    fn close(&self) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => stream.close(),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.close(),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => Link::set_read_timeout(stream, timeout),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => Link::set_read_timeout(stream, timeout),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Tcp(stream) => Link::set_write_timeout(stream, timeout),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => Link::set_write_timeout(stream, timeout),
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("kind", &self.kind())
            .finish()
    }
}
