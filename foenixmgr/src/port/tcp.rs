//! TCP transport for reaching a debug port through a serial bridge.

use {
    crate::{
        error::{Error, Result},
        port::Transport,
    },
    log::debug,
    std::{
        io::{Read, Write},
        net::{Shutdown, TcpStream, ToSocketAddrs},
        time::Duration,
    },
};

/// Blocking TCP connection to a [`Bridge`](crate::bridge::Bridge).
///
/// A single `recv` can return any prefix of the bytes in flight; exact-size
/// reads go through [`Transport::read_bytes`], which accumulates fragments.
pub struct TcpPort {
    stream: Option<TcpStream>,
    name: String,
}

impl TcpPort {
    /// Connect to `host:port`, applying `timeout` to the connect attempt and
    /// to every subsequent read and write. A zero `timeout` waits forever.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let name = format!("{host}:{port}");
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve {name}: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, timeout)
            };
            match attempt {
                Ok(stream) => {
                    debug!("Connected to remote Foenix at {name}");
                    return Self::from_stream(stream, name, timeout);
                },
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Connection(match last_error {
            Some(e) => format!("cannot connect to {name}: {e}"),
            None => format!("{name} did not resolve to any address"),
        }))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, name: String, timeout: Duration) -> Result<Self> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream: Some(stream),
            name,
        })
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "socket closed")
    }
}

impl Transport for TcpPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.stream
            .is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self
            .stream
            .take()
        {
            // The peer may already be gone; dropping the stream closes it anyway.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.name);
        }
        Ok(())
    }
}

impl Read for TcpPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|s| s.read(buf))
    }
}

impl Write for TcpPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|s| s.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(std::io::Write::flush)
    }
}
