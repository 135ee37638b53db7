//! Raw TCP transport (JetDirect and friends)

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::DeviceError;

use super::Transport;

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(super) struct SocketTransport {
    stream: TcpStream,
}

impl SocketTransport {
    pub(super) fn connect(host: &str, port: u16) -> Result<SocketTransport, DeviceError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| DeviceError::Unavailable(format!("{host}:{port}: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(%addr, "connected to socket device");
                    return Ok(SocketTransport { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(DeviceError::Unavailable(match last_err {
            Some(e) => format!("{host}:{port}: {e}"),
            None => format!("{host}:{port}: no addresses"),
        }))
    }
}

impl Transport for SocketTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.stream.flush()?;
        Ok(())
    }
}
