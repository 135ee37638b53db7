//! Character-device transport
//!
//! Used for kernel printer devices such as `/dev/usb/lp0`.  Reads poll
//! the descriptor first so a wedged or absent printer cannot hang a
//! status query forever.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::path::Path;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::debug;

use crate::error::DeviceError;

use super::Transport;

/// How long a read waits for the printer to produce data.
const READ_POLL_MS: u16 = 250;

pub(super) struct FileTransport {
    handle: File,
}

impl FileTransport {
    pub(super) fn open(path: &Path) -> Result<FileTransport, DeviceError> {
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DeviceError::Unavailable(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), "opened character device");
        Ok(FileTransport { handle })
    }
}

impl Transport for FileTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut pollfds = [PollFd::new(self.handle.as_fd(), PollFlags::POLLIN)];
        let nready = poll(&mut pollfds, PollTimeout::from(READ_POLL_MS)).unwrap_or(0);
        if nready == 0 {
            return Ok(0);
        }

        loop {
            match self.handle.read(buf) {
                Ok(n) => return Ok(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        // Write::write_all already loops over short writes and retries
        // interrupted ones.
        self.handle.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.handle.flush()?;
        Ok(())
    }
}
