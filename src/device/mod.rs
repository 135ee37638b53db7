//! Device connections
//!
//! A printer is reached through a device URI whose scheme selects the
//! transport:
//!
//! - `file:///dev/usb/lp0` — a character device opened read/write
//! - `socket://192.168.0.5:9100` — a raw TCP connection (JetDirect)
//! - `usb://Make/Model?serial=SN` — a USB printer-class device
//!
//! All transports expose the same byte-stream interface through the
//! [`Transport`] trait; [`Device`] is the handle the rest of the service
//! works with.  The runtime guarantees at most one live handle per
//! printer.

mod file;
mod socket;
pub mod usb;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

use crate::error::DeviceError;

/// A parsed device URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceUri {
    /// Character device file
    File {
        /// Filesystem path of the device node
        path: PathBuf,
    },
    /// Raw TCP socket
    Socket {
        /// Host name or address
        host: String,
        /// TCP port
        port: u16,
    },
    /// USB printer-class device
    Usb {
        /// Manufacturer from the IEEE 1284 device ID
        make: String,
        /// Model from the IEEE 1284 device ID
        model: String,
        /// Serial number, when one is known
        serial: Option<String>,
    },
}

impl FromStr for DeviceUri {
    type Err = DeviceError;

    fn from_str(uri: &str) -> Result<DeviceUri, DeviceError> {
        let bad = || DeviceError::BadUri(uri.to_string());

        if let Some(path) = uri.strip_prefix("file://") {
            // file:///dev/xxx keeps the leading slash after the
            // authority component.
            if path.is_empty() {
                return Err(bad());
            }
            return Ok(DeviceUri::File {
                path: PathBuf::from(percent_decode(path)),
            });
        }

        if let Some(rest) = uri.strip_prefix("socket://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(bad)?;
            let port: u16 = port.parse().map_err(|_| bad())?;
            if host.is_empty() {
                return Err(bad());
            }
            return Ok(DeviceUri::Socket {
                host: host.to_string(),
                port,
            });
        }

        if let Some(rest) = uri.strip_prefix("usb://") {
            let (make, rest) = rest.split_once('/').ok_or_else(bad)?;
            let (model, serial) = match rest.split_once('?') {
                Some((model, query)) => {
                    let serial = query
                        .split('&')
                        .find_map(|kv| kv.strip_prefix("serial="))
                        .map(percent_decode);
                    (model, serial)
                }
                None => (rest, None),
            };
            if make.is_empty() || model.is_empty() {
                return Err(bad());
            }
            return Ok(DeviceUri::Usb {
                make: percent_decode(make),
                model: percent_decode(model),
                serial,
            });
        }

        Err(bad())
    }
}

impl fmt::Display for DeviceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceUri::File { path } => write!(f, "file://{}", path.display()),
            DeviceUri::Socket { host, port } => write!(f, "socket://{host}:{port}"),
            DeviceUri::Usb {
                make,
                model,
                serial,
            } => {
                write!(f, "usb://{}/{}", percent_encode(make), percent_encode(model))?;
                if let Some(serial) = serial {
                    write!(f, "?serial={}", percent_encode(serial))?;
                }
                Ok(())
            }
        }
    }
}

/// Percent-encode the characters that may not appear raw in a URI
/// component
pub(crate) fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
    out
}

pub(crate) fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A byte-stream transport to a printer
///
/// Implementations retry interrupted reads/writes and loop short writes
/// until all bytes are drained.
pub trait Transport: Send {
    /// Read available bytes; may return `Ok(0)` when no data is ready
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Push any buffered bytes to the wire
    fn flush(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// An open connection to a printer
pub struct Device {
    uri: String,
    transport: Box<dyn Transport>,
}

impl Device {
    /// Open a connection for the given device URI
    ///
    /// Failures are reported as [`DeviceError::Unavailable`]; the caller
    /// decides whether to retry.
    pub fn open(uri: &DeviceUri) -> Result<Device, DeviceError> {
        debug!(uri = %uri, "opening device");
        let transport: Box<dyn Transport> = match uri {
            DeviceUri::File { path } => Box::new(file::FileTransport::open(path)?),
            DeviceUri::Socket { host, port } => {
                Box::new(socket::SocketTransport::connect(host, *port)?)
            }
            DeviceUri::Usb { .. } => usb::open(uri)?,
        };

        Ok(Device {
            uri: uri.to_string(),
            transport,
        })
    }

    /// Wrap an externally created transport (tests, custom factories)
    pub fn from_transport(uri: String, transport: Box<dyn Transport>) -> Device {
        Device { uri, transport }
    }

    /// The URI this device was opened from
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Read available bytes from the device
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        self.transport.read(buf)
    }

    /// Write all bytes to the device
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.transport.write_all(data)
    }

    /// Write a string to the device
    pub fn puts(&mut self, s: &str) -> Result<(), DeviceError> {
        self.transport.write_all(s.as_bytes())
    }

    /// Write formatted text to the device
    ///
    /// Call as `device.printf(format_args!("D{density}\n"))`.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<(), DeviceError> {
        self.transport.write_all(fmt::format(args).as_bytes())
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<(), DeviceError> {
        self.transport.flush()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("uri", &self.uri).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for codec and runtime tests

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::{Device, Transport};
    use crate::error::DeviceError;

    /// Captures writes and serves canned read replies
    pub struct MemoryTransport {
        written: Arc<Mutex<Vec<u8>>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl MemoryTransport {
        pub fn device() -> (Device, Arc<Mutex<Vec<u8>>>) {
            Self::device_with_replies(Vec::new())
        }

        pub fn device_with_replies(replies: Vec<Vec<u8>>) -> (Device, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let transport = MemoryTransport {
                written: Arc::clone(&written),
                replies: replies.into(),
            };
            (
                Device::from_transport("test://memory".into(), Box::new(transport)),
                written,
            )
        }
    }

    impl Transport for MemoryTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
            match self.replies.pop_front() {
                Some(reply) => {
                    let n = reply.len().min(buf.len());
                    buf[..n].copy_from_slice(&reply[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), DeviceError> {
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_uris() {
        let uri: DeviceUri = "file:///dev/usb/lp0".parse().unwrap();
        assert_eq!(
            uri,
            DeviceUri::File {
                path: PathBuf::from("/dev/usb/lp0")
            }
        );
        assert_eq!(uri.to_string(), "file:///dev/usb/lp0");
    }

    #[test]
    fn parses_socket_uris() {
        let uri: DeviceUri = "socket://printer.local:9100".parse().unwrap();
        assert_eq!(
            uri,
            DeviceUri::Socket {
                host: "printer.local".into(),
                port: 9100
            }
        );
    }

    #[test]
    fn parses_usb_uris() {
        let uri: DeviceUri = "usb://Zebra%20Technologies/ZTC%20ZD420?serial=99J1234".parse().unwrap();
        assert_eq!(
            uri,
            DeviceUri::Usb {
                make: "Zebra Technologies".into(),
                model: "ZTC ZD420".into(),
                serial: Some("99J1234".into()),
            }
        );
        assert_eq!(
            uri.to_string(),
            "usb://Zebra%20Technologies/ZTC%20ZD420?serial=99J1234"
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!("ipp://host/printer".parse::<DeviceUri>().is_err());
        assert!("socket://nohost".parse::<DeviceUri>().is_err());
        assert!("usb://makeonly".parse::<DeviceUri>().is_err());
    }

    #[test]
    fn percent_round_trip() {
        assert_eq!(percent_encode("POS58 Printer"), "POS58%20Printer");
        assert_eq!(percent_decode("POS58%20Printer"), "POS58 Printer");
        assert_eq!(percent_decode("plain"), "plain");
    }
}
