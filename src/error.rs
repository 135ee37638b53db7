//! Error types for the label printing service
//!
//! This module provides precise error types for the different failure
//! domains:
//!
//! - [`DeviceError`]: transport-level failures (open, read, write)
//! - [`RasterError`]: malformed PWG raster streams
//! - [`JobError`]: failures while processing a print job

use thiserror::Error;

/// Transport-level errors
///
/// Returned by [`Device`](crate::device::Device) operations.  Opening a
/// device distinguishes *unavailable* (the printer is off, unplugged, or
/// unreachable — the runtime retries these) from mid-stream I/O failures
/// (which abort the current job).
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device URI is not one of the supported schemes or is malformed
    #[error("Unsupported or malformed device URI '{0}'")]
    BadUri(String),

    /// The device could not be opened or connected
    ///
    /// This is the retryable failure: the per-printer worker keeps the
    /// job queued and retries the open every few seconds.
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Read or write failed mid-stream
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write all data to the device
    #[error("Incomplete write ({written} of {expected} bytes)")]
    IncompleteWrite {
        /// Bytes actually written
        written: usize,
        /// Bytes that should have been written
        expected: usize,
    },

    /// USB communication error from the rusb library
    #[cfg(feature = "usb")]
    #[error(transparent)]
    Usb(#[from] rusb::Error),
}

impl DeviceError {
    /// Whether the printer-worker retry loop should keep trying
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DeviceError::Unavailable(_) | DeviceError::BadUri(_))
    }
}

/// PWG raster stream errors
#[derive(Error, Debug)]
pub enum RasterError {
    /// I/O error on the underlying stream
    #[error("Raster stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not begin with a known sync word
    #[error("Not a PWG raster stream (sync word {0:#010x})")]
    BadSync(u32),

    /// A page header carried values we cannot print
    #[error("Malformed page header: {0}")]
    BadHeader(String),

    /// The compressed line data is inconsistent
    #[error("Corrupt raster data: {0}")]
    BadData(String),
}

/// Job processing errors
///
/// The pipeline returns one of these; the printer worker maps it onto
/// the job's terminal state (`canceled` for [`JobError::Canceled`],
/// `aborted` for everything else).
#[derive(Error, Debug)]
pub enum JobError {
    /// No codec accepts the document format
    #[error("Unable to process job with format '{0}'")]
    UnsupportedFormat(String),

    /// The document could not be decoded
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// The input raster stream was invalid
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// Device I/O failed while printing
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// PNG decode error from the image crate
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A line or compression buffer would exceed sane limits
    #[error("Resource limit exceeded: {0}")]
    ResourceExhausted(String),

    /// The job was canceled cooperatively
    ///
    /// Not an error in the logging sense; the job finalizes as
    /// `canceled` and no diagnostics are emitted.
    #[error("Job canceled")]
    Canceled,
}

impl JobError {
    /// I/O errors on the spool file map to an aborted job
    pub(crate) fn spool(err: std::io::Error) -> Self {
        JobError::MalformedDocument(format!("spool file: {err}"))
    }
}

/// System registry errors
#[derive(Error, Debug)]
pub enum SystemError {
    /// The driver keyword is not in the registry
    #[error("Unknown driver '{0}'")]
    UnknownDriver(String),

    /// No printer with the given id
    #[error("No such printer {0}")]
    UnknownPrinter(u32),

    /// No such job
    #[error("No such job {0}")]
    UnknownJob(u32),

    /// New work is rejected during shutdown
    #[error("System is shutting down")]
    ShuttingDown,

    /// Device URI problems surface at printer creation
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Spool directory or file I/O failed
    #[error("Spool I/O error: {0}")]
    Io(#[from] std::io::Error),
}
