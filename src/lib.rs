//! Multi-printer label printing service core
//!
//! Accepts spooled print jobs, converts raster (and vendor-raw)
//! documents into device-specific command streams, and drives thermal
//! label printers over raw TCP sockets, character devices, or USB
//! printer-class devices.
//!
//! # Features
//!
//! - **Vendor codecs** for DYMO LabelWriter, Zebra ZPL and EPL2, TSC
//!   TSPL, Brother QL/PT, Seiko Instruments SLP, CPCL, and Zijiang
//!   ESC/POS printers, each emitting a bit-exact wire stream
//! - **1-bit rendering** via a gamma-corrected 16×16 ordered dither
//!   with run detection, so text and barcodes stay solid while
//!   photographic content halftones cleanly
//! - **PWG raster input** (Apple URF handled the same way), PNG images,
//!   and vendor-raw pass-through
//! - **Per-printer workers** that serialize device access, retry
//!   unavailable printers indefinitely, and surface printer-state
//!   reasons from the vendor status protocols
//!
//! # Quick Start
//!
//! ```no_run
//! use labelpress::{AttrTable, System, SystemConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let system = System::new(SystemConfig::default())?;
//!
//! // Bind a driver to a device...
//! let printer = system.add_printer(
//!     "shipping",
//!     "socket://192.168.7.10:9100",
//!     "zpl_4inch-203dpi-dt",
//!     AttrTable::new(),
//! )?;
//!
//! // ...and queue a spooled document on it.
//! let document = std::fs::read("label.pwg")?;
//! let job = system.submit_job(
//!     printer,
//!     "pallet 7",
//!     "operator",
//!     "image/pwg-raster",
//!     AttrTable::new(),
//!     &document,
//! )?;
//!
//! println!("queued job {job}");
//! # Ok(())
//! # }
//! ```
//!
//! # Device URIs
//!
//! Printers are addressed by persistent device URIs:
//!
//! - `file:///dev/usb/lp0` — kernel character device
//! - `socket://host:9100` — raw TCP (JetDirect)
//! - `usb://Make/Model?serial=SN` — USB printer-class device,
//!   discovered from the IEEE 1284 device ID (requires the `usb`
//!   feature)
//!
//! # Feature Flags
//!
//! - **`usb`** (optional) — USB transport and enumeration via the
//!   `rusb` crate
//! - **`serde`** (optional) — serialization for the public option and
//!   media types
//!
//! The crate has **no default features**; socket and character-device
//! printing work without any features enabled.
//!
//! # Status Monitoring
//!
//! [`System::poll_status`] queries the device with the vendor's status
//! protocol (`~HQES` for ZPL, `ESC i S` for Brother, `DLE EOT` for
//! ESC/POS) and maps the result onto IPP `printer-state-reasons`
//! keywords.  Polling never interleaves with an active job's data
//! stream.

pub mod device;
pub mod dither;
pub mod drivers;
pub mod error;
pub mod job;
pub mod media;
pub mod options;
pub mod packbits;
mod pipeline;
pub mod printer;
pub mod raster;
mod system;

pub use error::{DeviceError, JobError, RasterError, SystemError};
pub use job::JobState;
pub use options::AttrTable;
pub use printer::{PrinterState, StateReasons};
pub use system::{DeviceFactory, System, SystemConfig};
