//! Zijiang ESC/POS receipt driver
//!
//! Raster output is batched into `GS v 0` bitmap transfers; blank lines
//! flush the pending bitmap and turn into `ESC J` paper feeds.  The job
//! ends with the configured tear-off feed and an optional cut.  Status
//! is polled with the four `DLE EOT` queries.

use tracing::debug;

use crate::device::Device;
use crate::error::{DeviceError, JobError};
use crate::options::JobOptions;
use crate::printer::StateReasons;

use super::{line_is_blank, Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

// Printer status (DLE EOT 1)
const STATUS_OFFLINE: u8 = 0x08;
// Off-line cause (DLE EOT 2)
const OFFLINE_COVER: u8 = 0x04;
const OFFLINE_PAPER: u8 = 0x20;
const OFFLINE_ERROR: u8 = 0x40;
// Error cause (DLE EOT 3)
const ERROR_CUTTER: u8 = 0x08;
const ERROR_UNRECOVERABLE: u8 = 0x20;
const ERROR_RECOVERABLE: u8 = 0x40;
// Paper sensors (DLE EOT 4)
const FEED_NEAR_END: u8 = 0x0c;
const FEED_PRESENCE: u8 = 0x60;

static ZJ_58MM_MEDIA: &[&str] = &["roll_min_48x65mm", "roll_current_48x65mm", "roll_max_48x3276mm"];
static ZJ_80MM_MEDIA: &[&str] = &["roll_min_72x65mm", "roll_current_72x65mm", "roll_max_72x3276mm"];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.zijiang-escpos";
    driver.resolutions = vec![(203, 203)];

    if driver.name.starts_with("zj_58") {
        driver.media = ZJ_58MM_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "roll_current_48x65mm",
            media_type: "continuous",
            tracking: MediaTracking::Continuous,
        };
    } else {
        driver.media = ZJ_80MM_MEDIA;
        driver.media_default = DriverMedia {
            size_name: "roll_current_72x65mm",
            media_type: "continuous",
            tracking: MediaTracking::Continuous,
        };
        driver.cut_labels = true;
    }

    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media_types = &["continuous"];
    driver.tracking_supported = MediaTrackings::CONTINUOUS;
    driver.tear_offset_configured = 1500;
    driver.tear_offset_supported = (0, 3000);
}

/// Per-job ESC/POS state
pub(crate) struct ZijiangCodec {
    cut: bool,
    tear_offset: i32,
    /// Paper feed accumulated from blank lines
    feed: u32,
    /// Raster rows pending in the bitmap buffer
    lines: u32,
    buffer: Vec<u8>,
}

impl ZijiangCodec {
    pub(crate) fn new(driver: &Driver) -> ZijiangCodec {
        ZijiangCodec {
            cut: driver.cut_labels,
            tear_offset: driver.tear_offset_configured,
            feed: 0,
            lines: 0,
            buffer: Vec::new(),
        }
    }

    fn flush_feed(&mut self, device: &mut Device) -> Result<(), JobError> {
        if self.feed == 0 {
            return Ok(());
        }
        while self.feed > 255 {
            device.write_all(&[0x1b, b'J', 255])?;
            self.feed -= 255;
        }
        device.write_all(&[0x1b, b'J', self.feed as u8])?;
        self.feed = 0;
        Ok(())
    }

    fn flush_bitmap(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
    ) -> Result<(), JobError> {
        if self.lines == 0 {
            return Ok(());
        }

        let width = options.header.bytes_per_line;
        let header = [
            0x1d,
            0x76,
            0x30,
            0x00,
            width as u8,
            (width >> 8) as u8,
            self.lines as u8,
            (self.lines >> 8) as u8,
        ];
        device.write_all(&header)?;
        device.write_all(&self.buffer)?;

        self.lines = 0;
        self.buffer.clear();
        Ok(())
    }
}

impl Codec for ZijiangCodec {
    fn start_job(&mut self, _options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        device.puts("\x1b@")?;
        Ok(())
    }

    fn start_page(
        &mut self,
        _options: &JobOptions,
        _device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        self.feed = 0;
        self.lines = 0;
        self.buffer.clear();
        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        let width = options.header.bytes_per_line as usize;
        let line = &line[..width];

        if line_is_blank(line, 0) {
            // A gap: push out the pending bitmap, then feed over it.
            self.flush_bitmap(options, device)?;
            self.feed += 1;
        } else {
            self.flush_feed(device)?;
            self.buffer.extend_from_slice(line);
            self.lines += 1;
        }

        Ok(())
    }

    fn end_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        self.flush_bitmap(options, device)?;
        self.flush_feed(device)?;
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        if self.tear_offset > 0 {
            // Each feed unit is 0.125 mm.
            let feed = (f64::from(self.tear_offset) / 12.5 + 0.5) as u8;
            device.write_all(&[0x1b, b'J', feed])?;
        }
        if self.cut {
            device.write_all(&[0x1d, b'V', 0x01])?;
        }
        device.puts("\x1b@")?;
        Ok(())
    }
}

/// Poll the four `DLE EOT` status bytes
pub(crate) fn query_status(device: &mut Device) -> Result<StateReasons, DeviceError> {
    let mut reasons = StateReasons::empty();

    for query in 1u8..=4 {
        device.write_all(&[0x10, 0x04, query])?;

        let mut status = [0u8; 1];
        if device.read(&mut status)? == 0 {
            debug!(query, "no status reply");
            return Ok(reasons);
        }
        let status = status[0];
        debug!(query, status = format_args!("{status:#04x}"), "status reply");

        match query {
            1 => {
                if status & STATUS_OFFLINE != 0 {
                    reasons |= StateReasons::OFFLINE;
                }
            }
            2 => {
                if status & OFFLINE_COVER != 0 {
                    reasons |= StateReasons::COVER_OPEN;
                }
                if status & OFFLINE_PAPER != 0 {
                    reasons |= StateReasons::MEDIA_EMPTY;
                }
                if status & OFFLINE_ERROR != 0 {
                    reasons |= StateReasons::OTHER;
                }
            }
            3 => {
                if status & (ERROR_CUTTER | ERROR_UNRECOVERABLE | ERROR_RECOVERABLE) != 0 {
                    reasons |= StateReasons::OTHER;
                }
            }
            _ => {
                if status & FEED_NEAR_END != 0 {
                    reasons |= StateReasons::MEDIA_LOW;
                }
                if status & FEED_PRESENCE != 0 {
                    reasons |= StateReasons::MEDIA_NEEDED;
                }
            }
        }
    }

    Ok(reasons)
}
