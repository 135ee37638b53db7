//! DYMO LabelWriter / LabelManager driver
//!
//! The LabelWriter wire protocol is a small ESC command set: the job
//! opens with a long string of ESC bytes plus `@` to resynchronize the
//! printer, each page declares its length, line width, roll, and
//! density, and raster lines are `0x16`-prefixed.  Blank lines are
//! accumulated and flushed as feed commands.

use tracing::debug;

use crate::device::Device;
use crate::error::JobError;
use crate::options::JobOptions;

use super::{line_is_blank, Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

static DYMO_MEDIA: &[&str] = &[
    "oe_thin-multipurpose-label_0.375x2.8125in",
    "oe_library-barcode-label_0.5x1.875in",
    "oe_hanging-file-tab-insert_0.5625x2in",
    "oe_file-folder-label_0.5625x3.4375in",
    "oe_return-address-label_0.75x2in",
    "oe_barcode-label_0.75x2.5in",
    "oe_video-spine-label_0.75x5.875in",
    "oe_price-tag-label_0.9375x0.875in",
    "oe_square-multipurpose-label_1x1in",
    "oe_book-spine-label_1x1.5in",
    "oe_sm-multipurpose-label_1x2.125in",
    "oe_2-up-file-folder-label_1.125x3.4375in",
    "oe_internet-postage-label_1.25x1.625in",
    "oe_address-label_1.25x3.5in",
    "oe_lg-address-label_1.4x3.5in",
    "oe_video-top-label_1.8x3.1in",
    "oe_multipurpose-label_2x2.3125in",
    "oe_md-appointment-card_2x3.5in",
    "oe_lg-multipurpose-label_2.125x.75in",
    "oe_shipping-label_2.125x4in",
    "oe_continuous-label_2.125x3600in",
    "oe_md-multipurpose-label_2.25x1.25in",
    "oe_media-label_2.25x2.25in",
    "oe_2-up-address-label_2.25x3.5in",
    "oe_name-badge-label_2.25x4in",
    "oe_3-part-postage-label_2.25x7in",
    "oe_2-part-internet-postage-label_2.25x7.5in",
    "oe_shipping-label_2.3125x4in",
    "oe_internet-postage-label_2.3125x7in",
    "oe_internet-postage-confirmation-label_2.3125x10.5in",
    "roll_max_2.3125x3600in",
    "roll_min_0.25x0.25in",
];

static DYMO_DUO_SOURCES: &[&str] = &["main-roll", "alternate-roll"];

/// Density command suffixes, lowest to highest heat
const DENSITY_CODES: [u8; 4] = [b'c', b'd', b'e', b'g'];

/// Printer reset: a wall of ESC bytes to flush any partial command,
/// then `@`.
const RESET: [u8; 101] = {
    let mut reset = [0x1b; 101];
    reset[100] = b'@';
    reset
};

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.dymo-lw";
    driver.resolutions = vec![(300, 300)];
    driver.left_right = 100;
    driver.bottom_top = 525;
    driver.media = DYMO_MEDIA;
    driver.media_default = DriverMedia {
        size_name: "oe_address-label_1.25x3.5in",
        media_type: "labels",
        tracking: MediaTracking::Web,
    };
    if driver.name.contains("-duo") || driver.name.contains("-twin") {
        driver.sources = DYMO_DUO_SOURCES;
    }
    driver.tracking_supported = MediaTrackings::WEB;
    driver.darkness_configured = 50;
    driver.darkness_levels = 4;
}

/// Per-job DYMO state
pub(crate) struct DymoCodec {
    /// Accumulated blank-line feed
    feed: u32,
    /// First printable line
    ystart: u32,
    /// One past the last printable line
    yend: u32,
}

impl DymoCodec {
    pub(crate) fn new(_driver: &Driver) -> DymoCodec {
        DymoCodec {
            feed: 0,
            ystart: 0,
            yend: 0,
        }
    }

    fn flush_feed(&mut self, device: &mut Device) -> Result<(), JobError> {
        if self.feed == 0 {
            return Ok(());
        }
        while self.feed > 255 {
            device.write_all(&[0x1b, b'f', 0x01, 255])?;
            self.feed -= 255;
        }
        device.write_all(&[0x1b, b'f', 0x01, self.feed as u8])?;
        self.feed = 0;
        Ok(())
    }
}

impl Codec for DymoCodec {
    fn start_job(&mut self, _options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        device.write_all(&RESET)?;
        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        let header = &options.header;
        if header.bytes_per_line > 256 {
            return Err(JobError::ResourceExhausted(format!(
                "{} raster bytes per line",
                header.bytes_per_line
            )));
        }

        // Label length, line width, roll select, density.
        device.write_all(&[
            0x1b,
            b'L',
            (header.height >> 8) as u8,
            header.height as u8,
        ])?;
        device.write_all(&[0x1b, b'D', (header.bytes_per_line - 1) as u8])?;

        let roll = if options.media.source == "alternate-roll" { 2 } else { 1 };
        device.printf(format_args!("\x1bq{roll}"))?;

        let density = DENSITY_CODES[(3 * options.darkness() / 100) as usize];
        device.write_all(&[0x1b, density])?;

        self.feed = 0;
        self.ystart =
            (options.media.top_margin.max(0) as u32) * header.y_resolution / 2540;
        self.yend = header.height.saturating_sub(self.ystart);
        debug!(ystart = self.ystart, yend = self.yend, "dymo page setup");

        Ok(())
    }

    fn write_line(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        y: u32,
        line: &[u8],
    ) -> Result<(), JobError> {
        if y < self.ystart || y >= self.yend {
            return Ok(());
        }

        let width = options.header.bytes_per_line as usize;
        if line_is_blank(&line[..width], 0) {
            self.feed += 1;
            return Ok(());
        }

        self.flush_feed(device)?;

        // The head is one byte narrower than the line buffer; the first
        // byte is never printable.
        let mut buffer = Vec::with_capacity(width);
        buffer.push(0x16);
        buffer.extend_from_slice(&line[1..width]);
        device.write_all(&buffer)?;

        Ok(())
    }

    fn end_page(
        &mut self,
        _options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        device.write_all(&[0x1b, b'E'])?;
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }
}
