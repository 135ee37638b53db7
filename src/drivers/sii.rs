//! Seiko Instruments SLP driver
//!
//! The Smart Label Printers speak a single-byte command set.  Blank
//! lines accumulate into vertical tabs; data lines are `PRINT` commands
//! carrying one packed row.  Quality maps to `FINEMODE` on the older
//! heads and `SETSPEED` on the newer ones.

use tracing::debug;

use crate::device::Device;
use crate::error::JobError;
use crate::options::{JobOptions, Quality};

use super::{line_is_blank, Codec, Driver, DriverMedia, MediaTracking, MediaTrackings};

// SLP command bytes
const CMD_PRINT: u8 = 0x04;
const CMD_MARGIN: u8 = 0x06;
const CMD_LINEFEED: u8 = 0x0a;
const CMD_VERTTAB: u8 = 0x0b;
const CMD_FORMFEED: u8 = 0x0c;
const CMD_SETSPEED: u8 = 0x0d;
const CMD_DENSITY: u8 = 0x0e;
const CMD_RESET: u8 = 0x0f;
const CMD_FINEMODE: u8 = 0x17;

static SII_MEDIA: &[&str] = &[
    "om_35mm-slide_9x37mm",
    "om_8mm-spine_9x66mm",
    "om_file-folder_13x81mm",
    "om_return_16x43mm",
    "om_vhs-spine_18x141mm",
    "om_round_22x24mm",
    "om_multi-purpose_24x44mm",
    "om_address-small_24x83mm",
    "om_jewelry_27x48mm",
    "om_retail-label_32x37mm",
    "om_cut-hanging-15_32x40mm",
    "om_cut-hanging-13_32x78mm",
    "om_address-large_35x83mm",
    "om_euro-name-badge_38x67mm",
    "om_euro-folder-narrow_38x186mm",
    "om_euro-file-folder_39x49mm",
    "om_vhs-face_45x72mm",
    "om_zip-disk_48x55mm",
    "om_diskette_48x64mm",
    "om_media-badge_48x64mm",
    "om_euro-name-badge-large_48x79mm",
    "om_4-part-label_48x96mm",
    "om_shipping_48x96mm",
    "om_top-coated-paper_48x140mm",
    "om_euro-folder-wide_48x186mm",
    "roll_max_48x186mm",
    "roll_min_9x13mm",
];

pub(crate) fn init(driver: &mut Driver) {
    driver.format = "application/vnd.sii-slp";
    driver.resolutions = vec![(300, 300)];
    driver.left_right = 1;
    driver.bottom_top = 1;
    driver.media = SII_MEDIA;
    driver.media_default = DriverMedia {
        size_name: "om_address-small_24x83mm",
        media_type: "labels",
        tracking: MediaTracking::Gap,
    };
    driver.tracking_supported = MediaTrackings::GAP;
    driver.darkness_configured = 50;
    driver.darkness_levels = 3;
}

/// Model number from the driver keyword (`sii_slp620` -> 620)
fn model_number(name: &str) -> u32 {
    name.strip_prefix("sii_slp")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Print head width in dots for a model
fn max_width(model: u32) -> u32 {
    match model {
        100 | 410 => 192,
        200 | 240 | 420 | 430 => 384,
        _ => 576,
    }
}

/// Per-job SLP state
pub(crate) struct SiiCodec {
    model: u32,
    max_width: u32,
    /// Accumulated blank lines
    blanks: u32,
}

impl SiiCodec {
    pub(crate) fn new(driver: &Driver) -> SiiCodec {
        let model = model_number(&driver.name);
        SiiCodec {
            model,
            max_width: max_width(model),
            blanks: 0,
        }
    }

    fn flush_blanks(&mut self, device: &mut Device) -> Result<(), JobError> {
        while self.blanks > 0 {
            if self.blanks == 1 {
                device.write_all(&[CMD_LINEFEED])?;
                self.blanks = 0;
            } else if self.blanks < 255 {
                device.write_all(&[CMD_VERTTAB, self.blanks as u8])?;
                self.blanks = 0;
            } else {
                device.write_all(&[CMD_VERTTAB, 255])?;
                self.blanks -= 255;
            }
        }
        Ok(())
    }
}

impl Codec for SiiCodec {
    fn start_job(&mut self, _options: &JobOptions, device: &mut Device) -> Result<(), JobError> {
        if matches!(self.model, 100 | 410) {
            // These heads need a hard reset and time to come back.
            debug!(model = self.model, "resetting printer");
            device.write_all(&[CMD_RESET])?;
            device.flush()?;
            std::thread::sleep(std::time::Duration::from_secs(3));
        }
        Ok(())
    }

    fn start_page(
        &mut self,
        options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        let header = &options.header;

        // Center the label on the head.
        let margin =
            12.7 * f64::from(self.max_width.saturating_sub(header.width)) / f64::from(header.x_resolution);
        device.write_all(&[CMD_MARGIN, margin as u8])?;

        self.blanks = 0;

        device.write_all(&[CMD_DENSITY, (3 * options.darkness() / 100) as u8])?;

        // Quality: fine mode on the older heads, speed on the rest.
        let high = options.print_quality == Quality::High;
        if matches!(self.model, 100 | 200 | 240 | 410 | 420 | 430) {
            device.write_all(&[CMD_FINEMODE, u8::from(high)])?;
        } else {
            device.write_all(&[CMD_SETSPEED, if high { 0x02 } else { 0x00 }])?;
        }

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
            self.blanks += 1;
            return Ok(());
        }

        self.flush_blanks(device)?;

        device.write_all(&[CMD_PRINT, width as u8])?;
        device.write_all(line)?;

        Ok(())
    }

    fn end_page(
        &mut self,
        _options: &JobOptions,
        device: &mut Device,
        _page: u32,
    ) -> Result<(), JobError> {
        device.write_all(&[CMD_FORMFEED])?;
        device.flush()?;
        Ok(())
    }

    fn end_job(&mut self, _options: &JobOptions, _device: &mut Device) -> Result<(), JobError> {
        Ok(())
    }
}
